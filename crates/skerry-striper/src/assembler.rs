//! Gathering partial per-object reads into one contiguous buffer.

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};

/// Accumulates per-extent read results and assembles the final buffer.
///
/// Each partial result is keyed by its buffer offset and records both the
/// delivered bytes and the declared length of the region. A short read
/// delivers fewer bytes than it declares; [`assemble_result`] decides
/// whether the shortfall becomes zeros or an elided tail.
///
/// [`assemble_result`]: StripedReadResult::assemble_result
#[derive(Debug, Default)]
pub struct StripedReadResult {
    /// buffer offset -> (delivered bytes, declared length).
    partial: BTreeMap<u64, (Bytes, u64)>,
}

impl StripedReadResult {
    /// Create an empty result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a dense read result.
    ///
    /// Splices up to `buf_len` bytes off the head of `bl` for each buffer
    /// extent, in order. A short `bl` leaves trailing regions with fewer
    /// delivered bytes than declared.
    pub fn add_partial_result(&mut self, bl: &mut Bytes, buffer_extents: &[(u64, u64)]) {
        for &(buf_off, buf_len) in buffer_extents {
            let actual = (bl.len() as u64).min(buf_len);
            let data = bl.split_to(actual as usize);
            self.partial.insert(buf_off, (data, buf_len));
        }
    }

    /// Record a sparse read result.
    ///
    /// `sparse_map` describes which object-local ranges `bl` actually
    /// contains, keyed by source offset; `bl_off` is the source offset the
    /// head of `bl` corresponds to. Holes become zero-delivery entries
    /// with a nonzero declared length; dense runs are spliced off `bl`.
    pub fn add_partial_sparse_result(
        &mut self,
        bl: &mut Bytes,
        sparse_map: &BTreeMap<u64, u64>,
        bl_off: u64,
        buffer_extents: &[(u64, u64)],
    ) {
        let mut s = sparse_map.iter().peekable();
        let mut bl_off = bl_off;

        for &(buf_off, buf_len) in buffer_extents {
            let mut tofs = buf_off;
            let mut tlen = buf_len;

            while tlen > 0 {
                let Some(&(&s_first, &s_len)) = s.peek() else {
                    // Source exhausted: the rest of this extent is a hole.
                    self.partial.insert(tofs, (Bytes::new(), tlen));
                    break;
                };

                if s_len == 0 {
                    s.next();
                    continue;
                }

                if s_first > bl_off {
                    // Hole before the next dense run.
                    let gap = (s_first - bl_off).min(tlen);
                    self.partial.insert(tofs, (Bytes::new(), gap));
                    bl_off += gap;
                    tofs += gap;
                    tlen -= gap;
                    if tlen == 0 {
                        break;
                    }
                }

                debug_assert!(s_first <= bl_off);
                let left = (s_first + s_len) - bl_off;
                let actual = left.min(tlen);

                let data = bl.split_to(actual as usize);
                self.partial.insert(tofs, (data, actual));
                bl_off += actual;
                tofs += actual;
                tlen -= actual;

                if actual == left {
                    s.next();
                }
            }
        }
    }

    /// Assemble the recorded regions into one buffer and clear the state.
    ///
    /// Regions are walked from the highest buffer offset down. A region
    /// whose delivered bytes fall short of its declared length is padded
    /// with zeros when `zero_tail` is set or when anything follows it;
    /// otherwise the shortfall is elided, so a plain read does not grow
    /// trailing zeros past the last delivered byte.
    pub fn assemble_result(&mut self, zero_tail: bool) -> Bytes {
        let partial = std::mem::take(&mut self.partial);
        let Some((&last_off, &(_, last_declared))) = partial.last_key_value() else {
            return Bytes::new();
        };

        // Collected back-to-front; reversed before concatenation.
        let mut parts: Vec<Bytes> = Vec::with_capacity(partial.len());
        let mut accumulated: usize = 0;
        let mut end = last_off + last_declared;

        for (&buf_off, (data, declared)) in partial.iter().rev() {
            debug_assert_eq!(
                buf_off,
                end - declared,
                "partial results must tile the buffer"
            );
            end = buf_off;

            let delivered = data.len() as u64;
            if delivered < *declared && (zero_tail || accumulated > 0) {
                let pad = (*declared - delivered) as usize;
                parts.push(Bytes::from(vec![0u8; pad]));
                accumulated += pad;
            }
            parts.push(data.clone());
            accumulated += data.len();
        }

        let mut out = BytesMut::with_capacity(accumulated);
        for part in parts.into_iter().rev() {
            out.extend_from_slice(&part);
        }
        out.freeze()
    }

    /// Number of recorded regions.
    pub fn len(&self) -> usize {
        self.partial.len()
    }

    /// True when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.partial.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(pattern: u8, len: usize) -> Bytes {
        Bytes::from(vec![pattern; len])
    }

    #[test]
    fn test_dense_partition_reassembles_in_order() {
        // Buffer [0, 24) split across two extents, delivered out of order.
        let mut result = StripedReadResult::new();

        let mut second = bytes(0xbb, 8);
        result.add_partial_result(&mut second, &[(16, 8)]);

        let mut first = Bytes::from((0u8..16).collect::<Vec<u8>>());
        result.add_partial_result(&mut first, &[(0, 8), (8, 8)]);

        let out = result.assemble_result(false);
        assert_eq!(out.len(), 24);
        assert_eq!(&out[..16], (0u8..16).collect::<Vec<u8>>().as_slice());
        assert_eq!(&out[16..], &[0xbb; 8]);
        assert!(result.is_empty(), "assemble clears the state");
    }

    #[test]
    fn test_interleaved_extents_land_by_buffer_offset() {
        // Two objects striped: object A covers buffer [0,4) and [8,12),
        // object B covers [4,8) and [12,16).
        let mut result = StripedReadResult::new();
        let mut a = Bytes::from_static(b"AAAAaaaa");
        result.add_partial_result(&mut a, &[(0, 4), (8, 4)]);
        let mut b = Bytes::from_static(b"BBBBbbbb");
        result.add_partial_result(&mut b, &[(4, 4), (12, 4)]);

        let out = result.assemble_result(true);
        assert_eq!(&out[..], b"AAAABBBBaaaabbbb");
    }

    #[test]
    fn test_short_tail_elided_without_zero_tail() {
        let mut result = StripedReadResult::new();
        let mut data = bytes(0x11, 10);
        // Declared 16 but only 10 delivered.
        result.add_partial_result(&mut data, &[(0, 16)]);

        let out = result.assemble_result(false);
        assert_eq!(out.len(), 10, "trailing hole must not grow the buffer");
    }

    #[test]
    fn test_short_tail_zero_filled_with_zero_tail() {
        let mut result = StripedReadResult::new();
        let mut data = bytes(0x11, 10);
        result.add_partial_result(&mut data, &[(0, 16)]);

        let out = result.assemble_result(true);
        assert_eq!(out.len(), 16);
        assert_eq!(&out[..10], &[0x11; 10]);
        assert_eq!(&out[10..], &[0; 6]);
    }

    #[test]
    fn test_internal_short_read_zero_filled_regardless() {
        // A short region followed by a full one: the hole is internal, so
        // it must be padded even without zero_tail.
        let mut result = StripedReadResult::new();
        let mut short = bytes(0x22, 3);
        result.add_partial_result(&mut short, &[(0, 8)]);
        let mut full = bytes(0x33, 8);
        result.add_partial_result(&mut full, &[(8, 8)]);

        let out = result.assemble_result(false);
        assert_eq!(out.len(), 16);
        assert_eq!(&out[..3], &[0x22; 3]);
        assert_eq!(&out[3..8], &[0; 5]);
        assert_eq!(&out[8..], &[0x33; 8]);
    }

    #[test]
    fn test_sparse_hole_in_the_middle() {
        // Source [0,4) dense, [4,10) hole, [10,16) dense.
        let mut result = StripedReadResult::new();
        let mut bl = Bytes::from_static(b"headTAIL--");
        let mut sparse_map = BTreeMap::new();
        sparse_map.insert(0u64, 4u64);
        sparse_map.insert(10u64, 6u64);
        result.add_partial_sparse_result(&mut bl, &sparse_map, 0, &[(0, 16)]);

        let out = result.assemble_result(true);
        assert_eq!(out.len(), 16);
        assert_eq!(&out[..4], b"head");
        assert_eq!(&out[4..10], &[0; 6], "the hole must read as zeros");
        assert_eq!(&out[10..16], b"TAIL--");
    }

    #[test]
    fn test_sparse_hole_spans_extent_boundary() {
        // Hole [2,12) crosses from the first buffer extent into the second.
        let mut bl = Bytes::from_static(b"ab++++");
        let mut sparse_map = BTreeMap::new();
        sparse_map.insert(0u64, 2u64);
        sparse_map.insert(12u64, 4u64);

        let mut result = StripedReadResult::new();
        result.add_partial_sparse_result(&mut bl, &sparse_map, 0, &[(0, 8), (8, 8)]);

        let out = result.assemble_result(true);
        assert_eq!(out.len(), 16);
        assert_eq!(&out[..2], b"ab");
        assert_eq!(&out[2..12], &[0; 10]);
        assert_eq!(&out[12..], b"++++");
    }

    #[test]
    fn test_sparse_source_exhausted_declares_tail() {
        // Only [0,4) exists; the remaining 12 bytes are a trailing hole.
        let mut bl = Bytes::from_static(b"data");
        let mut sparse_map = BTreeMap::new();
        sparse_map.insert(0u64, 4u64);

        let mut result = StripedReadResult::new();
        result.add_partial_sparse_result(&mut bl, &sparse_map, 0, &[(0, 16)]);

        assert_eq!(result.assemble_result(false).len(), 4);

        let mut bl = Bytes::from_static(b"data");
        let mut result = StripedReadResult::new();
        result.add_partial_sparse_result(&mut bl, &sparse_map, 0, &[(0, 16)]);
        assert_eq!(result.assemble_result(true).len(), 16);
    }

    #[test]
    fn test_sparse_skips_zero_length_runs() {
        let mut bl = Bytes::from_static(b"xxxx");
        let mut sparse_map = BTreeMap::new();
        sparse_map.insert(0u64, 0u64);
        sparse_map.insert(4u64, 4u64);

        let mut result = StripedReadResult::new();
        result.add_partial_sparse_result(&mut bl, &sparse_map, 0, &[(0, 8)]);

        let out = result.assemble_result(true);
        assert_eq!(&out[..4], &[0; 4]);
        assert_eq!(&out[4..], b"xxxx");
    }

    #[test]
    fn test_empty_result_assembles_empty() {
        let mut result = StripedReadResult::new();
        assert!(result.assemble_result(true).is_empty());
        assert!(result.assemble_result(false).is_empty());
    }
}
