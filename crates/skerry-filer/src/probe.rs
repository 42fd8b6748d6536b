//! Size/mtime probing across sparse object sets.
//!
//! Only objects that were actually written exist in the object store;
//! absent objects stat as `NOT_FOUND` and count as size 0. The probe
//! walks the file one period (`stripe_count * object_size`) at a time,
//! stats every object the window touches, and reconstructs the logical
//! end of the file from the observed sizes.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use skerry_striper::{ObjectExtent, file_to_extents};
use skerry_types::{Ino, Layout, ObjectId, SnapId, osd_flags};
use tokio::task::JoinSet;
use tracing::debug;

use crate::error::FilerError;
use crate::filer::Filer;
use crate::objecter::OsdError;

/// Outcome of a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    /// Logical end: one past the last data byte found (forward and
    /// backward), or the search baseline when no data exists.
    pub end: u64,
    /// Newest object mtime seen, when requested. Absent objects
    /// contribute nothing; a probe that saw no objects reports the epoch.
    pub mtime: Option<SystemTime>,
}

impl Filer {
    /// Probe for the logical end of a sparsely stored file.
    ///
    /// Forward (`forward == true`): search upward from `start_from` for
    /// the first offset at which the file ends. Backward: `start_from` is
    /// an exclusive upper bound and must exceed `lower_bound`; the probe
    /// searches downward for the last data byte.
    ///
    /// When `want_mtime` is set, a backward probe keeps stepping windows
    /// down to offset zero so every existing object contributes to the
    /// reported mtime; a forward probe reports the mtimes of the windows
    /// it visited.
    ///
    /// A stat failure other than `NOT_FOUND` latches: remaining in-flight
    /// stats are drained, then the first error is returned.
    #[allow(clippy::too_many_arguments)]
    pub async fn probe(
        &self,
        ino: Ino,
        layout: &Layout,
        snapid: SnapId,
        start_from: u64,
        lower_bound: u64,
        forward: bool,
        want_mtime: bool,
        flags: u32,
    ) -> Result<ProbeResult, FilerError> {
        layout.validate()?;
        if !forward && start_from <= lower_bound {
            return Err(FilerError::InvalidProbe {
                start: start_from,
                lower_bound,
            });
        }

        let period = layout.period();

        // First window: one period, widened (forward) or narrowed
        // (backward) so every later window is period-aligned.
        let (mut probing_off, mut probing_len);
        if forward {
            probing_off = start_from;
            probing_len = period;
            if start_from % period != 0 {
                probing_len += period - start_from % period;
            }
        } else {
            probing_len = match start_from % period {
                0 => period,
                partial => partial,
            };
            probing_off = start_from - probing_len;
        }

        debug!(
            %ino,
            start_from,
            forward,
            probing_off,
            probing_len,
            "probe starting"
        );

        let mut found_size = false;
        let mut end = 0u64;
        // Forward: end of the data seen so far, used when a window turns
        // out to be entirely absent.
        let mut candidate_end = start_from;
        let mut max_mtime: Option<SystemTime> = None;

        loop {
            let extents = file_to_extents(layout, ino, probing_off, probing_len)?;
            let known_size = self
                .stat_window(&extents, snapid, flags, &mut max_mtime)
                .await?;

            if !found_size {
                // The extent holding the end is the last one (in
                // emission order) with any data; everything before it is
                // covered data or an interior hole either way.
                let last_data = extents
                    .iter()
                    .rev()
                    .find(|e| known_size.get(&e.oid).copied().unwrap_or(0) > 0);

                match last_data {
                    Some(e) => {
                        let known = known_size.get(&e.oid).copied().unwrap_or(0);
                        let shouldbe = e.offset + e.length;
                        debug_assert!(known <= shouldbe);
                        let at = locate_end(probing_off, e, known.saturating_sub(e.offset));
                        if forward && known == shouldbe {
                            // Object fully written: data may continue in
                            // the next window.
                            candidate_end = at;
                        } else {
                            end = at;
                            found_size = true;
                            debug!(%ino, end, "probe found end");
                        }
                    }
                    None => {
                        if forward {
                            end = candidate_end;
                            found_size = true;
                            debug!(%ino, end, "probe found end at data seen so far");
                        } else if probing_off == 0 {
                            end = 0;
                            found_size = true;
                            debug!(%ino, "probe found empty range");
                        }
                    }
                }
            }

            // Backward probes that want the mtime keep walking down to
            // offset zero so no object's mtime is missed.
            let keep_probing =
                !found_size || (!forward && want_mtime && probing_off > 0);
            if !keep_probing {
                break;
            }

            if forward {
                probing_off += probing_len;
            } else {
                probing_off -= period;
            }
            probing_len = period;
            debug_assert_eq!(probing_off % period, 0);
        }

        Ok(ProbeResult {
            end,
            mtime: want_mtime.then(|| max_mtime.unwrap_or(UNIX_EPOCH)),
        })
    }

    /// Stat every object of one window concurrently. Absent objects
    /// record size 0; the first non-`NOT_FOUND` error is returned, but
    /// only after all in-flight stats have completed.
    async fn stat_window(
        &self,
        extents: &[ObjectExtent],
        snapid: SnapId,
        flags: u32,
        max_mtime: &mut Option<SystemTime>,
    ) -> Result<HashMap<ObjectId, u64>, FilerError> {
        let mut join = JoinSet::new();
        for e in extents {
            let objecter = self.objecter().clone();
            let oid = e.oid.clone();
            let oloc = e.oloc;
            join.spawn(async move {
                let r = objecter
                    .stat(&oid, &oloc, snapid, flags | osd_flags::RWORDERED)
                    .await;
                (oid, r)
            });
        }

        let mut known_size = HashMap::with_capacity(extents.len());
        let mut first_err: Option<OsdError> = None;
        while let Some(res) = join.join_next().await {
            match res {
                Ok((oid, Ok(stat))) => {
                    debug!(%oid, size = stat.size, "probed object");
                    known_size.insert(oid, stat.size);
                    if max_mtime.is_none_or(|m| stat.mtime > m) {
                        *max_mtime = Some(stat.mtime);
                    }
                }
                Ok((oid, Err(e))) if e.is_not_found() => {
                    debug!(%oid, "probed object absent");
                    known_size.insert(oid, 0);
                }
                Ok((_, Err(e))) => {
                    first_err.get_or_insert(e);
                }
                Err(e) => {
                    first_err.get_or_insert(OsdError::Failed(format!("stat task: {e}")));
                }
            }
        }

        match first_err {
            None => Ok(known_size),
            Some(e) => Err(e.into()),
        }
    }
}

/// Locate the logical offset `oleft` bytes into an extent's data, by
/// walking its buffer extents.
fn locate_end(probing_off: u64, e: &ObjectExtent, mut oleft: u64) -> u64 {
    for &(buf_off, run) in &e.buffer_extents {
        if oleft <= run {
            return probing_off + buf_off + oleft;
        }
        oleft -= run;
    }
    // known_size never exceeds the extent's covered range.
    probing_off
        + e.buffer_extents
            .last()
            .map(|&(buf_off, run)| buf_off + run)
            .unwrap_or(0)
}
