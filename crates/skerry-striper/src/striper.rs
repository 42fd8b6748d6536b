//! Forward and inverse range mappings.

use std::collections::HashMap;

use skerry_types::{Ino, Layout, LayoutError, ObjectId};

use crate::extent::ObjectExtent;

/// Map a file byte range onto object extents.
///
/// Walks `[offset, offset + len)` in stripe-unit-aligned chunks, assigning
/// each chunk to its object and object-local offset, and coalescing
/// adjacent chunks of the same object into a single extent. The result has
/// exactly one entry per object, in first-appearance order, and the
/// concatenation of all `buffer_extents` (in emission order) tiles
/// `[0, len)` exactly.
pub fn file_to_extents(
    layout: &Layout,
    ino: Ino,
    offset: u64,
    len: u64,
) -> Result<Vec<ObjectExtent>, LayoutError> {
    layout.validate()?;

    let su = u64::from(layout.stripe_unit);
    let stripe_count = u64::from(layout.stripe_count);
    let stripes_per_object = layout.stripes_per_object();
    let oloc = layout.object_locator();

    let mut extents: Vec<ObjectExtent> = Vec::new();
    let mut index: HashMap<u64, usize> = HashMap::new();

    let mut cur = offset;
    let mut left = len;
    while left > 0 {
        let blockno = cur / su;
        let stripeno = blockno / stripe_count;
        let stripepos = blockno % stripe_count;
        let objectsetno = stripeno / stripes_per_object;
        let objectno = objectsetno * stripe_count + stripepos;

        // Object-local position of this chunk.
        let block_start = (stripeno % stripes_per_object) * su;
        let block_off = cur % su;
        let x_offset = block_start + block_off;
        let x_len = left.min(su - block_off);

        let slot = *index.entry(objectno).or_insert_with(|| {
            extents.push(ObjectExtent {
                oid: ObjectId::new(ino, objectno),
                objectno,
                oloc,
                offset: 0,
                length: 0,
                buffer_extents: Vec::new(),
            });
            extents.len() - 1
        });
        let ex = &mut extents[slot];

        if ex.buffer_extents.is_empty() {
            ex.offset = x_offset;
            ex.length = x_len;
        } else {
            // A linear walk revisits an object only at the next
            // object-local offset.
            debug_assert_eq!(ex.offset + ex.length, x_offset);
            ex.length += x_len;
        }
        ex.buffer_extents.push((cur - offset, x_len));

        cur += x_len;
        left -= x_len;
    }

    Ok(extents)
}

/// Map an object-local byte range back to file ranges.
///
/// Emits one `(file_offset, run_len)` pair per stripe-unit-aligned chunk
/// of the object range; every run is at most one stripe unit long.
pub fn extent_to_file(
    layout: &Layout,
    objectno: u64,
    off: u64,
    len: u64,
) -> Result<Vec<(u64, u64)>, LayoutError> {
    layout.validate()?;

    let su = u64::from(layout.stripe_unit);
    let stripe_count = u64::from(layout.stripe_count);
    let stripes_per_object = layout.stripes_per_object();

    let stripepos = objectno % stripe_count;
    let objectsetno = objectno / stripe_count;

    let mut runs = Vec::with_capacity((len / su + 1) as usize);
    let mut off = off;
    let mut len = len;
    let mut off_in_block = off % su;
    while len > 0 {
        let stripeno = off / su + objectsetno * stripes_per_object;
        let blockno = stripeno * stripe_count + stripepos;
        let extent_off = blockno * su + off_in_block;
        let extent_len = len.min(su - off_in_block);
        runs.push((extent_off, extent_len));

        off_in_block = 0;
        off += extent_len;
        len -= extent_len;
    }

    Ok(runs)
}
