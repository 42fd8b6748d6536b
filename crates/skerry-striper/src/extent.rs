//! A byte range within one object, tied back to the user buffer.

use skerry_types::{ObjectId, ObjectLocator};

/// One object's share of a striped file range.
///
/// `buffer_extents` associates the object-local range
/// `[offset, offset + length)` with the (generally discontiguous) regions
/// of the caller's buffer it came from: an ordered list of
/// `(buffer_offset, length)` pairs whose lengths sum to `length`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectExtent {
    /// Object name.
    pub oid: ObjectId,
    /// Object index within the file.
    pub objectno: u64,
    /// Placement of the object.
    pub oloc: ObjectLocator,
    /// Start of the range within the object.
    pub offset: u64,
    /// Length of the range within the object.
    pub length: u64,
    /// Buffer regions this range maps to, in object-offset order.
    pub buffer_extents: Vec<(u64, u64)>,
}

impl ObjectExtent {
    /// Total buffer bytes covered; always equals `length`.
    pub fn buffer_len(&self) -> u64 {
        self.buffer_extents.iter().map(|&(_, len)| len).sum()
    }
}
