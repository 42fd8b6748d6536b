//! The object-service seam.
//!
//! The filer consumes a lower object layer through [`ObjectClient`]; the
//! real implementation routes each call to the object store, and tests
//! substitute an in-memory mock. All operations address a single object;
//! scatter/gather across objects happens in the filer itself.

use std::time::SystemTime;

use bytes::Bytes;
use skerry_types::{ObjectId, ObjectLocator, SnapContext, SnapId};

/// Result of statting one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectStat {
    /// Current object size in bytes.
    pub size: u64,
    /// Last modification time.
    pub mtime: SystemTime,
}

/// Errors reported by the object service.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OsdError {
    /// The object does not exist.
    #[error("object not found")]
    NotFound,

    /// The operation failed.
    #[error("{0}")]
    Failed(String),
}

impl OsdError {
    /// True for [`OsdError::NotFound`], which reads and probes treat as
    /// "object absent" rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, OsdError::NotFound)
    }
}

/// Per-object operations provided by the object service.
///
/// Reads take a snapshot id; writes take a snap context. All
/// implementations must be `Send + Sync`; the filer fans calls out from
/// spawned tasks.
#[async_trait::async_trait]
pub trait ObjectClient: Send + Sync {
    /// Stat an object. Absent objects report [`OsdError::NotFound`].
    async fn stat(
        &self,
        oid: &ObjectId,
        oloc: &ObjectLocator,
        snapid: SnapId,
        flags: u32,
    ) -> Result<ObjectStat, OsdError>;

    /// Read a byte range. May deliver fewer bytes than requested when the
    /// object is shorter than `off + len`.
    async fn read(
        &self,
        oid: &ObjectId,
        oloc: &ObjectLocator,
        off: u64,
        len: u64,
        snapid: SnapId,
        flags: u32,
    ) -> Result<Bytes, OsdError>;

    /// Write a byte range.
    #[allow(clippy::too_many_arguments)]
    async fn write(
        &self,
        oid: &ObjectId,
        oloc: &ObjectLocator,
        off: u64,
        data: Bytes,
        snapc: &SnapContext,
        mtime: SystemTime,
        flags: u32,
    ) -> Result<(), OsdError>;

    /// Zero a byte range.
    #[allow(clippy::too_many_arguments)]
    async fn zero(
        &self,
        oid: &ObjectId,
        oloc: &ObjectLocator,
        off: u64,
        len: u64,
        snapc: &SnapContext,
        mtime: SystemTime,
        flags: u32,
    ) -> Result<(), OsdError>;

    /// Remove an object.
    async fn remove(
        &self,
        oid: &ObjectId,
        oloc: &ObjectLocator,
        snapc: &SnapContext,
        mtime: SystemTime,
        flags: u32,
    ) -> Result<(), OsdError>;

    /// Truncate an object, guarded by a truncate sequence number so stale
    /// truncates never clobber newer data.
    #[allow(clippy::too_many_arguments)]
    async fn truncate(
        &self,
        oid: &ObjectId,
        oloc: &ObjectLocator,
        truncate_size: u64,
        truncate_seq: u32,
        snapc: &SnapContext,
        mtime: SystemTime,
        flags: u32,
    ) -> Result<(), OsdError>;
}
