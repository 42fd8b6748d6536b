//! The filer: striped compound operations.

use std::sync::Arc;
use std::time::SystemTime;

use bytes::{Bytes, BytesMut};
use skerry_striper::{StripedReadResult, file_to_extents};
use skerry_types::{Ino, Layout, SnapContext, SnapId};
use tokio::task::JoinSet;
use tracing::debug;

use crate::error::FilerError;
use crate::objecter::{ObjectClient, OsdError};

/// Striped file operations over an object service.
///
/// Every operation maps its file range onto object extents, fans the
/// per-object calls out concurrently, and reports the first error after
/// all of them have completed. Fan-out per call is bounded by the
/// layout's stripe count (one op per object extent).
pub struct Filer {
    objecter: Arc<dyn ObjectClient>,
}

impl Filer {
    /// Create a filer over the given object client.
    pub fn new(objecter: Arc<dyn ObjectClient>) -> Self {
        Self { objecter }
    }

    pub(crate) fn objecter(&self) -> &Arc<dyn ObjectClient> {
        &self.objecter
    }

    /// Striped read.
    ///
    /// Missing objects and short object reads read as holes: interior
    /// holes come back zero-filled, a trailing hole is elided (the result
    /// may be shorter than `len`).
    pub async fn read(
        &self,
        ino: Ino,
        layout: &Layout,
        snapid: SnapId,
        offset: u64,
        len: u64,
        flags: u32,
    ) -> Result<Bytes, FilerError> {
        let extents = file_to_extents(layout, ino, offset, len)?;
        debug!(%ino, offset, len, objects = extents.len(), "striped read");

        let mut join = JoinSet::new();
        for (idx, e) in extents.iter().enumerate() {
            let objecter = self.objecter.clone();
            let oid = e.oid.clone();
            let oloc = e.oloc;
            let (off, elen) = (e.offset, e.length);
            join.spawn(async move {
                let r = objecter.read(&oid, &oloc, off, elen, snapid, flags).await;
                (idx, r)
            });
        }

        let mut results: Vec<Option<Bytes>> = vec![None; extents.len()];
        let mut first_err: Option<OsdError> = None;
        while let Some(res) = join.join_next().await {
            match res {
                Ok((idx, Ok(data))) => results[idx] = Some(data),
                Ok((idx, Err(e))) if e.is_not_found() => results[idx] = Some(Bytes::new()),
                Ok((_, Err(e))) => {
                    first_err.get_or_insert(e);
                }
                Err(e) => {
                    first_err.get_or_insert(OsdError::Failed(format!("read task: {e}")));
                }
            }
        }
        if let Some(e) = first_err {
            return Err(e.into());
        }

        let mut gather = StripedReadResult::new();
        for (e, data) in extents.iter().zip(results) {
            let mut bl = data.unwrap_or_default();
            gather.add_partial_result(&mut bl, &e.buffer_extents);
        }
        Ok(gather.assemble_result(false))
    }

    /// Striped write of `data` at `offset`.
    pub async fn write(
        &self,
        ino: Ino,
        layout: &Layout,
        snapc: &SnapContext,
        offset: u64,
        data: Bytes,
        mtime: SystemTime,
        flags: u32,
    ) -> Result<(), FilerError> {
        let extents = file_to_extents(layout, ino, offset, data.len() as u64)?;
        debug!(%ino, offset, len = data.len(), objects = extents.len(), "striped write");

        let mut join = JoinSet::new();
        for e in &extents {
            // Gather this object's slice of the buffer, in object order.
            let mut payload = BytesMut::with_capacity(e.length as usize);
            for &(buf_off, run) in &e.buffer_extents {
                payload.extend_from_slice(&data[buf_off as usize..(buf_off + run) as usize]);
            }

            let objecter = self.objecter.clone();
            let oid = e.oid.clone();
            let oloc = e.oloc;
            let off = e.offset;
            let snapc = snapc.clone();
            let payload = payload.freeze();
            join.spawn(async move {
                objecter
                    .write(&oid, &oloc, off, payload, &snapc, mtime, flags)
                    .await
            });
        }
        drain_unit_ops(join).await
    }

    /// Truncate every object extent in `[offset, offset + len)` down to
    /// the extent's starting offset.
    #[allow(clippy::too_many_arguments)]
    pub async fn truncate(
        &self,
        ino: Ino,
        layout: &Layout,
        snapc: &SnapContext,
        offset: u64,
        len: u64,
        truncate_seq: u32,
        mtime: SystemTime,
        flags: u32,
    ) -> Result<(), FilerError> {
        let extents = file_to_extents(layout, ino, offset, len)?;
        debug!(%ino, offset, len, objects = extents.len(), "striped truncate");

        let mut join = JoinSet::new();
        for e in &extents {
            let objecter = self.objecter.clone();
            let oid = e.oid.clone();
            let oloc = e.oloc;
            let truncate_size = e.offset;
            let snapc = snapc.clone();
            join.spawn(async move {
                objecter
                    .truncate(&oid, &oloc, truncate_size, truncate_seq, &snapc, mtime, flags)
                    .await
            });
        }
        drain_unit_ops(join).await
    }

    /// Zero-fill `[offset, offset + len)`.
    ///
    /// Extents covering a whole object remove the object instead of
    /// writing zeros.
    #[allow(clippy::too_many_arguments)]
    pub async fn zero(
        &self,
        ino: Ino,
        layout: &Layout,
        snapc: &SnapContext,
        offset: u64,
        len: u64,
        mtime: SystemTime,
        flags: u32,
    ) -> Result<(), FilerError> {
        let extents = file_to_extents(layout, ino, offset, len)?;
        debug!(%ino, offset, len, objects = extents.len(), "striped zero");

        let object_size = u64::from(layout.object_size);
        let mut join = JoinSet::new();
        for e in &extents {
            let objecter = self.objecter.clone();
            let oid = e.oid.clone();
            let oloc = e.oloc;
            let (off, elen) = (e.offset, e.length);
            let snapc = snapc.clone();
            let whole_object = off == 0 && elen == object_size;
            join.spawn(async move {
                if whole_object {
                    objecter.remove(&oid, &oloc, &snapc, mtime, flags).await
                } else {
                    objecter
                        .zero(&oid, &oloc, off, elen, &snapc, mtime, flags)
                        .await
                }
            });
        }
        drain_unit_ops(join).await
    }
}

/// Drain a set of unit object ops, reporting the first error only after
/// every op has completed.
pub(crate) async fn drain_unit_ops(
    mut join: JoinSet<Result<(), OsdError>>,
) -> Result<(), FilerError> {
    let mut first_err: Option<OsdError> = None;
    while let Some(res) = join.join_next().await {
        let outcome = res.unwrap_or_else(|e| Err(OsdError::Failed(format!("op task: {e}"))));
        if let Err(e) = outcome {
            first_err.get_or_insert(e);
        }
    }
    match first_err {
        None => Ok(()),
        Some(e) => Err(e.into()),
    }
}
