//! Bounded-parallel purge of contiguous object ranges.

use std::time::SystemTime;

use skerry_types::{Ino, Layout, ObjectId, SnapContext};
use tokio::task::JoinSet;
use tracing::debug;

use crate::error::FilerError;
use crate::filer::Filer;
use crate::objecter::OsdError;

/// Cap on concurrently outstanding removes during a range purge.
pub const MAX_PURGE_PARALLEL: usize = 10;

impl Filer {
    /// Remove objects `[first_obj, first_obj + num_obj)` of a file.
    ///
    /// At most [`MAX_PURGE_PARALLEL`] removes are outstanding at a time;
    /// each completion opportunistically launches more from the head of
    /// the range. The call returns only when every remove has completed,
    /// with the first error observed (if any).
    #[allow(clippy::too_many_arguments)]
    pub async fn purge_range(
        &self,
        ino: Ino,
        layout: &Layout,
        snapc: &SnapContext,
        first_obj: u64,
        num_obj: u64,
        mtime: SystemTime,
        flags: u32,
    ) -> Result<(), FilerError> {
        let oloc = layout.object_locator();

        if num_obj == 0 {
            return Ok(());
        }

        // Single object: skip the batching machinery.
        if num_obj == 1 {
            let oid = ObjectId::new(ino, first_obj);
            self.objecter()
                .remove(&oid, &oloc, snapc, mtime, flags)
                .await?;
            return Ok(());
        }

        debug!(%ino, first_obj, num_obj, "purging object range");

        let mut next = first_obj;
        let mut remaining = num_obj;
        let mut join: JoinSet<Result<(), OsdError>> = JoinSet::new();
        let mut first_err: Option<OsdError> = None;

        loop {
            while remaining > 0 && join.len() < MAX_PURGE_PARALLEL {
                let objecter = self.objecter().clone();
                let oid = ObjectId::new(ino, next);
                let snapc = snapc.clone();
                join.spawn(async move {
                    objecter.remove(&oid, &oloc, &snapc, mtime, flags).await
                });
                next += 1;
                remaining -= 1;
            }

            match join.join_next().await {
                None => break,
                Some(res) => {
                    let outcome = res
                        .unwrap_or_else(|e| Err(OsdError::Failed(format!("remove task: {e}"))));
                    if let Err(e) = outcome {
                        first_err.get_or_insert(e);
                    }
                }
            }
        }

        debug!(%ino, num_obj, ok = first_err.is_none(), "purge complete");
        match first_err {
            None => Ok(()),
            Some(e) => Err(e.into()),
        }
    }
}
