//! Tests for the filer: probe, purge, and striped compound ops, driven
//! through an in-memory mock object client.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use skerry_types::{Ino, Layout, ObjectId, ObjectLocator, SnapContext, SnapId};

use crate::{Filer, FilerError, MAX_PURGE_PARALLEL, ObjectClient, ObjectStat, OsdError};

const INO: Ino = Ino(0x10);

fn layout(stripe_unit: u32, stripe_count: u32, object_size: u32) -> Layout {
    Layout {
        stripe_unit,
        stripe_count,
        object_size,
        pool: 0,
    }
}

fn s1_layout() -> Layout {
    layout(4096, 4, 16384)
}

#[derive(Debug, Clone)]
struct MockObject {
    data: Vec<u8>,
    mtime: SystemTime,
}

/// In-memory object service with error injection and concurrency
/// accounting.
#[derive(Default)]
struct MockObjectClient {
    objects: Mutex<HashMap<ObjectId, MockObject>>,
    stat_errors: Mutex<HashMap<ObjectId, OsdError>>,
    remove_errors: Mutex<HashMap<ObjectId, OsdError>>,
    stats_completed: AtomicUsize,
    removes_attempted: AtomicUsize,
    removes_inflight: AtomicUsize,
    removes_peak: AtomicUsize,
    truncates: Mutex<Vec<(ObjectId, u64, u32)>>,
    zeroes: Mutex<Vec<(ObjectId, u64, u64)>>,
}

impl MockObjectClient {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn put_object(&self, objectno: u64, data: Vec<u8>, mtime: SystemTime) {
        self.objects
            .lock()
            .expect("objects lock poisoned")
            .insert(ObjectId::new(INO, objectno), MockObject { data, mtime });
    }

    fn object_len(&self, objectno: u64) -> Option<usize> {
        self.objects
            .lock()
            .expect("objects lock poisoned")
            .get(&ObjectId::new(INO, objectno))
            .map(|o| o.data.len())
    }

    fn inject_stat_error(&self, objectno: u64, err: OsdError) {
        self.stat_errors
            .lock()
            .expect("stat_errors lock poisoned")
            .insert(ObjectId::new(INO, objectno), err);
    }

    fn inject_remove_error(&self, objectno: u64, err: OsdError) {
        self.remove_errors
            .lock()
            .expect("remove_errors lock poisoned")
            .insert(ObjectId::new(INO, objectno), err);
    }

    fn object_count(&self) -> usize {
        self.objects.lock().expect("objects lock poisoned").len()
    }
}

#[async_trait::async_trait]
impl ObjectClient for MockObjectClient {
    async fn stat(
        &self,
        oid: &ObjectId,
        _oloc: &ObjectLocator,
        _snapid: SnapId,
        _flags: u32,
    ) -> Result<ObjectStat, OsdError> {
        // Slow path so that error latching can be observed to wait for
        // the rest of the window.
        tokio::time::sleep(Duration::from_millis(2)).await;

        let result = if let Some(err) = self
            .stat_errors
            .lock()
            .expect("stat_errors lock poisoned")
            .get(oid)
        {
            Err(err.clone())
        } else {
            match self
                .objects
                .lock()
                .expect("objects lock poisoned")
                .get(oid)
            {
                Some(obj) => Ok(ObjectStat {
                    size: obj.data.len() as u64,
                    mtime: obj.mtime,
                }),
                None => Err(OsdError::NotFound),
            }
        };
        self.stats_completed.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn read(
        &self,
        oid: &ObjectId,
        _oloc: &ObjectLocator,
        off: u64,
        len: u64,
        _snapid: SnapId,
        _flags: u32,
    ) -> Result<Bytes, OsdError> {
        let objects = self.objects.lock().expect("objects lock poisoned");
        let obj = objects.get(oid).ok_or(OsdError::NotFound)?;
        let start = (off as usize).min(obj.data.len());
        let end = ((off + len) as usize).min(obj.data.len());
        Ok(Bytes::copy_from_slice(&obj.data[start..end]))
    }

    async fn write(
        &self,
        oid: &ObjectId,
        _oloc: &ObjectLocator,
        off: u64,
        data: Bytes,
        _snapc: &SnapContext,
        mtime: SystemTime,
        _flags: u32,
    ) -> Result<(), OsdError> {
        let mut objects = self.objects.lock().expect("objects lock poisoned");
        let obj = objects.entry(oid.clone()).or_insert(MockObject {
            data: Vec::new(),
            mtime,
        });
        let end = off as usize + data.len();
        if obj.data.len() < end {
            obj.data.resize(end, 0);
        }
        obj.data[off as usize..end].copy_from_slice(&data);
        obj.mtime = mtime;
        Ok(())
    }

    async fn zero(
        &self,
        oid: &ObjectId,
        _oloc: &ObjectLocator,
        off: u64,
        len: u64,
        _snapc: &SnapContext,
        _mtime: SystemTime,
        _flags: u32,
    ) -> Result<(), OsdError> {
        self.zeroes
            .lock()
            .expect("zeroes lock poisoned")
            .push((oid.clone(), off, len));
        let mut objects = self.objects.lock().expect("objects lock poisoned");
        if let Some(obj) = objects.get_mut(oid) {
            let start = (off as usize).min(obj.data.len());
            let end = ((off + len) as usize).min(obj.data.len());
            obj.data[start..end].fill(0);
        }
        Ok(())
    }

    async fn remove(
        &self,
        oid: &ObjectId,
        _oloc: &ObjectLocator,
        _snapc: &SnapContext,
        _mtime: SystemTime,
        _flags: u32,
    ) -> Result<(), OsdError> {
        let inflight = self.removes_inflight.fetch_add(1, Ordering::SeqCst) + 1;
        self.removes_peak.fetch_max(inflight, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(3)).await;
        self.removes_inflight.fetch_sub(1, Ordering::SeqCst);
        self.removes_attempted.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = self
            .remove_errors
            .lock()
            .expect("remove_errors lock poisoned")
            .get(oid)
        {
            return Err(err.clone());
        }
        match self
            .objects
            .lock()
            .expect("objects lock poisoned")
            .remove(oid)
        {
            Some(_) => Ok(()),
            None => Err(OsdError::NotFound),
        }
    }

    async fn truncate(
        &self,
        oid: &ObjectId,
        _oloc: &ObjectLocator,
        truncate_size: u64,
        truncate_seq: u32,
        _snapc: &SnapContext,
        _mtime: SystemTime,
        _flags: u32,
    ) -> Result<(), OsdError> {
        self.truncates
            .lock()
            .expect("truncates lock poisoned")
            .push((oid.clone(), truncate_size, truncate_seq));
        let mut objects = self.objects.lock().expect("objects lock poisoned");
        if let Some(obj) = objects.get_mut(oid) {
            obj.data.truncate(truncate_size as usize);
        }
        Ok(())
    }
}

fn filer(mock: &Arc<MockObjectClient>) -> Filer {
    Filer::new(mock.clone())
}

fn mtime_at(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

// ---------------------------------------------------------------------------
// Probe
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_probe_empty_file_forward() {
    let mock = MockObjectClient::new();
    let f = filer(&mock);

    let result = f
        .probe(INO, &s1_layout(), SnapId::HEAD, 0, 0, true, false, 0)
        .await
        .unwrap();

    assert_eq!(result.end, 0);
    assert_eq!(
        mock.stats_completed.load(Ordering::SeqCst),
        4,
        "one stat per object of the first window"
    );
}

#[tokio::test]
async fn test_probe_partial_object_forward() {
    // Object 1 holds 1000 bytes; its first stripe unit covers file bytes
    // [4096, 8192), so the logical end is 4096 + 1000.
    let mock = MockObjectClient::new();
    mock.put_object(1, vec![7; 1000], mtime_at(5));
    let f = filer(&mock);

    let result = f
        .probe(INO, &s1_layout(), SnapId::HEAD, 0, 0, true, false, 0)
        .await
        .unwrap();

    assert_eq!(result.end, 5096);
    assert_eq!(mock.stats_completed.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_probe_dense_file_forward() {
    // A densely written 5096-byte file: object 0 full for its first
    // stripe unit, object 1 partial.
    let mock = MockObjectClient::new();
    let f = filer(&mock);
    let l = s1_layout();
    f.write(
        INO,
        &l,
        &SnapContext::default(),
        0,
        Bytes::from(vec![9; 5096]),
        mtime_at(1),
        0,
    )
    .await
    .unwrap();

    let result = f
        .probe(INO, &l, SnapId::HEAD, 0, 0, true, false, 0)
        .await
        .unwrap();
    assert_eq!(result.end, 5096);
}

#[tokio::test]
async fn test_probe_full_period_needs_confirming_window() {
    // Exactly one period of data: the probe sees only full objects in
    // window one and needs the (absent) second window to conclude.
    let mock = MockObjectClient::new();
    let f = filer(&mock);
    let l = s1_layout();
    let period = l.period();
    f.write(
        INO,
        &l,
        &SnapContext::default(),
        0,
        Bytes::from(vec![3; period as usize]),
        mtime_at(1),
        0,
    )
    .await
    .unwrap();

    let result = f
        .probe(INO, &l, SnapId::HEAD, 0, 0, true, false, 0)
        .await
        .unwrap();
    assert_eq!(result.end, period);
    assert_eq!(
        mock.stats_completed.load(Ordering::SeqCst),
        8,
        "two windows of four objects each"
    );
}

#[tokio::test]
async fn test_probe_backward_finds_last_byte() {
    // Single byte at offset 70000 (second object set). Backward probe
    // from well above must return 70001.
    let mock = MockObjectClient::new();
    let f = filer(&mock);
    let l = s1_layout();
    f.write(
        INO,
        &l,
        &SnapContext::default(),
        70000,
        Bytes::from(vec![1u8]),
        mtime_at(2),
        0,
    )
    .await
    .unwrap();

    let result = f
        .probe(INO, &l, SnapId::HEAD, 200_000, 0, false, false, 0)
        .await
        .unwrap();
    assert_eq!(result.end, 70001);
}

#[tokio::test]
async fn test_probe_backward_empty_file() {
    let mock = MockObjectClient::new();
    let f = filer(&mock);
    let l = layout(64, 2, 128);

    let result = f
        .probe(INO, &l, SnapId::HEAD, 1024, 0, false, false, 0)
        .await
        .unwrap();
    assert_eq!(result.end, 0, "no data anywhere probes down to zero");
}

#[tokio::test]
async fn test_probe_backward_requires_start_above_lower_bound() {
    let mock = MockObjectClient::new();
    let f = filer(&mock);

    let err = f
        .probe(INO, &s1_layout(), SnapId::HEAD, 100, 100, false, false, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, FilerError::InvalidProbe { .. }));
}

#[tokio::test]
async fn test_probe_error_latches_after_draining_window() {
    let mock = MockObjectClient::new();
    mock.put_object(0, vec![1; 100], mtime_at(1));
    mock.inject_stat_error(2, OsdError::Failed("disk on fire".into()));
    let f = filer(&mock);

    let err = f
        .probe(INO, &s1_layout(), SnapId::HEAD, 0, 0, true, false, 0)
        .await
        .unwrap_err();

    assert!(matches!(err, FilerError::Osd(OsdError::Failed(_))));
    assert_eq!(
        mock.stats_completed.load(Ordering::SeqCst),
        4,
        "every in-flight stat must complete before the error surfaces"
    );
}

#[tokio::test]
async fn test_probe_backward_mtime_walks_all_windows() {
    // Data in two object sets with different mtimes; the newest must win
    // and the probe must stat both windows.
    let mock = MockObjectClient::new();
    let f = filer(&mock);
    let l = s1_layout();
    f.write(
        INO,
        &l,
        &SnapContext::default(),
        0,
        Bytes::from(vec![1; 100]),
        mtime_at(50),
        0,
    )
    .await
    .unwrap();
    f.write(
        INO,
        &l,
        &SnapContext::default(),
        70000,
        Bytes::from(vec![2u8]),
        mtime_at(20),
        0,
    )
    .await
    .unwrap();

    let result = f
        .probe(INO, &l, SnapId::HEAD, 200_000, 0, false, true, 0)
        .await
        .unwrap();

    assert_eq!(result.end, 70001);
    assert_eq!(result.mtime, Some(mtime_at(50)), "newest mtime wins");
    // One stat for the partial first window, then four per aligned
    // window down to offset zero.
    assert_eq!(mock.stats_completed.load(Ordering::SeqCst), 13);
}

#[tokio::test]
async fn test_probe_forward_mtime_on_found_window() {
    let mock = MockObjectClient::new();
    mock.put_object(1, vec![7; 1000], mtime_at(33));
    let f = filer(&mock);

    let result = f
        .probe(INO, &s1_layout(), SnapId::HEAD, 0, 0, true, true, 0)
        .await
        .unwrap();
    assert_eq!(result.end, 5096);
    assert_eq!(result.mtime, Some(mtime_at(33)));
}

#[tokio::test]
async fn test_probe_forward_mid_period_start_widens_first_window() {
    // Starting mid-period, the first window is rounded up to the next
    // period boundary, so one pass covers the tail of set 0 and nothing
    // else needs a second set of stats for data within it.
    let mock = MockObjectClient::new();
    mock.put_object(0, vec![4; 300], mtime_at(1));
    let f = filer(&mock);
    let l = s1_layout();

    let result = f
        .probe(INO, &l, SnapId::HEAD, 100, 0, true, false, 0)
        .await
        .unwrap();
    assert_eq!(result.end, 300);
    // The widened window [100, 131072) touches both object sets.
    assert_eq!(mock.stats_completed.load(Ordering::SeqCst), 8);
}

// ---------------------------------------------------------------------------
// Purge
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_purge_respects_parallel_cap() {
    let mock = MockObjectClient::new();
    for n in 0..25 {
        mock.put_object(n, vec![1], mtime_at(1));
    }
    let f = filer(&mock);

    f.purge_range(
        INO,
        &s1_layout(),
        &SnapContext::default(),
        0,
        25,
        mtime_at(2),
        0,
    )
    .await
    .unwrap();

    assert_eq!(mock.removes_attempted.load(Ordering::SeqCst), 25);
    assert_eq!(mock.object_count(), 0, "every object removed");
    assert_eq!(
        mock.removes_peak.load(Ordering::SeqCst),
        MAX_PURGE_PARALLEL,
        "the cap must be reached but never exceeded"
    );
}

#[tokio::test]
async fn test_purge_single_object_fast_path() {
    let mock = MockObjectClient::new();
    mock.put_object(7, vec![1], mtime_at(1));
    let f = filer(&mock);

    f.purge_range(
        INO,
        &s1_layout(),
        &SnapContext::default(),
        7,
        1,
        mtime_at(2),
        0,
    )
    .await
    .unwrap();

    assert_eq!(mock.removes_attempted.load(Ordering::SeqCst), 1);
    assert_eq!(mock.object_count(), 0);
}

#[tokio::test]
async fn test_purge_empty_range_is_a_noop() {
    let mock = MockObjectClient::new();
    let f = filer(&mock);
    f.purge_range(
        INO,
        &s1_layout(),
        &SnapContext::default(),
        0,
        0,
        mtime_at(1),
        0,
    )
    .await
    .unwrap();
    assert_eq!(mock.removes_attempted.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_purge_error_reported_after_all_removes() {
    let mock = MockObjectClient::new();
    for n in 0..25 {
        mock.put_object(n, vec![1], mtime_at(1));
    }
    mock.inject_remove_error(3, OsdError::Failed("no quorum".into()));
    let f = filer(&mock);

    let err = f
        .purge_range(
            INO,
            &s1_layout(),
            &SnapContext::default(),
            0,
            25,
            mtime_at(2),
            0,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, FilerError::Osd(OsdError::Failed(_))));
    assert_eq!(
        mock.removes_attempted.load(Ordering::SeqCst),
        25,
        "an early failure must not strand the rest of the range"
    );
}

// ---------------------------------------------------------------------------
// Striped read / write / truncate / zero
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_write_then_read_roundtrip() {
    let mock = MockObjectClient::new();
    let f = filer(&mock);
    let l = layout(64, 2, 128);

    let data: Vec<u8> = (0..=255).cycle().take(1000).collect();
    f.write(
        INO,
        &l,
        &SnapContext::default(),
        100,
        Bytes::from(data.clone()),
        mtime_at(1),
        0,
    )
    .await
    .unwrap();

    let out = f
        .read(INO, &l, SnapId::HEAD, 100, 1000, 0)
        .await
        .unwrap();
    assert_eq!(out.as_ref(), data.as_slice());
}

#[tokio::test]
async fn test_read_zero_fills_interior_hole() {
    // Only the second stripe unit exists: [64, 128). Reading [0, 192)
    // must zero-fill the leading hole and elide the trailing one.
    let mock = MockObjectClient::new();
    let f = filer(&mock);
    let l = layout(64, 2, 128);

    f.write(
        INO,
        &l,
        &SnapContext::default(),
        64,
        Bytes::from(vec![0xab; 64]),
        mtime_at(1),
        0,
    )
    .await
    .unwrap();

    let out = f.read(INO, &l, SnapId::HEAD, 0, 192, 0).await.unwrap();
    assert_eq!(out.len(), 128, "trailing hole elided");
    assert_eq!(&out[..64], &[0u8; 64][..], "leading hole zero-filled");
    assert_eq!(&out[64..128], &[0xab; 64][..]);
}

#[tokio::test]
async fn test_read_of_absent_range_is_empty() {
    let mock = MockObjectClient::new();
    let f = filer(&mock);
    let out = f
        .read(INO, &layout(64, 2, 128), SnapId::HEAD, 0, 512, 0)
        .await
        .unwrap();
    assert!(out.is_empty());
}

#[tokio::test]
async fn test_truncate_sets_per_extent_sizes() {
    let mock = MockObjectClient::new();
    let f = filer(&mock);
    let l = layout(64, 2, 128);

    f.write(
        INO,
        &l,
        &SnapContext::default(),
        0,
        Bytes::from(vec![1; 256]),
        mtime_at(1),
        0,
    )
    .await
    .unwrap();

    // Drop everything from byte 100 on.
    f.truncate(
        INO,
        &l,
        &SnapContext::default(),
        100,
        156,
        1,
        mtime_at(2),
        0,
    )
    .await
    .unwrap();

    let truncates = mock.truncates.lock().unwrap().clone();
    assert_eq!(truncates.len(), 2, "one truncate per touched object");
    for (oid, size, seq) in &truncates {
        assert_eq!(*seq, 1);
        // Each object is cut at the extent's starting offset: object 0
        // keeps its first full stripe unit, object 1 keeps 36 bytes.
        match oid.as_str() {
            "10.00000000" => assert_eq!(*size, 64),
            "10.00000001" => assert_eq!(*size, 36),
            other => panic!("unexpected object {other}"),
        }
    }
}

#[tokio::test]
async fn test_zero_removes_whole_objects_and_zeroes_partials() {
    let mock = MockObjectClient::new();
    let f = filer(&mock);
    let l = layout(64, 2, 128);

    f.write(
        INO,
        &l,
        &SnapContext::default(),
        0,
        Bytes::from(vec![5; 300]),
        mtime_at(1),
        0,
    )
    .await
    .unwrap();

    // [0, 256) covers objects 0 and 1 completely, [256, 300) only part
    // of object 2.
    f.zero(
        INO,
        &l,
        &SnapContext::default(),
        0,
        300,
        mtime_at(2),
        0,
    )
    .await
    .unwrap();

    assert!(mock.object_len(0).is_none(), "object 0 removed");
    assert!(mock.object_len(1).is_none(), "object 1 removed");
    let zeroes = mock.zeroes.lock().unwrap().clone();
    assert_eq!(zeroes.len(), 1);
    assert_eq!(zeroes[0].0.as_str(), "10.00000002");
    assert_eq!((zeroes[0].1, zeroes[0].2), (0, 44));
}

#[tokio::test]
async fn test_read_propagates_non_notfound_errors() {
    #[derive(Default)]
    struct FailingReads(MockObjectClient);

    #[async_trait::async_trait]
    impl ObjectClient for FailingReads {
        async fn stat(
            &self,
            oid: &ObjectId,
            oloc: &ObjectLocator,
            snapid: SnapId,
            flags: u32,
        ) -> Result<ObjectStat, OsdError> {
            self.0.stat(oid, oloc, snapid, flags).await
        }
        async fn read(
            &self,
            _oid: &ObjectId,
            _oloc: &ObjectLocator,
            _off: u64,
            _len: u64,
            _snapid: SnapId,
            _flags: u32,
        ) -> Result<Bytes, OsdError> {
            Err(OsdError::Failed("read timed out".into()))
        }
        async fn write(
            &self,
            oid: &ObjectId,
            oloc: &ObjectLocator,
            off: u64,
            data: Bytes,
            snapc: &SnapContext,
            mtime: SystemTime,
            flags: u32,
        ) -> Result<(), OsdError> {
            self.0.write(oid, oloc, off, data, snapc, mtime, flags).await
        }
        async fn zero(
            &self,
            oid: &ObjectId,
            oloc: &ObjectLocator,
            off: u64,
            len: u64,
            snapc: &SnapContext,
            mtime: SystemTime,
            flags: u32,
        ) -> Result<(), OsdError> {
            self.0.zero(oid, oloc, off, len, snapc, mtime, flags).await
        }
        async fn remove(
            &self,
            oid: &ObjectId,
            oloc: &ObjectLocator,
            snapc: &SnapContext,
            mtime: SystemTime,
            flags: u32,
        ) -> Result<(), OsdError> {
            self.0.remove(oid, oloc, snapc, mtime, flags).await
        }
        async fn truncate(
            &self,
            oid: &ObjectId,
            oloc: &ObjectLocator,
            truncate_size: u64,
            truncate_seq: u32,
            snapc: &SnapContext,
            mtime: SystemTime,
            flags: u32,
        ) -> Result<(), OsdError> {
            self.0
                .truncate(oid, oloc, truncate_size, truncate_seq, snapc, mtime, flags)
                .await
        }
    }

    let f = Filer::new(Arc::new(FailingReads::default()));
    let err = f
        .read(INO, &layout(64, 2, 128), SnapId::HEAD, 0, 100, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, FilerError::Osd(OsdError::Failed(_))));
}
