//! Attribute store failures after an operation is journaled.

use bytes::Bytes;
use segstore_core::{
    AttributeId, AttributeStore, AttributeUpdate, InMemoryAttributeStore, SegmentError, SegmentId, SegmentResult,
    SegmentStore, StoreConfig,
};
use segstore_storage::FileBackend;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(5);

fn attr(n: u64) -> AttributeId {
    AttributeId::from_parts(0x5000, n)
}

/// In-memory attribute store whose writes can be switched to fail.
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryAttributeStore,
    failing: AtomicBool,
}

impl FlakyStore {
    fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> SegmentResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SegmentError::internal("disk full"));
        }
        Ok(())
    }
}

impl AttributeStore for FlakyStore {
    fn get(&self, segment: SegmentId, ids: &[AttributeId]) -> SegmentResult<HashMap<AttributeId, i64>> {
        self.inner.get(segment, ids)
    }

    fn put(&self, segment: SegmentId, values: &[(AttributeId, i64)]) -> SegmentResult<()> {
        self.check()?;
        self.inner.put(segment, values)
    }

    fn remove_segment(&self, segment: SegmentId) -> SegmentResult<()> {
        self.check()?;
        self.inner.remove_segment(segment)
    }
}

fn open(journal: &Path, attributes: Arc<FlakyStore>) -> SegmentStore {
    SegmentStore::open_with_backends(
        StoreConfig::default(),
        Box::new(FileBackend::open(journal).unwrap()),
        attributes,
    )
    .unwrap()
}

async fn get(store: &SegmentStore, name: &str, id: AttributeId) -> i64 {
    store
        .get_attributes(name, vec![id], false, TIMEOUT)
        .unwrap()
        .await
        .unwrap()[&id]
}

#[tokio::test]
async fn append_commits_when_store_write_fails() {
    let dir = TempDir::new().unwrap();
    let attributes = Arc::new(FlakyStore::default());
    let store = open(&dir.path().join("journal.log"), attributes.clone());
    store.create_stream_segment("s", vec![], TIMEOUT).unwrap().await.unwrap();
    let id = store.get_stream_segment_info("s", false, TIMEOUT).unwrap().await.unwrap().id;

    let mut read = store.read("s", 0, 3, TIMEOUT).unwrap().await.unwrap();
    let reader = tokio::spawn(async move { read.read_to_end().await });

    attributes.fail_writes(true);
    store
        .append("s", Bytes::from_static(b"abc"), vec![AttributeUpdate::replace(attr(1), 5)], TIMEOUT)
        .unwrap()
        .await
        .unwrap();

    let bytes = tokio::time::timeout(TIMEOUT, reader).await.unwrap().unwrap().unwrap();
    assert_eq!(&bytes[..], b"abc");
    let info = store.get_stream_segment_info("s", false, TIMEOUT).unwrap().await.unwrap();
    assert_eq!(info.length, 3);
    assert_eq!(attributes.inner.len(id), 0);

    // Values the store rejected are still served and still evaluated
    // against, even after the cache lets go of them.
    store.evict_segment("s").unwrap();
    assert_eq!(get(&store, "s", attr(1)).await, 5);
    store
        .update_attributes("s", vec![AttributeUpdate::accumulate(attr(1), 1)], TIMEOUT)
        .unwrap()
        .await
        .unwrap();
    assert_eq!(get(&store, "s", attr(1)).await, 6);

    attributes.fail_writes(false);
    store
        .append("s", Bytes::from_static(b"d"), vec![], TIMEOUT)
        .unwrap()
        .await
        .unwrap();
    assert_eq!(attributes.inner.get(id, &[attr(1)]).unwrap()[&attr(1)], 6);
}

#[tokio::test]
async fn create_commits_once_when_store_write_fails() {
    let dir = TempDir::new().unwrap();
    let journal = dir.path().join("journal.log");
    let attributes = Arc::new(FlakyStore::default());
    let store = open(&journal, attributes.clone());

    attributes.fail_writes(true);
    store
        .create_stream_segment("s", vec![AttributeUpdate::replace(attr(2), 9)], TIMEOUT)
        .unwrap()
        .await
        .unwrap();
    let err = store.create_stream_segment("s", vec![], TIMEOUT).unwrap().await.unwrap_err();
    assert!(matches!(err, SegmentError::SegmentExists { .. }));
    assert_eq!(get(&store, "s", attr(2)).await, 9);
    let id = store.get_stream_segment_info("s", false, TIMEOUT).unwrap().await.unwrap().id;
    store.shutdown().unwrap();
    drop(store);

    // Replay writes the lost value into a working store.
    let fresh = Arc::new(FlakyStore::default());
    let store = open(&journal, fresh.clone());
    assert_eq!(store.segment_names(), vec!["s".to_string()]);
    assert_eq!(fresh.inner.len(id), 1);
    assert_eq!(get(&store, "s", attr(2)).await, 9);
}

#[tokio::test]
async fn merge_completes_when_store_cleanup_fails() {
    let dir = TempDir::new().unwrap();
    let journal = dir.path().join("journal.log");
    let attributes = Arc::new(FlakyStore::default());
    let store = open(&journal, attributes.clone());

    store.create_stream_segment("target", vec![], TIMEOUT).unwrap().await.unwrap();
    store
        .create_stream_segment("source", vec![AttributeUpdate::replace(attr(3), 1)], TIMEOUT)
        .unwrap()
        .await
        .unwrap();
    store
        .append("source", Bytes::from_static(b"xyz"), vec![], TIMEOUT)
        .unwrap()
        .await
        .unwrap();
    store.seal_stream_segment("source", TIMEOUT).unwrap().await.unwrap();
    let source_id = store.get_stream_segment_info("source", false, TIMEOUT).unwrap().await.unwrap().id;
    assert_eq!(attributes.inner.len(source_id), 1);

    attributes.fail_writes(true);
    let merged = store
        .merge_stream_segment("target", "source", TIMEOUT)
        .unwrap()
        .await
        .unwrap();
    assert!(merged.merged);
    assert_eq!(merged.length, 3);
    let target = store.get_stream_segment_info("target", false, TIMEOUT).unwrap().await.unwrap();
    assert_eq!(target.length, 3);
    let err = store
        .get_attributes("source", vec![attr(3)], false, TIMEOUT)
        .unwrap()
        .await
        .unwrap_err();
    assert!(matches!(err, SegmentError::SegmentMerged { .. }));
    assert_eq!(attributes.inner.len(source_id), 1);
    store.shutdown().unwrap();
    drop(store);

    // The leftover entries of the merged source go on the next open.
    attributes.fail_writes(false);
    let store = open(&journal, attributes.clone());
    assert_eq!(attributes.inner.len(source_id), 0);
    let mut read = store.read("target", 0, 3, TIMEOUT).unwrap().await.unwrap();
    assert_eq!(&read.read_to_end().await.unwrap()[..], b"xyz");
}
