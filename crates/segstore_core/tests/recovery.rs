//! Reopening stores and replaying the journal.

use bytes::Bytes;
use segstore_core::{
    AttributeId, AttributeUpdate, InMemoryAttributeStore, LogRecord, OperationLog, SegmentError, SegmentId,
    SegmentStore, StoreConfig, NULL_ATTRIBUTE_VALUE,
};
use segstore_core::dir::ATTRIBUTES_FILE;
use segstore_storage::InMemoryBackend;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(5);

fn attr(n: u64) -> AttributeId {
    AttributeId::from_parts(0x3000, n)
}

async fn read_all(store: &SegmentStore, name: &str) -> Vec<u8> {
    let info = store.get_stream_segment_info(name, true, TIMEOUT).unwrap().await.unwrap();
    let readable = info.length - info.truncation_offset;
    if readable == 0 {
        return Vec::new();
    }
    let mut read = store
        .read(name, info.truncation_offset, readable, TIMEOUT)
        .unwrap()
        .await
        .unwrap();
    read.read_to_end().await.unwrap().to_vec()
}

async fn populate(path: &Path) {
    let store = SegmentStore::open(path).unwrap();
    store
        .create_stream_segment("orders", vec![AttributeUpdate::replace(attr(1), 1)], TIMEOUT)
        .unwrap()
        .await
        .unwrap();
    store.create_stream_segment("batch", vec![], TIMEOUT).unwrap().await.unwrap();
    store.create_stream_segment("scratch", vec![], TIMEOUT).unwrap().await.unwrap();

    store
        .append_at(
            "orders",
            0,
            Bytes::from_static(b"first-"),
            vec![AttributeUpdate::accumulate(AttributeId::EVENT_COUNT, 1)],
            TIMEOUT,
        )
        .unwrap()
        .await
        .unwrap();
    store
        .append(
            "orders",
            Bytes::from_static(b"second-"),
            vec![
                AttributeUpdate::accumulate(AttributeId::EVENT_COUNT, 1),
                AttributeUpdate::accumulate(attr(1), 10),
            ],
            TIMEOUT,
        )
        .unwrap()
        .await
        .unwrap();
    store
        .append("batch", Bytes::from_static(b"merged"), vec![], TIMEOUT)
        .unwrap()
        .await
        .unwrap();
    store.seal_stream_segment("batch", TIMEOUT).unwrap().await.unwrap();
    store
        .merge_stream_segment("orders", "batch", TIMEOUT)
        .unwrap()
        .await
        .unwrap();
    store.truncate_stream_segment("orders", 6, TIMEOUT).unwrap().await.unwrap();
    store
        .update_attributes("orders", vec![AttributeUpdate::replace(attr(2), 7)], TIMEOUT)
        .unwrap()
        .await
        .unwrap();
    store.delete_stream_segment("scratch", TIMEOUT).unwrap().await.unwrap();
    store.shutdown().unwrap();
}

async fn check_populated(store: &SegmentStore) {
    assert_eq!(store.segment_names(), vec!["batch".to_string(), "orders".to_string()]);

    let info = store.get_stream_segment_info("orders", true, TIMEOUT).unwrap().await.unwrap();
    assert_eq!(info.length, 19);
    assert_eq!(info.truncation_offset, 6);
    assert!(!info.sealed);
    assert_eq!(read_all(store, "orders").await, b"second-merged");

    let values = store
        .get_attributes("orders", vec![AttributeId::EVENT_COUNT, attr(1), attr(2), attr(3)], false, TIMEOUT)
        .unwrap()
        .await
        .unwrap();
    assert_eq!(values[&AttributeId::EVENT_COUNT], 2);
    assert_eq!(values[&attr(1)], 11);
    assert_eq!(values[&attr(2)], 7);
    assert_eq!(values[&attr(3)], NULL_ATTRIBUTE_VALUE);

    let batch = store.get_stream_segment_info("batch", false, TIMEOUT).unwrap().await.unwrap();
    assert!(batch.merged);
}

#[tokio::test]
async fn reopen_restores_every_operation() {
    let dir = TempDir::new().unwrap();
    populate(dir.path()).await;

    let store = SegmentStore::open(dir.path()).unwrap();
    check_populated(&store).await;

    // Writes continue where the journal left off.
    store
        .append_at("orders", 19, Bytes::from_static(b"!"), vec![], TIMEOUT)
        .unwrap()
        .await
        .unwrap();
    store.create_stream_segment("scratch", vec![], TIMEOUT).unwrap().await.unwrap();
    let scratch = store.get_stream_segment_info("scratch", false, TIMEOUT).unwrap().await.unwrap();
    let orders = store.get_stream_segment_info("orders", false, TIMEOUT).unwrap().await.unwrap();
    assert!(scratch.id > orders.id);
    assert!(scratch.attribute(AttributeId::CREATION_TIME).is_some());
}

#[tokio::test]
async fn second_replay_is_stable() {
    let dir = TempDir::new().unwrap();
    populate(dir.path()).await;
    drop(SegmentStore::open(dir.path()).unwrap());

    let store = SegmentStore::open(dir.path()).unwrap();
    check_populated(&store).await;
}

#[tokio::test]
async fn idle_reopen_leaves_attribute_index_alone() {
    let dir = TempDir::new().unwrap();
    populate(dir.path()).await;
    {
        let store = SegmentStore::open(dir.path()).unwrap();
        for n in 0..50 {
            store
                .update_attributes("orders", vec![AttributeUpdate::replace(attr(2), n)], TIMEOUT)
                .unwrap()
                .await
                .unwrap();
        }
        store.shutdown().unwrap();
    }

    let index = dir.path().join(ATTRIBUTES_FILE);
    let written = std::fs::metadata(&index).unwrap().len();
    for _ in 0..3 {
        let store = SegmentStore::open(dir.path()).unwrap();
        let values = store
            .get_attributes("orders", vec![attr(1), attr(2)], false, TIMEOUT)
            .unwrap()
            .await
            .unwrap();
        assert_eq!(values[&attr(1)], 11);
        assert_eq!(values[&attr(2)], 49);
        store.shutdown().unwrap();
        drop(store);
        assert_eq!(std::fs::metadata(&index).unwrap().len(), written);
    }
}

#[tokio::test]
async fn open_directory_is_locked() {
    let dir = TempDir::new().unwrap();
    let store = SegmentStore::open(dir.path()).unwrap();

    let err = SegmentStore::open(dir.path()).unwrap_err();
    assert!(matches!(err, SegmentError::StoreLocked { .. }));
    assert!(err.is_retryable());

    drop(store);
    SegmentStore::open(dir.path()).unwrap();
}

#[tokio::test]
async fn torn_journal_tail_is_discarded() {
    let dir = TempDir::new().unwrap();
    populate(dir.path()).await;

    let journal = dir.path().join("journal.log");
    let intact = std::fs::metadata(&journal).unwrap().len();
    {
        let mut file = OpenOptions::new().append(true).open(&journal).unwrap();
        file.write_all(b"SSLG\x01\x00\x02\xff\x00").unwrap();
    }

    let store = SegmentStore::open(dir.path()).unwrap();
    check_populated(&store).await;
    assert_eq!(std::fs::metadata(&journal).unwrap().len(), intact);
}

#[tokio::test]
async fn damaged_journal_record_fails_open() {
    let dir = TempDir::new().unwrap();
    populate(dir.path()).await;

    let journal = dir.path().join("journal.log");
    let mut bytes = std::fs::read(&journal).unwrap();
    // Inside the first record's payload.
    bytes[14] ^= 0xff;
    std::fs::write(&journal, &bytes).unwrap();

    let err = SegmentStore::open(dir.path()).unwrap_err();
    assert!(matches!(
        err,
        SegmentError::ChecksumMismatch { .. } | SegmentError::JournalCorruption { .. }
    ));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn inconsistent_journal_is_rejected() {
    let frames = [
        LogRecord::CreateSegment {
            segment_id: SegmentId::new(1),
            name: "s".to_string(),
            attributes: vec![],
        },
        LogRecord::Append {
            segment_id: SegmentId::new(1),
            offset: 4,
            data: b"gap".to_vec(),
            attributes: vec![],
        },
    ];
    let mut bytes = Vec::new();
    for record in &frames {
        bytes.extend(OperationLog::frame(record).unwrap());
    }

    let err = SegmentStore::open_with_backends(
        StoreConfig::default(),
        Box::new(InMemoryBackend::with_data(bytes)),
        Arc::new(InMemoryAttributeStore::new()),
    )
    .unwrap_err();
    assert!(matches!(err, SegmentError::JournalCorruption { .. }));
}

#[tokio::test]
async fn replay_from_prebuilt_journal() {
    let records = [
        LogRecord::CreateSegment {
            segment_id: SegmentId::new(3),
            name: "s".to_string(),
            attributes: vec![(AttributeId::CREATION_TIME, 100), (attr(1), 9)],
        },
        LogRecord::Append {
            segment_id: SegmentId::new(3),
            offset: 0,
            data: b"abc".to_vec(),
            attributes: vec![(AttributeId::EVENT_COUNT, 1)],
        },
        LogRecord::Seal {
            segment_id: SegmentId::new(3),
            length: 3,
        },
    ];
    let mut bytes = Vec::new();
    for record in &records {
        bytes.extend(OperationLog::frame(record).unwrap());
    }

    let attributes = Arc::new(InMemoryAttributeStore::new());
    let store = SegmentStore::open_with_backends(
        StoreConfig::default(),
        Box::new(InMemoryBackend::with_data(bytes)),
        Arc::clone(&attributes) as Arc<dyn segstore_core::AttributeStore>,
    )
    .unwrap();

    let info = store.get_stream_segment_info("s", false, TIMEOUT).unwrap().await.unwrap();
    assert_eq!(info.id, SegmentId::new(3));
    assert_eq!(info.length, 3);
    assert!(info.sealed);
    assert_eq!(info.attribute(AttributeId::CREATION_TIME), Some(100));
    assert_eq!(info.attribute(AttributeId::EVENT_COUNT), Some(1));
    // Extended values are restored to the attribute store, not the cache.
    assert_eq!(info.attribute(attr(1)), None);
    assert_eq!(attributes.len(SegmentId::new(3)), 1);

    store.create_stream_segment("t", vec![], TIMEOUT).unwrap().await.unwrap();
    let t = store.get_stream_segment_info("t", false, TIMEOUT).unwrap().await.unwrap();
    assert_eq!(t.id, SegmentId::new(4));
}
