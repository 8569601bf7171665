//! Reads, tailing and read cancellation.

use bytes::Bytes;
use segstore_core::{ArgumentError, ReadResult, SegmentError, SegmentStore, StoreConfig};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);
const SHORT: Duration = Duration::from_millis(50);

async fn store_with(name: &str, content: &'static [u8]) -> SegmentStore {
    let store = SegmentStore::open_in_memory().unwrap();
    store.create_stream_segment(name, vec![], TIMEOUT).unwrap().await.unwrap();
    if !content.is_empty() {
        store
            .append(name, Bytes::from_static(content), vec![], TIMEOUT)
            .unwrap()
            .await
            .unwrap();
    }
    store
}

async fn open(store: &SegmentStore, name: &str, offset: u64, max: u64) -> ReadResult {
    store.read(name, offset, max, TIMEOUT).unwrap().await.unwrap()
}

async fn next_err(read: &mut ReadResult) -> SegmentError {
    tokio::time::timeout(TIMEOUT, read.next())
        .await
        .expect("read should fail promptly")
        .expect("read should yield an item")
        .unwrap_err()
}

#[tokio::test]
async fn reads_are_chunked_and_bounded() {
    let store = SegmentStore::open_in_memory_with_config(StoreConfig::new().read_chunk_size(4)).unwrap();
    store.create_stream_segment("s", vec![], TIMEOUT).unwrap().await.unwrap();
    store
        .append("s", Bytes::from_static(b"abcdefghij"), vec![], TIMEOUT)
        .unwrap()
        .await
        .unwrap();

    let mut read = open(&store, "s", 1, 7).await;
    let mut chunks = Vec::new();
    while let Some(chunk) = read.next().await {
        chunks.push(chunk.unwrap());
    }
    assert_eq!(chunks, vec![Bytes::from_static(b"bcde"), Bytes::from_static(b"fgh")]);
    assert!(read.is_done());
    assert_eq!(read.position(), 8);
    assert_eq!(read.remaining(), 0);
}

#[tokio::test]
async fn read_on_sealed_segment_stops_at_end() {
    let store = store_with("s", b"hello").await;
    store.seal_stream_segment("s", TIMEOUT).unwrap().await.unwrap();

    let mut read = open(&store, "s", 2, 100).await;
    assert_eq!(&read.read_to_end().await.unwrap()[..], b"llo");

    let mut at_end = open(&store, "s", 5, 10).await;
    assert!(at_end.next().await.is_none());

    let err = store.read("s", 6, 1, TIMEOUT).unwrap().await.unwrap_err();
    assert!(matches!(err, SegmentError::BadOffset { offset: 6, .. }));
}

#[tokio::test]
async fn tail_read_waits_for_appends() {
    let store = store_with("s", b"").await;
    let mut read = open(&store, "s", 0, 6).await;
    assert!(tokio::time::timeout(SHORT, read.next()).await.is_err());

    store
        .append("s", Bytes::from_static(b"abc"), vec![], TIMEOUT)
        .unwrap()
        .await
        .unwrap();
    let first = tokio::time::timeout(TIMEOUT, read.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(&first[..], b"abc");

    let writer = store.clone();
    tokio::spawn(async move {
        tokio::time::sleep(SHORT).await;
        writer
            .append("s", Bytes::from_static(b"defg"), vec![], TIMEOUT)
            .unwrap()
            .await
            .unwrap();
    });
    let rest = tokio::time::timeout(TIMEOUT, read.read_to_end()).await.unwrap().unwrap();
    assert_eq!(&rest[..], b"def");
}

#[tokio::test]
async fn tail_read_ends_when_segment_is_sealed() {
    let store = store_with("s", b"ab").await;
    let mut read = open(&store, "s", 0, 100).await;
    assert_eq!(&read.next().await.unwrap().unwrap()[..], b"ab");

    store.seal_stream_segment("s", TIMEOUT).unwrap().await.unwrap();
    let end = tokio::time::timeout(TIMEOUT, read.next()).await.unwrap();
    assert!(end.is_none());
}

#[tokio::test]
async fn delete_fails_blocked_reader() {
    let store = store_with("s", b"").await;
    let mut read = open(&store, "s", 0, 10).await;
    store.delete_stream_segment("s", TIMEOUT).unwrap().await.unwrap();
    assert!(matches!(next_err(&mut read).await, SegmentError::SegmentNotFound { .. }));
    assert!(read.next().await.is_none());
}

#[tokio::test]
async fn merge_fails_reader_of_source() {
    let store = store_with("source", b"payload").await;
    store.create_stream_segment("target", vec![], TIMEOUT).unwrap().await.unwrap();
    store.seal_stream_segment("source", TIMEOUT).unwrap().await.unwrap();

    let mut read = open(&store, "source", 0, 100).await;
    store
        .merge_stream_segment("target", "source", TIMEOUT)
        .unwrap()
        .await
        .unwrap();
    assert!(matches!(next_err(&mut read).await, SegmentError::SegmentMerged { .. }));
}

#[tokio::test]
async fn truncation_fails_reader_behind_it() {
    let store = store_with("s", b"0123456789").await;
    let mut read = open(&store, "s", 0, 100).await;
    store.truncate_stream_segment("s", 5, TIMEOUT).unwrap().await.unwrap();
    assert!(matches!(
        next_err(&mut read).await,
        SegmentError::SegmentTruncated { offset: 0, truncation_offset: 5, .. }
    ));
}

#[tokio::test]
async fn eviction_cancels_open_reads() {
    let store = store_with("s", b"").await;
    let mut read = open(&store, "s", 0, 10).await;
    store.evict_segment("s").unwrap();

    let err = next_err(&mut read).await;
    assert!(matches!(err, SegmentError::Cancelled { .. }));
    assert!(err.is_retryable());

    // New reads after eviction proceed normally.
    store
        .append("s", Bytes::from_static(b"x"), vec![], TIMEOUT)
        .unwrap()
        .await
        .unwrap();
    let mut fresh = open(&store, "s", 0, 1).await;
    assert_eq!(&fresh.read_to_end().await.unwrap()[..], b"x");
}

#[tokio::test]
async fn shutdown_cancels_open_reads() {
    let store = store_with("s", b"").await;
    let mut read = open(&store, "s", 0, 10).await;
    store.shutdown().unwrap();
    assert!(matches!(next_err(&mut read).await, SegmentError::Cancelled { .. }));

    let err = store.read("s", 0, 1, TIMEOUT).unwrap().await.unwrap_err();
    assert!(matches!(err, SegmentError::StoreClosed));
}

#[tokio::test]
async fn read_arguments_are_checked_before_scheduling() {
    let store = store_with("s", b"abc").await;
    assert!(matches!(store.read("s", 0, 0, TIMEOUT), Err(ArgumentError::ZeroReadLength)));
    assert!(matches!(store.read("s", 0, 1, Duration::ZERO), Err(ArgumentError::ZeroTimeout)));
    assert!(matches!(
        store.read("s", (i64::MAX as u64) + 1, 1, TIMEOUT),
        Err(ArgumentError::OffsetOutOfRange { .. })
    ));
}
