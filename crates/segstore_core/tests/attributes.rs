//! Attribute updates, lookups and caching.

use bytes::Bytes;
use segstore_core::{
    AttributeId, AttributeStore, AttributeUpdate, AttributeUpdateType, InMemoryAttributeStore, SegmentError,
    SegmentStore, StoreConfig, NULL_ATTRIBUTE_VALUE,
};
use segstore_storage::InMemoryBackend;
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

fn attr(n: u64) -> AttributeId {
    AttributeId::from_parts(0x2000, n)
}

async fn get(store: &SegmentStore, name: &str, id: AttributeId, cache: bool) -> i64 {
    store
        .get_attributes(name, vec![id], cache, TIMEOUT)
        .unwrap()
        .await
        .unwrap()[&id]
}

#[tokio::test]
async fn accumulate_adds_to_current_value() {
    let store = SegmentStore::open_in_memory().unwrap();
    store.create_stream_segment("S", vec![], TIMEOUT).unwrap().await.unwrap();
    let a = attr(1);

    store
        .update_attributes("S", vec![AttributeUpdate::accumulate(a, 3)], TIMEOUT)
        .unwrap()
        .await
        .unwrap();
    assert_eq!(get(&store, "S", a, false).await, 3);

    store
        .update_attributes("S", vec![AttributeUpdate::accumulate(a, 3)], TIMEOUT)
        .unwrap()
        .await
        .unwrap();
    assert_eq!(get(&store, "S", a, false).await, 6);
}

#[tokio::test]
async fn unset_attributes_read_as_null() {
    let store = SegmentStore::open_in_memory().unwrap();
    store.create_stream_segment("S", vec![], TIMEOUT).unwrap().await.unwrap();

    let ids = vec![attr(7), attr(8), AttributeId::EVENT_COUNT];
    let values = store.get_attributes("S", ids.clone(), true, TIMEOUT).unwrap().await.unwrap();
    assert_eq!(values.len(), 3);
    for id in ids {
        assert_eq!(values[&id], NULL_ATTRIBUTE_VALUE);
    }
}

#[tokio::test]
async fn conditional_update_types() {
    let store = SegmentStore::open_in_memory().unwrap();
    store.create_stream_segment("S", vec![], TIMEOUT).unwrap().await.unwrap();
    let a = attr(1);
    let b = attr(2);

    store
        .update_attributes("S", vec![AttributeUpdate::replace(a, 10)], TIMEOUT)
        .unwrap()
        .await
        .unwrap();

    let lower = AttributeUpdate::new(a, AttributeUpdateType::ReplaceIfGreater, 5);
    let err = store.update_attributes("S", vec![lower], TIMEOUT).unwrap().await.unwrap_err();
    assert!(matches!(err, SegmentError::AttributeUpdateFailed { .. }));

    let higher = AttributeUpdate::new(a, AttributeUpdateType::ReplaceIfGreater, 11);
    store.update_attributes("S", vec![higher], TIMEOUT).unwrap().await.unwrap();
    assert_eq!(get(&store, "S", a, false).await, 11);

    store
        .update_attributes("S", vec![AttributeUpdate::replace_if_equals(a, 20, 11)], TIMEOUT)
        .unwrap()
        .await
        .unwrap();
    assert_eq!(get(&store, "S", a, false).await, 20);

    // ReplaceIfEquals against NULL succeeds only on an unset attribute.
    store
        .update_attributes("S", vec![AttributeUpdate::replace_if_equals(b, 1, NULL_ATTRIBUTE_VALUE)], TIMEOUT)
        .unwrap()
        .await
        .unwrap();
    let err = store
        .update_attributes("S", vec![AttributeUpdate::replace_if_equals(b, 2, NULL_ATTRIBUTE_VALUE)], TIMEOUT)
        .unwrap()
        .await
        .unwrap_err();
    assert!(matches!(err, SegmentError::AttributeUpdateFailed { .. }));

    let once = AttributeUpdate::new(attr(3), AttributeUpdateType::SetOnce, 1);
    store.update_attributes("S", vec![once], TIMEOUT).unwrap().await.unwrap();
    let err = store.update_attributes("S", vec![once], TIMEOUT).unwrap().await.unwrap_err();
    assert!(matches!(err, SegmentError::AttributeUpdateFailed { .. }));
}

#[tokio::test]
async fn batch_is_all_or_nothing() {
    let store = SegmentStore::open_in_memory().unwrap();
    store.create_stream_segment("S", vec![], TIMEOUT).unwrap().await.unwrap();
    let batch = vec![
        AttributeUpdate::replace(attr(1), 100),
        AttributeUpdate::replace_if_equals(attr(2), 1, 42),
    ];
    let err = store.update_attributes("S", batch, TIMEOUT).unwrap().await.unwrap_err();
    assert!(matches!(err, SegmentError::AttributeUpdateFailed { .. }));
    assert_eq!(get(&store, "S", attr(1), false).await, NULL_ATTRIBUTE_VALUE);
}

#[tokio::test]
async fn append_updates_core_and_extended_attributes() {
    let store = SegmentStore::open_in_memory().unwrap();
    store.create_stream_segment("S", vec![], TIMEOUT).unwrap().await.unwrap();
    for _ in 0..3 {
        store
            .append(
                "S",
                Bytes::from_static(b"event"),
                vec![
                    AttributeUpdate::accumulate(AttributeId::EVENT_COUNT, 1),
                    AttributeUpdate::accumulate(attr(9), 2),
                ],
                TIMEOUT,
            )
            .unwrap()
            .await
            .unwrap();
    }
    // Accumulate on an unset value starts from zero.
    assert_eq!(get(&store, "S", AttributeId::EVENT_COUNT, false).await, 3);
    assert_eq!(get(&store, "S", attr(9), false).await, 6);
}

#[tokio::test]
async fn extended_values_survive_cache_trimming() {
    let store = SegmentStore::open_in_memory_with_config(StoreConfig::new().max_cached_attributes(2)).unwrap();
    store.create_stream_segment("S", vec![], TIMEOUT).unwrap().await.unwrap();

    let updates: Vec<_> = (0..10).map(|i| AttributeUpdate::replace(attr(i), i as i64 * 10)).collect();
    store.update_attributes("S", updates, TIMEOUT).unwrap().await.unwrap();

    let info = store.get_stream_segment_info("S", true, TIMEOUT).unwrap().await.unwrap();
    let resident_extended = info.attributes.keys().filter(|id| id.is_extended()).count();
    assert!(resident_extended <= 2);

    let ids: Vec<_> = (0..10).map(attr).collect();
    let values = store.get_attributes("S", ids, false, TIMEOUT).unwrap().await.unwrap();
    for i in 0..10 {
        assert_eq!(values[&attr(i)], i as i64 * 10);
    }
}

#[tokio::test]
async fn cached_lookup_populates_resident_set() {
    let attributes = Arc::new(InMemoryAttributeStore::new());
    let store = SegmentStore::open_with_backends(
        StoreConfig::default(),
        Box::new(InMemoryBackend::new()),
        Arc::clone(&attributes) as Arc<dyn AttributeStore>,
    )
    .unwrap();
    store.create_stream_segment("S", vec![], TIMEOUT).unwrap().await.unwrap();
    store
        .update_attributes("S", vec![AttributeUpdate::replace(attr(1), 5)], TIMEOUT)
        .unwrap()
        .await
        .unwrap();
    let id = store.get_stream_segment_info("S", false, TIMEOUT).unwrap().await.unwrap().id;
    assert_eq!(attributes.len(id), 1);
    assert_eq!(store.evict_segment("S").unwrap(), 1);

    assert_eq!(get(&store, "S", attr(1), false).await, 5);
    let info = store.get_stream_segment_info("S", false, TIMEOUT).unwrap().await.unwrap();
    assert_eq!(info.attribute(attr(1)), None);

    assert_eq!(get(&store, "S", attr(1), true).await, 5);
    let info = store.get_stream_segment_info("S", false, TIMEOUT).unwrap().await.unwrap();
    assert_eq!(info.attribute(attr(1)), Some(5));
}

#[tokio::test]
async fn sealed_segment_lookups_are_not_cached() {
    let store = SegmentStore::open_in_memory().unwrap();
    store.create_stream_segment("S", vec![], TIMEOUT).unwrap().await.unwrap();
    store
        .update_attributes("S", vec![AttributeUpdate::replace(attr(1), 5)], TIMEOUT)
        .unwrap()
        .await
        .unwrap();
    store.seal_stream_segment("S", TIMEOUT).unwrap().await.unwrap();
    store.evict_segment("S").unwrap();

    assert_eq!(get(&store, "S", attr(1), true).await, 5);
    let info = store.get_stream_segment_info("S", false, TIMEOUT).unwrap().await.unwrap();
    assert_eq!(info.attribute(attr(1)), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cached_lookups_agree_with_updates() {
    let store = SegmentStore::open_in_memory().unwrap();
    store.create_stream_segment("S", vec![], TIMEOUT).unwrap().await.unwrap();
    let a = attr(1);
    store
        .update_attributes("S", vec![AttributeUpdate::replace(a, 0)], TIMEOUT)
        .unwrap()
        .await
        .unwrap();

    for round in 1..=20i64 {
        store.evict_segment("S").unwrap();
        let lookups: Vec<_> = (0..4)
            .map(|_| store.get_attributes("S", vec![a], true, TIMEOUT).unwrap())
            .collect();
        let update = store
            .update_attributes("S", vec![AttributeUpdate::replace(a, round)], TIMEOUT)
            .unwrap();
        for lookup in lookups {
            let value = lookup.await.unwrap()[&a];
            assert!(value == round - 1 || value == round);
        }
        update.await.unwrap();

        let info = store.get_stream_segment_info("S", true, TIMEOUT).unwrap().await.unwrap();
        if let Some(cached) = info.attribute(a) {
            assert_eq!(cached, round);
        }
        assert_eq!(get(&store, "S", a, false).await, round);
    }
}

#[tokio::test]
async fn attributes_of_merged_source_are_gone() {
    let store = SegmentStore::open_in_memory().unwrap();
    store.create_stream_segment("target", vec![], TIMEOUT).unwrap().await.unwrap();
    store
        .create_stream_segment("source", vec![AttributeUpdate::replace(attr(1), 1)], TIMEOUT)
        .unwrap()
        .await
        .unwrap();
    store.seal_stream_segment("source", TIMEOUT).unwrap().await.unwrap();
    store
        .merge_stream_segment("target", "source", TIMEOUT)
        .unwrap()
        .await
        .unwrap();

    let err = store
        .get_attributes("source", vec![attr(1)], false, TIMEOUT)
        .unwrap()
        .await
        .unwrap_err();
    assert!(matches!(err, SegmentError::SegmentMerged { .. }));
    assert_eq!(get(&store, "target", attr(1), false).await, NULL_ATTRIBUTE_VALUE);
}
