//! Test fixtures and store helpers.
//!
//! Provides convenience functions for setting up test stores and common
//! test scenarios. Everything here must run inside a Tokio runtime.

use bytes::Bytes;
use segstore_core::{AttributeUpdate, SegmentProperties, SegmentStore, StoreConfig};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

/// Timeout used by fixture helpers.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A test store with automatic cleanup.
pub struct TestStore {
    store: Option<SegmentStore>,
    config: StoreConfig,
    temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates a new in-memory test store.
    pub fn memory() -> Self {
        Self::memory_with_config(StoreConfig::default())
    }

    /// Creates an in-memory test store with the given configuration.
    pub fn memory_with_config(config: StoreConfig) -> Self {
        Self {
            store: Some(
                SegmentStore::open_in_memory_with_config(config.clone())
                    .expect("Failed to open in-memory store"),
            ),
            config,
            temp_dir: None,
        }
    }

    /// Creates a new file-backed test store in a temporary directory.
    pub fn file() -> Self {
        Self::file_with_config(StoreConfig::default())
    }

    /// Creates a file-backed test store with the given configuration.
    pub fn file_with_config(config: StoreConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = SegmentStore::open_with_config(temp_dir.path(), config.clone())
            .expect("Failed to open file store");
        Self {
            store: Some(store),
            config,
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the store directory if file-backed, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(TempDir::path)
    }

    /// Closes the store and opens it again from its directory, replaying
    /// the journal.
    ///
    /// Every operation handle must have been awaited first, or the
    /// directory lock may still be held.
    pub fn reopen(&mut self) {
        let path = self
            .path()
            .expect("Only file-backed stores can be reopened")
            .to_path_buf();
        if let Some(store) = self.store.take() {
            store.shutdown().expect("Failed to shut down store");
        }
        self.store = Some(
            SegmentStore::open_with_config(&path, self.config.clone()).expect("Failed to reopen store"),
        );
    }

    /// Creates a segment with no initial attributes.
    pub async fn create(&self, name: &str) {
        self.create_stream_segment(name, vec![], TEST_TIMEOUT)
            .expect("Invalid create arguments")
            .await
            .expect("Failed to create segment");
    }

    /// Appends `data` unconditionally.
    pub async fn append_bytes(&self, name: &str, data: &[u8]) {
        self.append(name, Bytes::copy_from_slice(data), vec![], TEST_TIMEOUT)
            .expect("Invalid append arguments")
            .await
            .expect("Failed to append");
    }

    /// Applies attribute updates.
    pub async fn update(&self, name: &str, updates: Vec<AttributeUpdate>) {
        self.update_attributes(name, updates, TEST_TIMEOUT)
            .expect("Invalid update arguments")
            .await
            .expect("Failed to update attributes");
    }

    /// Returns segment properties after pending operations complete.
    pub async fn info(&self, name: &str) -> SegmentProperties {
        self.get_stream_segment_info(name, true, TEST_TIMEOUT)
            .expect("Invalid info arguments")
            .await
            .expect("Failed to get segment info")
    }

    /// Reads every byte between the truncation offset and the current end.
    pub async fn read_all(&self, name: &str) -> Vec<u8> {
        let info = self.info(name).await;
        let readable = info.length - info.truncation_offset;
        if readable == 0 {
            return Vec::new();
        }
        let mut read = self
            .read(name, info.truncation_offset, readable, TEST_TIMEOUT)
            .expect("Invalid read arguments")
            .await
            .expect("Failed to open read");
        read.read_to_end().await.expect("Failed to read").to_vec()
    }
}

impl std::ops::Deref for TestStore {
    type Target = SegmentStore;

    fn deref(&self) -> &Self::Target {
        self.store.as_ref().expect("Store is open")
    }
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use segstore_core::AttributeId;

    /// Name of the `index`th segment created by the scenarios.
    pub fn segment_name(index: usize) -> String {
        format!("scope/stream/{index}")
    }

    /// Creates a store with `segments` segments, each holding `appends`
    /// appends of `payload_size` bytes and an event count attribute.
    pub async fn populated_store(segments: usize, appends: usize, payload_size: usize) -> TestStore {
        let store = TestStore::memory();
        populate(&store, segments, appends, payload_size).await;
        store
    }

    /// Fills `store` the way [`populated_store`] does.
    pub async fn populate(store: &TestStore, segments: usize, appends: usize, payload_size: usize) {
        for s in 0..segments {
            let name = segment_name(s);
            store.create(&name).await;
            for a in 0..appends {
                let payload = Bytes::from(vec![(a % 256) as u8; payload_size]);
                store
                    .append(
                        &name,
                        payload,
                        vec![AttributeUpdate::accumulate(AttributeId::EVENT_COUNT, 1)],
                        TEST_TIMEOUT,
                    )
                    .expect("Invalid append arguments")
                    .await
                    .expect("Failed to append");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use segstore_core::AttributeId;

    #[tokio::test]
    async fn memory_store_is_usable() {
        let store = TestStore::memory();
        assert!(store.path().is_none());
        store.create("s").await;
        store.append_bytes("s", b"abc").await;
        assert_eq!(store.read_all("s").await, b"abc");
    }

    #[tokio::test]
    async fn file_store_reopens() {
        let mut store = TestStore::file();
        store.create("s").await;
        store.append_bytes("s", b"persisted").await;
        store.reopen();
        assert_eq!(store.info("s").await.length, 9);
        assert_eq!(store.read_all("s").await, b"persisted");
    }

    #[tokio::test]
    async fn populated_scenario() {
        let store = scenarios::populated_store(3, 4, 8).await;
        assert_eq!(store.segment_names().len(), 3);
        let info = store.info(&scenarios::segment_name(2)).await;
        assert_eq!(info.length, 32);
        assert_eq!(info.attribute(AttributeId::EVENT_COUNT), Some(4));
    }
}
