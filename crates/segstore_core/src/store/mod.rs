//! The segment store engine.
//!
//! [`SegmentStore`] is a cheap, cloneable handle. Every operation validates
//! its arguments synchronously, registers itself as pending on the segments
//! it touches, and runs as a task on the runtime the store was opened on.
//! The returned [`OpHandle`] resolves to the operation's result.

mod ops;
mod recovery;

use crate::attributes::{
    AttributeId, AttributeResolver, AttributeStore, AttributeUpdate, InMemoryAttributeStore,
    PersistentAttributeStore,
};
use crate::config::StoreConfig;
use crate::dir::StoreDir;
use crate::error::{ArgumentError, SegmentError, SegmentResult};
use crate::handle::OpHandle;
use crate::journal::OperationLog;
use crate::pending::{PendingGuard, PendingOps};
use crate::read::ReadResult;
use crate::segment::{validate_segment_name, SegmentEntry, SegmentProperties};
use crate::types::SegmentId;
use bytes::Bytes;
use parking_lot::RwLock;
use segstore_storage::{FileBackend, InMemoryBackend, StorageBackend};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{info, warn};

pub use recovery::RecoveryStats;

/// Shared engine state.
pub(crate) struct StoreInner {
    config: StoreConfig,
    _dir: Option<StoreDir>,
    names: RwLock<HashMap<String, SegmentId>>,
    segments: RwLock<HashMap<SegmentId, Arc<SegmentEntry>>>,
    next_segment_id: AtomicU64,
    journal: OperationLog,
    resolver: AttributeResolver,
    pending: Arc<PendingOps>,
    runtime: Handle,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
}

/// Handle to an open segment store.
#[derive(Clone)]
pub struct SegmentStore {
    inner: Arc<StoreInner>,
}

impl SegmentStore {
    /// Opens a store with everything kept in memory.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails if no runtime is available.
    pub fn open_in_memory() -> SegmentResult<Self> {
        Self::open_in_memory_with_config(StoreConfig::default())
    }

    /// Opens an in-memory store with the given configuration.
    ///
    /// # Errors
    ///
    /// Fails if no runtime is available.
    pub fn open_in_memory_with_config(config: StoreConfig) -> SegmentResult<Self> {
        Self::open_with_backends(
            config,
            Box::new(InMemoryBackend::new()),
            Arc::new(InMemoryAttributeStore::new()),
        )
    }

    /// Opens a store over caller-supplied backends, replaying the journal.
    ///
    /// # Errors
    ///
    /// Fails if no runtime is available or the journal is corrupted.
    pub fn open_with_backends(
        config: StoreConfig,
        journal: Box<dyn StorageBackend>,
        attributes: Arc<dyn AttributeStore>,
    ) -> SegmentResult<Self> {
        Self::open_inner(config, journal, attributes, None)
    }

    /// Opens or creates a file-backed store in `path`.
    ///
    /// # Errors
    ///
    /// Fails if the directory is locked by another process, on I/O errors,
    /// or if the journal or attribute index is corrupted.
    pub fn open(path: &Path) -> SegmentResult<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Opens or creates a file-backed store with the given configuration.
    ///
    /// # Errors
    ///
    /// As [`SegmentStore::open`].
    pub fn open_with_config(path: &Path, config: StoreConfig) -> SegmentResult<Self> {
        let dir = StoreDir::open(path, true)?;
        let journal = FileBackend::open(&dir.journal_path())?;
        let attributes = PersistentAttributeStore::open(
            Box::new(FileBackend::open(&dir.attributes_path())?),
            config.sync_on_commit,
        )?;
        Self::open_inner(config, Box::new(journal), Arc::new(attributes), Some(dir))
    }

    fn open_inner(
        config: StoreConfig,
        journal: Box<dyn StorageBackend>,
        attributes: Arc<dyn AttributeStore>,
        dir: Option<StoreDir>,
    ) -> SegmentResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| SegmentError::internal(format!("segment store needs a tokio runtime: {e}")))?;
        let (shutdown, _) = watch::channel(false);
        let inner = StoreInner {
            journal: OperationLog::new(journal, config.sync_on_commit),
            resolver: AttributeResolver::new(attributes, config.max_cached_attributes),
            config,
            _dir: dir,
            names: RwLock::new(HashMap::new()),
            segments: RwLock::new(HashMap::new()),
            next_segment_id: AtomicU64::new(1),
            pending: Arc::new(PendingOps::new()),
            runtime,
            shutdown,
            closed: AtomicBool::new(false),
        };

        let stats = inner.replay()?;
        info!(
            records = stats.records,
            segments = stats.segments,
            truncated_bytes = stats.truncated_bytes,
            repaired_attributes = stats.repaired_attributes,
            "segment store opened"
        );
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// The store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    fn validate_name(&self, name: &str) -> Result<(), ArgumentError> {
        validate_segment_name(name, self.inner.config.max_segment_name_length)
    }

    fn validate_updates(updates: &[AttributeUpdate]) -> Result<(), ArgumentError> {
        let mut seen = HashSet::with_capacity(updates.len());
        for update in updates {
            if !seen.insert(update.attribute_id) {
                return Err(ArgumentError::DuplicateAttribute {
                    attribute_id: update.attribute_id,
                });
            }
        }
        Ok(())
    }

    fn validate_offset(offset: u64) -> Result<(), ArgumentError> {
        if offset > i64::MAX as u64 {
            return Err(ArgumentError::OffsetOutOfRange { offset });
        }
        Ok(())
    }

    fn validate_timeout(timeout: Duration) -> Result<(), ArgumentError> {
        if timeout.is_zero() {
            return Err(ArgumentError::ZeroTimeout);
        }
        Ok(())
    }

    fn validate_append(&self, data: &Bytes, updates: &[AttributeUpdate]) -> Result<(), ArgumentError> {
        if data.len() > self.inner.config.max_append_length {
            return Err(ArgumentError::AppendTooLarge {
                len: data.len(),
                max: self.inner.config.max_append_length,
            });
        }
        Self::validate_updates(updates)
    }

    /// Registers the operation on `names` and runs it as a task bounded by
    /// `timeout`.
    fn spawn<T, F, Fut>(&self, names: &[&str], operation: &'static str, timeout: Duration, f: F) -> OpHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<StoreInner>) -> Fut,
        Fut: Future<Output = SegmentResult<T>> + Send + 'static,
    {
        let guards: Vec<PendingGuard> = names.iter().map(|n| self.inner.pending.register(n)).collect();
        let fut = f(Arc::clone(&self.inner));
        let task = self.inner.runtime.spawn(async move {
            let _guards = guards;
            match tokio::time::timeout(timeout, fut).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(operation, ?timeout, "operation timed out");
                    Err(SegmentError::Timeout { operation, timeout })
                }
            }
        });
        OpHandle::new(operation, task)
    }

    /// Appends `data` at the end of the segment, with attribute updates
    /// committed atomically alongside it.
    ///
    /// # Errors
    ///
    /// Synchronously for an invalid name, zero timeout, oversized payload or
    /// duplicate attribute ids.
    pub fn append(
        &self,
        name: &str,
        data: Bytes,
        updates: Vec<AttributeUpdate>,
        timeout: Duration,
    ) -> Result<OpHandle<()>, ArgumentError> {
        self.validate_name(name)?;
        Self::validate_timeout(timeout)?;
        self.validate_append(&data, &updates)?;
        let owned = name.to_string();
        Ok(self.spawn(&[name], "append", timeout, move |inner| async move {
            inner.append(owned, data, updates, None).await
        }))
    }

    /// Appends `data` only if the segment length equals `offset` when the
    /// append commits.
    ///
    /// # Errors
    ///
    /// As [`SegmentStore::append`], plus an out-of-range offset.
    pub fn append_at(
        &self,
        name: &str,
        offset: u64,
        data: Bytes,
        updates: Vec<AttributeUpdate>,
        timeout: Duration,
    ) -> Result<OpHandle<()>, ArgumentError> {
        self.validate_name(name)?;
        Self::validate_timeout(timeout)?;
        Self::validate_offset(offset)?;
        self.validate_append(&data, &updates)?;
        let owned = name.to_string();
        Ok(self.spawn(&[name], "append", timeout, move |inner| async move {
            inner.append(owned, data, updates, Some(offset)).await
        }))
    }

    /// Applies an attribute batch atomically.
    ///
    /// # Errors
    ///
    /// Synchronously for an invalid name, zero timeout or duplicate ids.
    pub fn update_attributes(
        &self,
        name: &str,
        updates: Vec<AttributeUpdate>,
        timeout: Duration,
    ) -> Result<OpHandle<()>, ArgumentError> {
        self.validate_name(name)?;
        Self::validate_timeout(timeout)?;
        Self::validate_updates(&updates)?;
        let owned = name.to_string();
        Ok(self.spawn(&[name], "update_attributes", timeout, move |inner| async move {
            inner.update_attributes(owned, updates)
        }))
    }

    /// Reads attribute values. Absent attributes map to
    /// [`crate::NULL_ATTRIBUTE_VALUE`]. With `cache` set, values read from
    /// the store are kept resident unless the segment is sealed.
    ///
    /// # Errors
    ///
    /// Synchronously for an invalid name or zero timeout.
    pub fn get_attributes(
        &self,
        name: &str,
        ids: Vec<AttributeId>,
        cache: bool,
        timeout: Duration,
    ) -> Result<OpHandle<HashMap<AttributeId, i64>>, ArgumentError> {
        self.validate_name(name)?;
        Self::validate_timeout(timeout)?;
        let owned = name.to_string();
        Ok(self.spawn(&[name], "get_attributes", timeout, move |inner| async move {
            inner.get_attributes(owned, ids, cache).await
        }))
    }

    /// Opens a read of up to `max_length` bytes starting at `offset`.
    ///
    /// `offset` may lie past the current end of an unsealed segment; the
    /// read then waits for data.
    ///
    /// # Errors
    ///
    /// Synchronously for an invalid name, zero timeout, zero `max_length`
    /// or an out-of-range offset.
    pub fn read(
        &self,
        name: &str,
        offset: u64,
        max_length: u64,
        timeout: Duration,
    ) -> Result<OpHandle<ReadResult>, ArgumentError> {
        self.validate_name(name)?;
        Self::validate_timeout(timeout)?;
        Self::validate_offset(offset)?;
        if max_length == 0 {
            return Err(ArgumentError::ZeroReadLength);
        }
        let owned = name.to_string();
        Ok(self.spawn(&[name], "read", timeout, move |inner| async move {
            inner.read(owned, offset, max_length)
        }))
    }

    /// Returns a snapshot of the segment. With `wait_for_pending_ops`, first
    /// waits for every operation on the segment accepted before this call.
    ///
    /// # Errors
    ///
    /// Synchronously for an invalid name or zero timeout.
    pub fn get_stream_segment_info(
        &self,
        name: &str,
        wait_for_pending_ops: bool,
        timeout: Duration,
    ) -> Result<OpHandle<SegmentProperties>, ArgumentError> {
        self.validate_name(name)?;
        Self::validate_timeout(timeout)?;
        let barrier = self.inner.pending.barrier();
        let owned = name.to_string();
        Ok(self.spawn(&[name], "get_stream_segment_info", timeout, move |inner| async move {
            if wait_for_pending_ops {
                inner.pending.wait_for(&owned, barrier).await;
            }
            inner.info(&owned)
        }))
    }

    /// Creates a segment with initial attributes.
    ///
    /// # Errors
    ///
    /// Synchronously for an invalid name, zero timeout or duplicate ids.
    pub fn create_stream_segment(
        &self,
        name: &str,
        updates: Vec<AttributeUpdate>,
        timeout: Duration,
    ) -> Result<OpHandle<()>, ArgumentError> {
        self.validate_name(name)?;
        Self::validate_timeout(timeout)?;
        Self::validate_updates(&updates)?;
        let owned = name.to_string();
        Ok(self.spawn(&[name], "create_stream_segment", timeout, move |inner| async move {
            inner.create(owned, updates)
        }))
    }

    /// Merges the sealed `source` onto the end of `target`. Resolves to the
    /// source's properties at merge time.
    ///
    /// # Errors
    ///
    /// Synchronously for invalid names, zero timeout, or `source == target`.
    pub fn merge_stream_segment(
        &self,
        target: &str,
        source: &str,
        timeout: Duration,
    ) -> Result<OpHandle<SegmentProperties>, ArgumentError> {
        self.validate_name(target)?;
        self.validate_name(source)?;
        Self::validate_timeout(timeout)?;
        if target == source {
            return Err(ArgumentError::SelfMerge {
                name: target.to_string(),
            });
        }
        let (target_owned, source_owned) = (target.to_string(), source.to_string());
        Ok(self.spawn(&[target, source], "merge_stream_segment", timeout, move |inner| async move {
            inner.merge(target_owned, source_owned).await
        }))
    }

    /// Seals the segment. Resolves to its final length.
    ///
    /// # Errors
    ///
    /// Synchronously for an invalid name or zero timeout.
    pub fn seal_stream_segment(&self, name: &str, timeout: Duration) -> Result<OpHandle<u64>, ArgumentError> {
        self.validate_name(name)?;
        Self::validate_timeout(timeout)?;
        let owned = name.to_string();
        Ok(self.spawn(&[name], "seal_stream_segment", timeout, move |inner| async move {
            inner.seal(owned).await
        }))
    }

    /// Deletes the segment and frees its name.
    ///
    /// # Errors
    ///
    /// Synchronously for an invalid name or zero timeout.
    pub fn delete_stream_segment(&self, name: &str, timeout: Duration) -> Result<OpHandle<()>, ArgumentError> {
        self.validate_name(name)?;
        Self::validate_timeout(timeout)?;
        let owned = name.to_string();
        Ok(self.spawn(&[name], "delete_stream_segment", timeout, move |inner| async move {
            inner.delete(owned).await
        }))
    }

    /// Raises the truncation offset to `offset`.
    ///
    /// Truncation is logical: reads below the offset fail, but the bytes stay
    /// in memory until the segment is deleted or merged away. The journal is
    /// never compacted, so they also remain on disk.
    ///
    /// # Errors
    ///
    /// Synchronously for an invalid name, zero timeout or an out-of-range
    /// offset.
    pub fn truncate_stream_segment(
        &self,
        name: &str,
        offset: u64,
        timeout: Duration,
    ) -> Result<OpHandle<()>, ArgumentError> {
        self.validate_name(name)?;
        Self::validate_timeout(timeout)?;
        Self::validate_offset(offset)?;
        let owned = name.to_string();
        Ok(self.spawn(&[name], "truncate_stream_segment", timeout, move |inner| async move {
            inner.truncate(owned, offset).await
        }))
    }

    /// Drops the segment's cached extended attributes and cancels its open
    /// reads. Returns how many attributes were dropped from memory.
    ///
    /// # Errors
    ///
    /// `SegmentNotFound` if no live segment has this name.
    pub fn evict_segment(&self, name: &str) -> SegmentResult<usize> {
        self.inner.evict(name)
    }

    /// Names of all segments, including merged ones not yet deleted.
    #[must_use]
    pub fn segment_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.names.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of in-flight operations on `name`.
    #[must_use]
    pub fn pending_operations(&self, name: &str) -> usize {
        self.inner.pending.pending(name)
    }

    /// Returns true once [`SegmentStore::shutdown`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Closes the store. Open reads fail with `Cancelled`, later operations
    /// with `StoreClosed`. Attribute values the store rejected earlier are
    /// retried, then the journal and attribute index are flushed.
    ///
    /// # Errors
    ///
    /// Flush failures.
    pub fn shutdown(&self) -> SegmentResult<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.shutdown.send_replace(true);
        let unstored = self
            .inner
            .segments
            .read()
            .values()
            .filter(|entry| !self.inner.resolver.write_through(&mut entry.lock()))
            .count();
        if unstored > 0 {
            warn!(segments = unstored, "attribute values left for replay to store");
        }
        self.inner.journal.flush()?;
        self.inner.resolver.store().flush()?;
        info!(segments = self.inner.names.read().len(), "segment store shut down");
        Ok(())
    }
}

impl std::fmt::Debug for SegmentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentStore")
            .field("segments", &self.inner.names.read().len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
