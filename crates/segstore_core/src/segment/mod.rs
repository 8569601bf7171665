//! Segments: metadata, lifecycle and the per-segment entry.
//!
//! Each live segment is one [`SegmentEntry`] in the store's arena. The entry
//! owns everything that must be consistent for the segment:
//!
//! - the metadata behind a synchronous mutex (the critical section),
//! - the ordering sequencer for conditional operations,
//! - the segment bytes,
//! - a watch channel that publishes the tail state to readers.

mod lifecycle;
mod metadata;
mod name;

pub use lifecycle::SegmentState;
pub use metadata::{SegmentMetadata, SegmentProperties};
pub use name::{validate_segment_name, RESERVED_CHARS};

use crate::read::SegmentData;
use crate::sequencer::OrderingSequencer;
use crate::types::SegmentId;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;

/// What readers need to know about a segment's readable range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TailState {
    /// Current length.
    pub length: u64,
    /// Whether the length is final.
    pub sealed: bool,
    /// Lowest readable offset.
    pub truncation_offset: u64,
    /// Whether the segment was merged away.
    pub merged: bool,
    /// Whether the segment was deleted.
    pub deleted: bool,
    /// Bumped on every eviction.
    pub eviction_epoch: u64,
}

impl TailState {
    fn of(meta: &SegmentMetadata) -> Self {
        Self {
            length: meta.length,
            sealed: meta.is_sealed(),
            truncation_offset: meta.truncation_offset,
            merged: meta.merged_into.is_some(),
            deleted: meta.state == SegmentState::Deleted,
            eviction_epoch: meta.eviction_epoch,
        }
    }
}

/// One segment in the arena.
pub struct SegmentEntry {
    id: SegmentId,
    name: String,
    metadata: Mutex<SegmentMetadata>,
    sequencer: OrderingSequencer,
    data: SegmentData,
    tail: watch::Sender<TailState>,
    readers: AtomicUsize,
}

impl SegmentEntry {
    /// Wraps metadata in a new entry with empty data.
    #[must_use]
    pub fn new(metadata: SegmentMetadata) -> Self {
        let (tail, _) = watch::channel(TailState::of(&metadata));
        Self {
            id: metadata.id,
            name: metadata.name.clone(),
            metadata: Mutex::new(metadata),
            sequencer: OrderingSequencer::new(),
            data: SegmentData::new(),
            tail,
            readers: AtomicUsize::new(0),
        }
    }

    /// Segment id.
    #[must_use]
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Segment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enters the critical section.
    pub fn lock(&self) -> MutexGuard<'_, SegmentMetadata> {
        self.metadata.lock()
    }

    /// The ordering sequencer.
    #[must_use]
    pub fn sequencer(&self) -> &OrderingSequencer {
        &self.sequencer
    }

    /// The segment bytes.
    #[must_use]
    pub fn data(&self) -> &SegmentData {
        &self.data
    }

    /// Publishes the readable range described by `meta` to readers.
    pub fn publish(&self, meta: &SegmentMetadata) {
        self.tail.send_replace(TailState::of(meta));
    }

    /// Subscribes to tail changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TailState> {
        self.tail.subscribe()
    }

    /// Most recently published tail.
    #[must_use]
    pub fn tail(&self) -> TailState {
        *self.tail.borrow()
    }

    pub(crate) fn reader_opened(&self) {
        self.readers.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn reader_closed(&self) {
        self.readers.fetch_sub(1, Ordering::SeqCst);
    }

    /// Number of open [`crate::ReadResult`]s on this segment.
    #[must_use]
    pub fn open_readers(&self) -> usize {
        self.readers.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for SegmentEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentEntry")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("tail", &self.tail())
            .finish_non_exhaustive()
    }
}
