//! Per-segment metadata record.

use super::lifecycle::SegmentState;
use crate::attributes::{AttributeCache, AttributeId};
use crate::types::SegmentId;
use serde::Serialize;
use std::collections::HashMap;
use std::time::SystemTime;

/// Mutable state of one segment.
///
/// Guarded by the segment's critical section. The attribute cache inside is
/// the only record of which attributes are resident.
#[derive(Debug)]
pub struct SegmentMetadata {
    /// Segment name.
    pub name: String,
    /// Stable id.
    pub id: SegmentId,
    /// Lifecycle state.
    pub state: SegmentState,
    /// Total bytes ever appended, including merged-in bytes.
    pub length: u64,
    /// Lowest readable offset.
    pub truncation_offset: u64,
    /// Target segment once merged.
    pub merged_into: Option<SegmentId>,
    /// Resident attributes.
    pub attributes: AttributeCache,
    /// Committed extended values the attribute store has not accepted yet.
    /// Consulted before the store and retried on every later write.
    pub unstored: HashMap<AttributeId, i64>,
    /// Bumped whenever extended attributes change or are evicted.
    pub attribute_epoch: u64,
    /// Bumped whenever the segment is evicted.
    pub eviction_epoch: u64,
    /// Time of the last committed change.
    pub last_modified: SystemTime,
}

impl SegmentMetadata {
    /// Creates metadata for a segment that is being created.
    #[must_use]
    pub fn new(id: SegmentId, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id,
            state: SegmentState::Creating,
            length: 0,
            truncation_offset: 0,
            merged_into: None,
            attributes: AttributeCache::new(),
            unstored: HashMap::new(),
            attribute_epoch: 0,
            eviction_epoch: 0,
            last_modified: SystemTime::now(),
        }
    }

    /// Records a committed change.
    pub fn touch(&mut self) {
        self.last_modified = SystemTime::now();
    }

    /// Returns true if the length can no longer grow.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.state.is_sealed()
    }

    /// Takes a snapshot of the publicly visible state.
    #[must_use]
    pub fn properties(&self) -> SegmentProperties {
        SegmentProperties {
            name: self.name.clone(),
            id: self.id,
            length: self.length,
            sealed: self.is_sealed(),
            merged: self.merged_into.is_some(),
            deleted: false,
            truncation_offset: self.truncation_offset,
            last_modified: self.last_modified,
            attributes: self.attributes.snapshot(),
        }
    }
}

/// Immutable snapshot of a segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentProperties {
    /// Segment name.
    pub name: String,
    /// Stable id.
    pub id: SegmentId,
    /// Length in bytes.
    pub length: u64,
    /// Whether the segment is sealed.
    pub sealed: bool,
    /// Whether the segment was merged into another.
    pub merged: bool,
    /// Always false for snapshots handed to callers.
    pub deleted: bool,
    /// Lowest readable offset.
    pub truncation_offset: u64,
    /// Time of the last committed change.
    pub last_modified: SystemTime,
    /// Resident attributes only. Evicted extended attributes are omitted.
    pub attributes: HashMap<AttributeId, i64>,
}

impl SegmentProperties {
    /// Returns a resident attribute value.
    #[must_use]
    pub fn attribute(&self, id: AttributeId) -> Option<i64> {
        self.attributes.get(&id).copied()
    }
}
