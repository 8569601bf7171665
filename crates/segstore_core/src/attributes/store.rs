//! Persisted attribute index abstraction.

use super::id::{AttributeId, NULL_ATTRIBUTE_VALUE};
use crate::error::SegmentResult;
use crate::types::SegmentId;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Durable per-segment index of extended attribute values.
///
/// The store is consulted when the cache misses and receives every extended
/// value the engine commits. Calls are synchronous and may block; the engine
/// runs lookups on the blocking pool and never calls the store while holding
/// an async turn for longer than the write-through.
///
/// Implementations must be safe to call concurrently from several segments.
pub trait AttributeStore: Send + Sync {
    /// Returns the stored values among `ids`. Absent ids are omitted.
    fn get(&self, segment: SegmentId, ids: &[AttributeId]) -> SegmentResult<HashMap<AttributeId, i64>>;

    /// Upserts values. A value of [`NULL_ATTRIBUTE_VALUE`] removes the entry.
    fn put(&self, segment: SegmentId, values: &[(AttributeId, i64)]) -> SegmentResult<()>;

    /// Removes every entry of a segment.
    fn remove_segment(&self, segment: SegmentId) -> SegmentResult<()>;

    /// Makes prior writes durable.
    fn flush(&self) -> SegmentResult<()> {
        Ok(())
    }
}

/// Attribute store kept entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryAttributeStore {
    segments: RwLock<HashMap<SegmentId, HashMap<AttributeId, i64>>>,
}

impl InMemoryAttributeStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries stored for a segment.
    #[must_use]
    pub fn len(&self, segment: SegmentId) -> usize {
        self.segments.read().get(&segment).map_or(0, HashMap::len)
    }

    /// Returns true if nothing is stored for any segment.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.read().values().all(HashMap::is_empty)
    }
}

impl AttributeStore for InMemoryAttributeStore {
    fn get(&self, segment: SegmentId, ids: &[AttributeId]) -> SegmentResult<HashMap<AttributeId, i64>> {
        let segments = self.segments.read();
        let Some(values) = segments.get(&segment) else {
            return Ok(HashMap::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| values.get(id).map(|v| (*id, *v)))
            .collect())
    }

    fn put(&self, segment: SegmentId, values: &[(AttributeId, i64)]) -> SegmentResult<()> {
        let mut segments = self.segments.write();
        let entry = segments.entry(segment).or_default();
        for &(id, value) in values {
            if value == NULL_ATTRIBUTE_VALUE {
                entry.remove(&id);
            } else {
                entry.insert(id, value);
            }
        }
        if entry.is_empty() {
            segments.remove(&segment);
        }
        Ok(())
    }

    fn remove_segment(&self, segment: SegmentId) -> SegmentResult<()> {
        self.segments.write().remove(&segment);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_remove() {
        let store = InMemoryAttributeStore::new();
        let seg = SegmentId::new(1);
        let a = AttributeId::from_parts(1, 1);
        let b = AttributeId::from_parts(1, 2);

        store.put(seg, &[(a, 10), (b, 20)]).unwrap();
        let got = store.get(seg, &[a, b, AttributeId::from_parts(1, 3)]).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[&a], 10);

        store.put(seg, &[(a, NULL_ATTRIBUTE_VALUE)]).unwrap();
        assert_eq!(store.len(seg), 1);

        store.remove_segment(seg).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn segments_are_isolated() {
        let store = InMemoryAttributeStore::new();
        let a = AttributeId::from_parts(1, 1);
        store.put(SegmentId::new(1), &[(a, 1)]).unwrap();
        assert!(store.get(SegmentId::new(2), &[a]).unwrap().is_empty());
    }
}
