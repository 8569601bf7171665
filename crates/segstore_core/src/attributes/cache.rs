//! Resident attribute tier.
//!
//! Core attributes are kept for the life of the segment. Extended attributes
//! are bounded by least-recent use; dropping one from the cache never loses
//! it because every extended value is also written to the attribute store.

use super::id::{AttributeId, NULL_ATTRIBUTE_VALUE};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
struct CachedValue {
    value: i64,
    last_used: u64,
}

/// Per-segment attribute cache.
#[derive(Debug, Default)]
pub struct AttributeCache {
    core: HashMap<AttributeId, i64>,
    extended: HashMap<AttributeId, CachedValue>,
    clock: u64,
}

impl AttributeCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Looks up a resident value and marks it as recently used.
    pub fn get(&mut self, id: AttributeId) -> Option<i64> {
        if id.is_core() {
            return self.core.get(&id).copied();
        }
        let now = self.tick();
        self.extended.get_mut(&id).map(|entry| {
            entry.last_used = now;
            entry.value
        })
    }

    /// Looks up a resident value without touching recency.
    #[must_use]
    pub fn peek(&self, id: AttributeId) -> Option<i64> {
        if id.is_core() {
            self.core.get(&id).copied()
        } else {
            self.extended.get(&id).map(|entry| entry.value)
        }
    }

    /// Returns true if the attribute is resident.
    #[must_use]
    pub fn contains(&self, id: AttributeId) -> bool {
        self.peek(id).is_some()
    }

    /// Stores a value. [`NULL_ATTRIBUTE_VALUE`] removes the entry.
    pub fn set(&mut self, id: AttributeId, value: i64) {
        if value == NULL_ATTRIBUTE_VALUE {
            self.remove(id);
            return;
        }
        if id.is_core() {
            self.core.insert(id, value);
        } else {
            let now = self.tick();
            self.extended.insert(id, CachedValue { value, last_used: now });
        }
    }

    /// Inserts a value only if nothing is resident for `id`.
    ///
    /// Returns true if the value was inserted.
    pub fn insert_if_absent(&mut self, id: AttributeId, value: i64) -> bool {
        if value == NULL_ATTRIBUTE_VALUE || self.contains(id) {
            return false;
        }
        self.set(id, value);
        true
    }

    /// Removes an entry.
    pub fn remove(&mut self, id: AttributeId) {
        if id.is_core() {
            self.core.remove(&id);
        } else {
            self.extended.remove(&id);
        }
    }

    /// Drops least recently used extended entries until at most `max` remain.
    ///
    /// Returns the number of entries dropped.
    pub fn trim(&mut self, max: usize) -> usize {
        let excess = self.extended.len().saturating_sub(max);
        if excess == 0 {
            return 0;
        }
        let mut by_age: Vec<(u64, AttributeId)> = self
            .extended
            .iter()
            .map(|(id, entry)| (entry.last_used, *id))
            .collect();
        by_age.sort_unstable();
        for (_, id) in by_age.into_iter().take(excess) {
            self.extended.remove(&id);
        }
        excess
    }

    /// Drops every extended entry. Core values stay.
    pub fn clear_extended(&mut self) -> usize {
        let count = self.extended.len();
        self.extended.clear();
        count
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        self.core.clear();
        self.extended.clear();
    }

    /// Number of resident extended entries.
    #[must_use]
    pub fn extended_len(&self) -> usize {
        self.extended.len()
    }

    /// Returns every resident value.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<AttributeId, i64> {
        self.core
            .iter()
            .map(|(id, v)| (*id, *v))
            .chain(self.extended.iter().map(|(id, e)| (*id, e.value)))
            .collect()
    }
}
