//! Two-tier attribute resolution.
//!
//! Reads consult the segment's cache first and fall back to the attribute
//! store for extended attributes. Writes are evaluated against the same two
//! tiers, all-or-nothing, inside the segment's critical section.

use super::cache::AttributeCache;
use super::id::{AttributeId, NULL_ATTRIBUTE_VALUE};
use super::store::AttributeStore;
use super::update::AttributeUpdate;
use crate::error::{SegmentError, SegmentResult};
use crate::segment::{SegmentEntry, SegmentMetadata};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{trace, warn};

/// Composes the per-segment cache with the attribute store.
#[derive(Clone)]
pub struct AttributeResolver {
    store: Arc<dyn AttributeStore>,
    max_cached: usize,
}

impl AttributeResolver {
    /// Creates a resolver over `store` keeping at most `max_cached`
    /// extended attributes resident per segment.
    pub fn new(store: Arc<dyn AttributeStore>, max_cached: usize) -> Self {
        Self { store, max_cached }
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn AttributeStore> {
        &self.store
    }

    /// Evaluates a batch against the current values.
    ///
    /// Current values come from the cache; extended attributes missing from
    /// it are fetched from the store only for update types that depend on
    /// the current value. Nothing is modified.
    ///
    /// # Errors
    ///
    /// `AttributeUpdateFailed` for the first update whose condition does not
    /// hold, or a store error.
    pub fn evaluate(
        &self,
        meta: &mut SegmentMetadata,
        updates: &[AttributeUpdate],
    ) -> SegmentResult<Vec<(AttributeId, i64)>> {
        if updates.is_empty() {
            return Ok(Vec::new());
        }

        let lookups: Vec<AttributeId> = updates
            .iter()
            .filter(|u| {
                u.attribute_id.is_extended()
                    && u.update_type.needs_current_value()
                    && !meta.attributes.contains(u.attribute_id)
                    && !meta.unstored.contains_key(&u.attribute_id)
            })
            .map(|u| u.attribute_id)
            .collect();
        let stored = if lookups.is_empty() {
            HashMap::new()
        } else {
            self.store.get(meta.id, &lookups)?
        };

        let mut resolved = Vec::with_capacity(updates.len());
        for update in updates {
            let id = update.attribute_id;
            let current = meta
                .attributes
                .get(id)
                .or_else(|| meta.unstored.get(&id).copied())
                .or_else(|| stored.get(&id).copied())
                .unwrap_or(NULL_ATTRIBUTE_VALUE);
            let value = update
                .evaluate(current)
                .map_err(|reason| SegmentError::attribute_update_failed(&meta.name, id, reason))?;
            resolved.push((id, value));
        }
        Ok(resolved)
    }

    /// Applies resolved values: cache first, then extended values through
    /// to the store. Trims the cache afterwards.
    ///
    /// The values are already committed when this runs, so a store failure
    /// is logged rather than returned. Rejected extended values stay in
    /// `meta.unstored`, where lookups find them, until a later write to the
    /// segment gets them into the store or the next open replays them.
    pub fn apply(&self, meta: &mut SegmentMetadata, resolved: &[(AttributeId, i64)]) {
        let mut extended = false;
        for &(id, value) in resolved {
            meta.attributes.set(id, value);
            if id.is_extended() {
                meta.unstored.insert(id, value);
                extended = true;
            }
        }
        if extended {
            meta.attribute_epoch += 1;
        }
        self.write_through(meta);
        self.trim(&mut meta.attributes);
    }

    /// Writes the segment's unstored values to the store. Returns true if
    /// nothing is left unstored.
    pub fn write_through(&self, meta: &mut SegmentMetadata) -> bool {
        if meta.unstored.is_empty() {
            return true;
        }
        let values: Vec<(AttributeId, i64)> = meta.unstored.iter().map(|(id, v)| (*id, *v)).collect();
        match self.store.put(meta.id, &values) {
            Ok(()) => {
                meta.unstored.clear();
                true
            }
            Err(e) => {
                warn!(
                    segment = %meta.name,
                    unstored = values.len(),
                    error = %e,
                    "attribute write-through failed, keeping values in memory"
                );
                false
            }
        }
    }

    /// Drops least recently used extended attributes beyond the limit.
    pub fn trim(&self, cache: &mut AttributeCache) -> usize {
        cache.trim(self.max_cached)
    }

    /// Resolves `ids` for a segment.
    ///
    /// Core attributes come only from the cache. Extended attributes missing
    /// from the cache are read from the store on the blocking pool, outside
    /// the critical section. With `cache` set and the segment unsealed, the
    /// values read are then inserted where the cache still has no entry. If
    /// the segment's attributes changed while the store was being read, the
    /// store is read again inside the critical section so a stale value is
    /// never cached. Unresolved ids map to [`NULL_ATTRIBUTE_VALUE`].
    ///
    /// # Errors
    ///
    /// `SegmentNotFound` or `SegmentMerged` if the segment cannot be read,
    /// or a store error.
    pub async fn get_attributes(
        &self,
        entry: &SegmentEntry,
        ids: &[AttributeId],
        cache: bool,
    ) -> SegmentResult<HashMap<AttributeId, i64>> {
        let mut result = HashMap::with_capacity(ids.len());
        let mut missing = Vec::new();
        let epoch = {
            let mut meta = entry.lock();
            meta.state.require_readable(entry.name())?;
            for &id in ids {
                let resident = meta.attributes.get(id).or_else(|| meta.unstored.get(&id).copied());
                match resident {
                    Some(value) => {
                        result.insert(id, value);
                    }
                    None if id.is_core() => {
                        result.insert(id, NULL_ATTRIBUTE_VALUE);
                    }
                    None => missing.push(id),
                }
            }
            meta.attribute_epoch
        };
        if missing.is_empty() {
            return Ok(result);
        }

        let fetched = {
            let store = Arc::clone(&self.store);
            let segment = entry.id();
            let ids = missing.clone();
            tokio::task::spawn_blocking(move || store.get(segment, &ids))
                .await
                .map_err(|e| SegmentError::internal(format!("attribute lookup failed: {e}")))??
        };

        let resolved = if cache {
            self.cache_fetched(entry, &missing, fetched, epoch)?
        } else {
            fetched
        };

        for id in missing {
            result.insert(id, resolved.get(&id).copied().unwrap_or(NULL_ATTRIBUTE_VALUE));
        }
        Ok(result)
    }

    /// Inserts store values into the cache where nothing is resident yet.
    /// Returns the values to report for `missing`.
    fn cache_fetched(
        &self,
        entry: &SegmentEntry,
        missing: &[AttributeId],
        fetched: HashMap<AttributeId, i64>,
        epoch: u64,
    ) -> SegmentResult<HashMap<AttributeId, i64>> {
        let mut meta = entry.lock();
        if meta.is_sealed() || meta.state.require_readable(entry.name()).is_err() {
            return Ok(fetched);
        }

        let fetched = if meta.attribute_epoch == epoch {
            fetched
        } else {
            trace!(segment = %entry.name(), "attributes changed during lookup, re-reading");
            self.store.get(meta.id, missing)?
        };

        let mut values = HashMap::with_capacity(missing.len());
        for &id in missing {
            let value = match meta.attributes.peek(id).or_else(|| meta.unstored.get(&id).copied()) {
                Some(resident) => resident,
                None => match fetched.get(&id) {
                    Some(&stored) => {
                        meta.attributes.insert_if_absent(id, stored);
                        stored
                    }
                    None => continue,
                },
            };
            values.insert(id, value);
        }
        self.trim(&mut meta.attributes);
        Ok(values)
    }
}

impl std::fmt::Debug for AttributeResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeResolver")
            .field("max_cached", &self.max_cached)
            .finish_non_exhaustive()
    }
}
