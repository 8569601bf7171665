//! Journal replay on open.

use super::StoreInner;
use crate::attributes::{AttributeId, NULL_ATTRIBUTE_VALUE};
use crate::error::{SegmentError, SegmentResult};
use crate::journal::LogRecord;
use crate::segment::{SegmentEntry, SegmentMetadata, SegmentState};
use crate::types::SegmentId;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of a journal replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Records replayed.
    pub records: u64,
    /// Segments alive after replay.
    pub segments: usize,
    /// Bytes of torn tail cut off the journal.
    pub truncated_bytes: u64,
    /// Extended attribute values rewritten to the attribute store.
    pub repaired_attributes: usize,
}

/// Extended attribute state collected while replaying.
#[derive(Default)]
struct ReplayedAttributes {
    /// Final value per live segment, NULL for removed.
    live: HashMap<SegmentId, HashMap<AttributeId, i64>>,
    /// Segments merged away or deleted.
    released: HashSet<SegmentId>,
}

impl StoreInner {
    /// Rebuilds segment state from the journal.
    ///
    /// Core attributes are restored to the cache. Extended attributes are
    /// not cached; once the whole journal is read, the attribute store is
    /// reconciled with their final values, so an idle reopen writes nothing.
    pub(super) fn replay(&self) -> SegmentResult<RecoveryStats> {
        let mut stats = RecoveryStats::default();
        let mut attributes = ReplayedAttributes::default();

        let (end, size) = {
            let mut iter = self.journal.iter()?;
            for item in iter.by_ref() {
                let (offset, record) = item?;
                self.replay_record(&record, &mut attributes).map_err(|e| match e {
                    SegmentError::JournalCorruption { message } => {
                        SegmentError::journal_corruption(format!("record at offset {offset}: {message}"))
                    }
                    other => other,
                })?;
                stats.records += 1;
            }
            (iter.position(), iter.total_size())
        };

        if end < size {
            warn!(
                journal_size = size,
                valid_end = end,
                "discarding torn journal tail"
            );
            self.journal.truncate(end)?;
            stats.truncated_bytes = size - end;
        }

        stats.repaired_attributes = self.reconcile_attributes(attributes)?;

        let segments = self.segments.read();
        for entry in segments.values() {
            let meta = entry.lock();
            entry.publish(&meta);
        }
        stats.segments = self.names.read().len();
        Ok(stats)
    }

    fn replayed_entry(&self, id: SegmentId) -> SegmentResult<Arc<SegmentEntry>> {
        self.segments
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| SegmentError::journal_corruption(format!("unknown segment {id}")))
    }

    fn replay_attributes(
        meta: &mut SegmentMetadata,
        values: &[(AttributeId, i64)],
        attributes: &mut ReplayedAttributes,
    ) {
        for &(id, value) in values {
            if id.is_core() {
                meta.attributes.set(id, value);
            } else {
                attributes.live.entry(meta.id).or_default().insert(id, value);
            }
        }
    }

    /// Brings the attribute store in line with the replayed journal.
    /// Returns the number of values rewritten.
    fn reconcile_attributes(&self, attributes: ReplayedAttributes) -> SegmentResult<usize> {
        let store = self.resolver.store();
        for id in &attributes.released {
            store.remove_segment(*id)?;
        }

        let mut repaired = 0;
        for (segment, values) in attributes.live {
            let ids: Vec<AttributeId> = values.keys().copied().collect();
            let current = store.get(segment, &ids)?;
            let stale: Vec<(AttributeId, i64)> = values
                .into_iter()
                .filter(|(id, value)| current.get(id).copied().unwrap_or(NULL_ATTRIBUTE_VALUE) != *value)
                .collect();
            if !stale.is_empty() {
                debug!(segment = %segment, values = stale.len(), "repairing attribute store");
                store.put(segment, &stale)?;
                repaired += stale.len();
            }
        }
        if repaired > 0 {
            warn!(values = repaired, "attribute store was behind the journal");
        }
        Ok(repaired)
    }

    fn replay_record(&self, record: &LogRecord, attributes: &mut ReplayedAttributes) -> SegmentResult<()> {
        match record {
            LogRecord::CreateSegment {
                segment_id,
                name,
                attributes: values,
            } => {
                let mut names = self.names.write();
                if names.contains_key(name) {
                    return Err(SegmentError::journal_corruption(format!(
                        "segment {name} created twice"
                    )));
                }
                let mut meta = SegmentMetadata::new(*segment_id, name.as_str());
                meta.state = SegmentState::Active;
                Self::replay_attributes(&mut meta, values, attributes);
                self.segments
                    .write()
                    .insert(*segment_id, Arc::new(SegmentEntry::new(meta)));
                names.insert(name.clone(), *segment_id);
                self.next_segment_id
                    .fetch_max(segment_id.as_u64() + 1, Ordering::SeqCst);
                debug!(segment = %name, id = %segment_id, "replayed create");
            }
            LogRecord::Append {
                segment_id,
                offset,
                data,
                attributes: values,
            } => {
                let entry = self.replayed_entry(*segment_id)?;
                let mut meta = entry.lock();
                if meta.state != SegmentState::Active || meta.length != *offset {
                    return Err(SegmentError::journal_corruption(format!(
                        "append at {offset} to {} segment {segment_id} of length {}",
                        meta.state, meta.length
                    )));
                }
                entry.data().append(data)?;
                meta.length += data.len() as u64;
                Self::replay_attributes(&mut meta, values, attributes);
            }
            LogRecord::UpdateAttributes {
                segment_id,
                attributes: values,
            } => {
                let entry = self.replayed_entry(*segment_id)?;
                let mut meta = entry.lock();
                Self::replay_attributes(&mut meta, values, attributes);
            }
            LogRecord::Seal { segment_id, length } => {
                let entry = self.replayed_entry(*segment_id)?;
                let mut meta = entry.lock();
                if meta.length != *length {
                    return Err(SegmentError::journal_corruption(format!(
                        "seal of {segment_id} at {length} but length is {}",
                        meta.length
                    )));
                }
                meta.state = SegmentState::Sealed;
            }
            LogRecord::Merge {
                target_id,
                source_id,
                source_length,
                target_offset,
            } => {
                if target_id == source_id {
                    return Err(SegmentError::journal_corruption(format!(
                        "segment {source_id} merged into itself"
                    )));
                }
                let target = self.replayed_entry(*target_id)?;
                let source = self.replayed_entry(*source_id)?;
                let mut target_meta = target.lock();
                let mut source_meta = source.lock();
                if target_meta.length != *target_offset || source_meta.length != *source_length {
                    return Err(SegmentError::journal_corruption(format!(
                        "merge of {source_id} into {target_id} does not match replayed lengths"
                    )));
                }
                let bytes = source
                    .data()
                    .read(0, usize::try_from(*source_length).unwrap_or(usize::MAX))?;
                target.data().append(&bytes)?;
                target_meta.length += source_length;

                source_meta.state = SegmentState::Merged;
                source_meta.merged_into = Some(*target_id);
                source_meta.attributes.clear();
                source.data().clear()?;
                attributes.live.remove(source_id);
                attributes.released.insert(*source_id);
            }
            LogRecord::Truncate { segment_id, offset } => {
                let entry = self.replayed_entry(*segment_id)?;
                let mut meta = entry.lock();
                if *offset > meta.length {
                    return Err(SegmentError::journal_corruption(format!(
                        "truncate of {segment_id} at {offset} beyond length {}",
                        meta.length
                    )));
                }
                meta.truncation_offset = *offset;
            }
            LogRecord::Delete { segment_id } => {
                let entry = self.replayed_entry(*segment_id)?;
                let mut names = self.names.write();
                let mut meta = entry.lock();
                meta.state = SegmentState::Deleted;
                names.remove(entry.name());
                self.segments.write().remove(segment_id);
                attributes.live.remove(segment_id);
                attributes.released.insert(*segment_id);
            }
        }
        Ok(())
    }
}
