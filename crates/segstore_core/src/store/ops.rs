//! Operation bodies.
//!
//! Each operation resolves its segment, takes a sequencer turn if it is
//! conditional or a lifecycle transition, and then commits synchronously in
//! the segment's critical section: validate, evaluate attributes, append to
//! the journal, apply to data and metadata, publish the tail. Nothing is
//! awaited between the journal append and the end of the operation, so a
//! timeout or cancellation never leaves a half-applied commit.
//!
//! The journal append is the commit point. Everything after it is applied
//! in full; attribute store failures past that point are logged, and the
//! next open repairs the store from the journal.
//!
//! Lock order: name index, then segment metadata (by ascending id when two
//! are held), then journal and attribute store.

use super::StoreInner;
use crate::attributes::{AttributeId, AttributeUpdate};
use crate::error::{SegmentError, SegmentResult};
use crate::journal::LogRecord;
use crate::read::{ReadResult, SegmentData};
use crate::segment::{SegmentEntry, SegmentMetadata, SegmentProperties, SegmentState};
use crate::types::SegmentId;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

impl StoreInner {
    fn ensure_open(&self) -> SegmentResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SegmentError::StoreClosed);
        }
        Ok(())
    }

    pub(super) fn entry(&self, name: &str) -> SegmentResult<Arc<SegmentEntry>> {
        let id = self
            .names
            .read()
            .get(name)
            .copied()
            .ok_or_else(|| SegmentError::not_found(name))?;
        self.segments
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| SegmentError::not_found(name))
    }

    pub(super) async fn append(
        &self,
        name: String,
        data: Bytes,
        updates: Vec<AttributeUpdate>,
        expected_offset: Option<u64>,
    ) -> SegmentResult<()> {
        self.ensure_open()?;
        let entry = self.entry(&name)?;
        let _turn = match expected_offset {
            Some(_) => Some(entry.sequencer().acquire().await),
            None => None,
        };
        self.ensure_open()?;
        self.commit_append(&entry, &data, &updates, expected_offset)
    }

    fn commit_append(
        &self,
        entry: &SegmentEntry,
        data: &Bytes,
        updates: &[AttributeUpdate],
        expected_offset: Option<u64>,
    ) -> SegmentResult<()> {
        let mut meta = entry.lock();
        meta.state.require_writable(entry.name())?;
        let offset = meta.length;
        if let Some(expected) = expected_offset {
            if expected != offset {
                return Err(SegmentError::bad_append_offset(entry.name(), expected, offset));
            }
        }
        let resolved = self.resolver.evaluate(&mut meta, updates)?;

        self.journal.append(&LogRecord::Append {
            segment_id: entry.id(),
            offset,
            data: data.to_vec(),
            attributes: resolved.clone(),
        })?;

        entry.data().append(data)?;
        meta.length += data.len() as u64;
        self.resolver.apply(&mut meta, &resolved);
        meta.touch();
        entry.publish(&meta);
        debug!(
            segment = %entry.name(),
            offset,
            len = data.len(),
            attributes = resolved.len(),
            conditional = expected_offset.is_some(),
            "append committed"
        );
        Ok(())
    }

    pub(super) fn update_attributes(&self, name: String, updates: Vec<AttributeUpdate>) -> SegmentResult<()> {
        self.ensure_open()?;
        let entry = self.entry(&name)?;
        let mut meta = entry.lock();
        meta.state.require_writable(&name)?;
        if updates.is_empty() {
            return Ok(());
        }
        let resolved = self.resolver.evaluate(&mut meta, &updates)?;

        self.journal.append(&LogRecord::UpdateAttributes {
            segment_id: entry.id(),
            attributes: resolved.clone(),
        })?;

        self.resolver.apply(&mut meta, &resolved);
        meta.touch();
        debug!(segment = %name, attributes = resolved.len(), "attributes updated");
        Ok(())
    }

    pub(super) async fn get_attributes(
        &self,
        name: String,
        ids: Vec<AttributeId>,
        cache: bool,
    ) -> SegmentResult<HashMap<AttributeId, i64>> {
        self.ensure_open()?;
        let entry = self.entry(&name)?;
        self.resolver.get_attributes(&entry, &ids, cache).await
    }

    pub(super) fn read(&self, name: String, offset: u64, max_length: u64) -> SegmentResult<ReadResult> {
        self.ensure_open()?;
        let entry = self.entry(&name)?;
        let eviction_epoch = {
            let meta = entry.lock();
            meta.state.require_readable(&name)?;
            if offset < meta.truncation_offset {
                return Err(SegmentError::SegmentTruncated {
                    name,
                    offset,
                    truncation_offset: meta.truncation_offset,
                });
            }
            if meta.is_sealed() && offset > meta.length {
                return Err(SegmentError::BadOffset {
                    name,
                    offset,
                    reason: format!("segment is sealed at length {}", meta.length),
                });
            }
            meta.eviction_epoch
        };
        Ok(ReadResult::new(
            entry,
            offset,
            max_length,
            self.config.read_chunk_size,
            eviction_epoch,
            self.shutdown.subscribe(),
        ))
    }

    pub(super) fn info(&self, name: &str) -> SegmentResult<SegmentProperties> {
        self.ensure_open()?;
        let entry = self.entry(name)?;
        let meta = entry.lock();
        match meta.state {
            SegmentState::Creating | SegmentState::Deleted => Err(SegmentError::not_found(name)),
            _ => Ok(meta.properties()),
        }
    }

    pub(super) fn create(&self, name: String, updates: Vec<AttributeUpdate>) -> SegmentResult<()> {
        self.ensure_open()?;
        let mut names = self.names.write();
        if names.contains_key(&name) {
            return Err(SegmentError::SegmentExists { name });
        }

        let id = SegmentId::new(self.next_segment_id.load(Ordering::SeqCst));
        let mut meta = SegmentMetadata::new(id, name.as_str());
        let mut resolved = self.resolver.evaluate(&mut meta, &updates)?;
        if !resolved.iter().any(|(id, _)| *id == AttributeId::CREATION_TIME) {
            resolved.push((AttributeId::CREATION_TIME, now_millis()));
        }

        self.journal.append(&LogRecord::CreateSegment {
            segment_id: id,
            name: name.clone(),
            attributes: resolved.clone(),
        })?;
        self.next_segment_id.store(id.as_u64() + 1, Ordering::SeqCst);

        meta.state = SegmentState::Active;
        self.resolver.apply(&mut meta, &resolved);
        let entry = Arc::new(SegmentEntry::new(meta));
        self.segments.write().insert(id, entry);
        names.insert(name.clone(), id);
        info!(segment = %name, id = %id, "segment created");
        Ok(())
    }

    pub(super) async fn seal(&self, name: String) -> SegmentResult<u64> {
        self.ensure_open()?;
        let entry = self.entry(&name)?;
        let _turn = entry.sequencer().acquire().await;
        self.ensure_open()?;

        let mut meta = entry.lock();
        match meta.state {
            SegmentState::Sealed => return Ok(meta.length),
            SegmentState::Active => {}
            SegmentState::Merging | SegmentState::Merged => return Err(SegmentError::merged(&name)),
            SegmentState::Creating | SegmentState::Deleted => return Err(SegmentError::not_found(&name)),
        }

        self.journal.append(&LogRecord::Seal {
            segment_id: entry.id(),
            length: meta.length,
        })?;

        meta.state = SegmentState::Sealed;
        meta.touch();
        entry.publish(&meta);
        info!(segment = %name, length = meta.length, "segment sealed");
        Ok(meta.length)
    }

    pub(super) async fn truncate(&self, name: String, offset: u64) -> SegmentResult<()> {
        self.ensure_open()?;
        let entry = self.entry(&name)?;
        let _turn = entry.sequencer().acquire().await;
        self.ensure_open()?;

        let mut meta = entry.lock();
        meta.state.require_readable(&name)?;
        if offset < meta.truncation_offset || offset > meta.length {
            return Err(SegmentError::bad_truncation_offset(
                &name,
                offset,
                meta.truncation_offset,
                meta.length,
            ));
        }
        if offset == meta.truncation_offset {
            return Ok(());
        }

        self.journal.append(&LogRecord::Truncate {
            segment_id: entry.id(),
            offset,
        })?;

        meta.truncation_offset = offset;
        meta.touch();
        entry.publish(&meta);
        info!(segment = %name, offset, "segment truncated");
        Ok(())
    }

    pub(super) async fn delete(&self, name: String) -> SegmentResult<()> {
        self.ensure_open()?;
        let entry = self.entry(&name)?;
        let _turn = entry.sequencer().acquire().await;
        self.ensure_open()?;

        let mut names = self.names.write();
        if names.get(&name) != Some(&entry.id()) {
            return Err(SegmentError::not_found(&name));
        }
        let mut meta = entry.lock();
        if meta.state == SegmentState::Deleted {
            return Err(SegmentError::not_found(&name));
        }

        self.journal.append(&LogRecord::Delete {
            segment_id: entry.id(),
        })?;

        meta.state = SegmentState::Deleted;
        names.remove(&name);
        self.segments.write().remove(&entry.id());
        drop(names);

        meta.attributes.clear();
        meta.unstored.clear();
        meta.attribute_epoch += 1;
        meta.touch();
        entry.publish(&meta);
        self.release(entry.id(), &name, entry.data());
        info!(segment = %name, id = %entry.id(), "segment deleted");
        Ok(())
    }

    pub(super) async fn merge(&self, target: String, source: String) -> SegmentResult<SegmentProperties> {
        self.ensure_open()?;
        let target_entry = self.entry(&target)?;
        let source_entry = self.entry(&source)?;

        let (first, second) = if target_entry.id() < source_entry.id() {
            (&target_entry, &source_entry)
        } else {
            (&source_entry, &target_entry)
        };
        let _first_turn = first.sequencer().acquire().await;
        let _second_turn = second.sequencer().acquire().await;
        self.ensure_open()?;

        self.commit_merge(&target_entry, &source_entry)
    }

    fn commit_merge(&self, target: &SegmentEntry, source: &SegmentEntry) -> SegmentResult<SegmentProperties> {
        let (mut target_meta, mut source_meta) = if target.id() < source.id() {
            let t = target.lock();
            (t, source.lock())
        } else {
            let s = source.lock();
            (target.lock(), s)
        };

        target_meta.state.require_writable(target.name())?;
        source_meta.state.require_readable(source.name())?;
        if source_meta.state != SegmentState::Sealed {
            return Err(SegmentError::SegmentNotSealed {
                name: source.name().to_string(),
            });
        }

        let source_length = source_meta.length;
        let target_offset = target_meta.length;
        let bytes = source.data().read(0, usize::try_from(source_length).unwrap_or(usize::MAX))?;

        self.journal.append(&LogRecord::Merge {
            target_id: target.id(),
            source_id: source.id(),
            source_length,
            target_offset,
        })?;

        source_meta.state = SegmentState::Merging;
        target.data().append(&bytes)?;
        target_meta.length += source_length;
        target_meta.touch();

        source_meta.state = SegmentState::Merged;
        source_meta.merged_into = Some(target.id());
        source_meta.touch();
        let snapshot = source_meta.properties();
        source_meta.attributes.clear();
        source_meta.unstored.clear();
        source_meta.attribute_epoch += 1;

        target.publish(&target_meta);
        source.publish(&source_meta);
        self.release(source.id(), source.name(), source.data());

        info!(
            target = %target.name(),
            source = %source.name(),
            source_length,
            target_length = target_meta.length,
            "segment merged"
        );
        Ok(snapshot)
    }

    /// Drops the stored attributes and bytes of a segment that is gone.
    /// Failures leave only unreachable leftovers, so they are logged.
    fn release(&self, id: SegmentId, name: &str, data: &SegmentData) {
        if let Err(e) = self.resolver.store().remove_segment(id) {
            warn!(segment = %name, id = %id, error = %e, "failed to drop stored attributes");
        }
        if let Err(e) = data.clear() {
            warn!(segment = %name, id = %id, error = %e, "failed to release segment data");
        }
    }

    pub(super) fn evict(&self, name: &str) -> SegmentResult<usize> {
        let entry = self.entry(name)?;
        let mut meta = entry.lock();
        if meta.state == SegmentState::Deleted {
            return Err(SegmentError::not_found(name));
        }
        let evicted = meta.attributes.clear_extended();
        meta.attribute_epoch += 1;
        meta.eviction_epoch += 1;
        entry.publish(&meta);
        info!(
            segment = %name,
            evicted,
            open_readers = entry.open_readers(),
            "segment evicted"
        );
        Ok(evicted)
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}
