//! Log-structured attribute store over a [`StorageBackend`].
//!
//! ## Record Format
//!
//! ```text
//! | kind (1) | segment_id (8) | attribute_id (16) | value (8) | crc32 (4) |
//! ```
//!
//! Records are fixed-size. A `Put` with [`NULL_ATTRIBUTE_VALUE`] is a
//! tombstone for one attribute; `RemoveSegment` drops every attribute of the
//! segment. The in-memory index is rebuilt by scanning the log on open. A
//! partial record at the tail is a torn write and is cut off; a checksum
//! mismatch or unknown kind anywhere is fatal.

use super::id::{AttributeId, NULL_ATTRIBUTE_VALUE};
use super::store::AttributeStore;
use crate::error::{SegmentError, SegmentResult};
use crate::journal::compute_crc32;
use crate::types::SegmentId;
use parking_lot::{Mutex, RwLock};
use segstore_storage::StorageBackend;
use std::collections::HashMap;
use tracing::{debug, warn};

const KIND_PUT: u8 = 1;
const KIND_REMOVE_SEGMENT: u8 = 2;

/// Size of one encoded record.
pub const RECORD_SIZE: usize = 1 + 8 + 16 + 8 + 4;

type Index = HashMap<SegmentId, HashMap<AttributeId, i64>>;

/// Durable attribute store backed by an append-only log.
pub struct PersistentAttributeStore {
    backend: Mutex<Box<dyn StorageBackend>>,
    index: RwLock<Index>,
    sync_on_write: bool,
}

impl PersistentAttributeStore {
    /// Opens the store, rebuilding the index from the log.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors and on corrupted records.
    pub fn open(mut backend: Box<dyn StorageBackend>, sync_on_write: bool) -> SegmentResult<Self> {
        let size = backend.size()?;
        let whole = size - size % RECORD_SIZE as u64;
        let mut index = Index::new();
        let mut records = 0u64;

        let data = backend.read_at(0, whole as usize)?;
        for chunk in data.chunks_exact(RECORD_SIZE) {
            apply_record(&mut index, decode_record(chunk)?);
            records += 1;
        }

        if whole < size {
            warn!(
                log_size = size,
                kept = whole,
                "discarding torn attribute index record"
            );
            backend.truncate(whole)?;
        }
        debug!(records, segments = index.len(), "attribute index rebuilt");

        Ok(Self {
            backend: Mutex::new(backend),
            index: RwLock::new(index),
            sync_on_write,
        })
    }

    fn write(&self, records: &[Record]) -> SegmentResult<()> {
        let mut buf = Vec::with_capacity(records.len() * RECORD_SIZE);
        for record in records {
            encode_record(record, &mut buf);
        }

        // Index updates happen under the backend lock so the index always
        // matches log order.
        let mut backend = self.backend.lock();
        backend.append(&buf)?;
        if self.sync_on_write {
            backend.flush()?;
        }
        let mut index = self.index.write();
        for record in records {
            apply_record(&mut index, *record);
        }
        Ok(())
    }

    /// Number of live entries across all segments.
    #[must_use]
    pub fn live_entries(&self) -> usize {
        self.index.read().values().map(HashMap::len).sum()
    }

    /// Size of the underlying log in bytes.
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot report its size.
    pub fn log_size(&self) -> SegmentResult<u64> {
        Ok(self.backend.lock().size()?)
    }
}

impl AttributeStore for PersistentAttributeStore {
    fn get(&self, segment: SegmentId, ids: &[AttributeId]) -> SegmentResult<HashMap<AttributeId, i64>> {
        let index = self.index.read();
        let Some(values) = index.get(&segment) else {
            return Ok(HashMap::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| values.get(id).map(|v| (*id, *v)))
            .collect())
    }

    fn put(&self, segment: SegmentId, values: &[(AttributeId, i64)]) -> SegmentResult<()> {
        if values.is_empty() {
            return Ok(());
        }
        let records: Vec<Record> = values
            .iter()
            .map(|&(attribute_id, value)| Record::Put {
                segment,
                attribute_id,
                value,
            })
            .collect();
        self.write(&records)
    }

    fn remove_segment(&self, segment: SegmentId) -> SegmentResult<()> {
        if !self.index.read().contains_key(&segment) {
            return Ok(());
        }
        self.write(&[Record::RemoveSegment { segment }])
    }

    fn flush(&self) -> SegmentResult<()> {
        self.backend.lock().flush()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Record {
    Put {
        segment: SegmentId,
        attribute_id: AttributeId,
        value: i64,
    },
    RemoveSegment {
        segment: SegmentId,
    },
}

fn encode_record(record: &Record, buf: &mut Vec<u8>) {
    let start = buf.len();
    match *record {
        Record::Put {
            segment,
            attribute_id,
            value,
        } => {
            buf.push(KIND_PUT);
            buf.extend_from_slice(&segment.as_u64().to_le_bytes());
            buf.extend_from_slice(attribute_id.as_bytes());
            buf.extend_from_slice(&value.to_le_bytes());
        }
        Record::RemoveSegment { segment } => {
            buf.push(KIND_REMOVE_SEGMENT);
            buf.extend_from_slice(&segment.as_u64().to_le_bytes());
            buf.extend_from_slice(&[0u8; 16]);
            buf.extend_from_slice(&0i64.to_le_bytes());
        }
    }
    let crc = compute_crc32(&buf[start..]);
    buf.extend_from_slice(&crc.to_le_bytes());
}

fn decode_record(bytes: &[u8]) -> SegmentResult<Record> {
    let body = &bytes[..RECORD_SIZE - 4];
    let stored = u32::from_le_bytes(slice_array(&bytes[RECORD_SIZE - 4..])?);
    let computed = compute_crc32(body);
    if stored != computed {
        return Err(SegmentError::ChecksumMismatch {
            expected: stored,
            actual: computed,
        });
    }

    let segment = SegmentId::new(u64::from_le_bytes(slice_array(&body[1..9])?));
    match body[0] {
        KIND_PUT => Ok(Record::Put {
            segment,
            attribute_id: AttributeId::from_bytes(slice_array(&body[9..25])?),
            value: i64::from_le_bytes(slice_array(&body[25..33])?),
        }),
        KIND_REMOVE_SEGMENT => Ok(Record::RemoveSegment { segment }),
        other => Err(SegmentError::journal_corruption(format!(
            "unknown attribute index record kind {other}"
        ))),
    }
}

fn slice_array<const N: usize>(bytes: &[u8]) -> SegmentResult<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| SegmentError::codec("attribute index record too short"))
}

fn apply_record(index: &mut Index, record: Record) {
    match record {
        Record::Put {
            segment,
            attribute_id,
            value,
        } => {
            let entry = index.entry(segment).or_default();
            if value == NULL_ATTRIBUTE_VALUE {
                entry.remove(&attribute_id);
            } else {
                entry.insert(attribute_id, value);
            }
            if entry.is_empty() {
                index.remove(&segment);
            }
        }
        Record::RemoveSegment { segment } => {
            index.remove(&segment);
        }
    }
}
