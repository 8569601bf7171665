use super::record::{compute_crc32, LogRecord, LOG_MAGIC, LOG_VERSION};
use super::{LogRecordIterator, CRC_SIZE, HEADER_SIZE};
use crate::error::{SegmentError, SegmentResult};
use parking_lot::Mutex;
use segstore_storage::StorageBackend;
use std::sync::atomic::{AtomicU64, Ordering};

/// Durable journal of committed operations.
///
/// A record is committed once [`OperationLog::append`] returns; the engine
/// applies the change to memory only after that.
pub struct OperationLog {
    backend: Mutex<Box<dyn StorageBackend>>,
    sync_on_commit: bool,
    appended: AtomicU64,
}

impl OperationLog {
    /// Wraps a backend.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_commit: bool) -> Self {
        Self {
            backend: Mutex::new(backend),
            sync_on_commit,
            appended: AtomicU64::new(0),
        }
    }

    /// Frames a record as `magic | version | type | length | payload | crc32`.
    ///
    /// # Errors
    ///
    /// Fails if the payload cannot be encoded or exceeds 4 GiB.
    pub fn frame(record: &LogRecord) -> SegmentResult<Vec<u8>> {
        let payload = record.encode_payload()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| SegmentError::codec("journal record payload too large"))?;

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&LOG_MAGIC);
        data.extend_from_slice(&LOG_VERSION.to_le_bytes());
        data.push(record.record_type().as_byte());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);

        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }

    /// Appends a record and returns its offset.
    ///
    /// With `sync_on_commit` the record is flushed to the OS before this
    /// returns. That is not an `fsync`.
    ///
    /// # Errors
    ///
    /// Fails on encoding or I/O errors. The caller must not apply the
    /// operation on failure; a partially written record is cut off on the
    /// next replay.
    pub fn append(&self, record: &LogRecord) -> SegmentResult<u64> {
        let data = Self::frame(record)?;

        let mut backend = self.backend.lock();
        let offset = backend.append(&data)?;
        if self.sync_on_commit {
            backend.flush()?;
        }
        self.appended.fetch_add(1, Ordering::Relaxed);
        Ok(offset)
    }

    /// Flushes pending writes to durable storage.
    pub fn flush(&self) -> SegmentResult<()> {
        self.backend.lock().flush()?;
        Ok(())
    }

    /// Current journal size in bytes.
    pub fn size(&self) -> SegmentResult<u64> {
        Ok(self.backend.lock().size()?)
    }

    /// Records appended through this handle since it was opened.
    #[must_use]
    pub fn appended(&self) -> u64 {
        self.appended.load(Ordering::Relaxed)
    }

    /// Returns a streaming iterator over all records.
    ///
    /// The journal is locked for writes while the iterator lives.
    pub fn iter(&self) -> SegmentResult<LogRecordIterator<'_>> {
        LogRecordIterator::new(self.backend.lock(), 0)
    }

    /// Reads every record into memory.
    pub fn read_all(&self) -> SegmentResult<Vec<(u64, LogRecord)>> {
        self.iter()?.collect()
    }

    /// Cuts the journal at `offset`. Used to drop a torn tail on recovery.
    pub fn truncate(&self, offset: u64) -> SegmentResult<()> {
        self.backend.lock().truncate(offset)?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn with_backend<R>(&self, f: impl FnOnce(&mut Box<dyn StorageBackend>) -> R) -> R {
        f(&mut self.backend.lock())
    }
}

impl std::fmt::Debug for OperationLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationLog")
            .field("sync_on_commit", &self.sync_on_commit)
            .field("appended", &self.appended())
            .finish_non_exhaustive()
    }
}
