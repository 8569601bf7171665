//! Streaming journal record iterator.
//!
//! Reads records one by one through a bounded buffer so replaying a large
//! journal does not load it into memory.

use super::record::{compute_crc32, LogRecord, LogRecordType, LOG_MAGIC, LOG_VERSION};
use super::{CRC_SIZE, HEADER_SIZE};
use crate::error::{SegmentError, SegmentResult};
use parking_lot::MutexGuard;
use segstore_storage::StorageBackend;

/// Read buffer size for streaming iteration.
const READ_BUFFER_SIZE: usize = 64 * 1024; // 64 KB

/// A streaming iterator over journal records.
///
/// Yields `(offset, record)` pairs. A truncated record at the tail ends the
/// iteration cleanly and [`LogRecordIterator::position`] then points at its
/// first byte. Bad magic, unsupported versions, unknown types and checksum
/// mismatches are returned as errors and end the iteration.
pub struct LogRecordIterator<'a> {
    backend: MutexGuard<'a, Box<dyn StorageBackend>>,
    total_size: u64,
    current_offset: u64,
    buffer: Vec<u8>,
    buffer_pos: usize,
    buffer_len: usize,
    finished: bool,
}

impl<'a> LogRecordIterator<'a> {
    /// Creates an iterator starting at `start_offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be determined.
    pub fn new(
        backend: MutexGuard<'a, Box<dyn StorageBackend>>,
        start_offset: u64,
    ) -> SegmentResult<Self> {
        let total_size = backend.size()?;
        Ok(Self {
            backend,
            total_size,
            current_offset: start_offset,
            buffer: vec![0u8; READ_BUFFER_SIZE],
            buffer_pos: 0,
            buffer_len: 0,
            finished: false,
        })
    }

    /// Offset just past the last record returned.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.current_offset
    }

    /// Size of the journal when iteration started.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Ensures at least `min_bytes` are buffered from the current position.
    ///
    /// Returns `false` if the journal ends first. Grows the buffer for
    /// records larger than it.
    fn ensure_buffered(&mut self, min_bytes: usize) -> SegmentResult<bool> {
        let available = self.buffer_len - self.buffer_pos;
        if available >= min_bytes {
            return Ok(true);
        }

        let unread = self.total_size - self.current_offset;
        if unread < min_bytes as u64 {
            return Ok(false);
        }

        if self.buffer_pos > 0 && available > 0 {
            self.buffer.copy_within(self.buffer_pos..self.buffer_len, 0);
        }
        self.buffer_len = available;
        self.buffer_pos = 0;

        if min_bytes > self.buffer.len() {
            self.buffer.resize(min_bytes.next_power_of_two(), 0);
        }

        let remaining = unread - available as u64;
        let to_read = usize::try_from(remaining)
            .map_or(self.buffer.len() - self.buffer_len, |r| r.min(self.buffer.len() - self.buffer_len));

        if to_read > 0 {
            let read_offset = self.current_offset + self.buffer_len as u64;
            let data = self.backend.read_at(read_offset, to_read)?;
            self.buffer[self.buffer_len..self.buffer_len + data.len()].copy_from_slice(&data);
            self.buffer_len += data.len();
        }

        Ok(self.buffer_len - self.buffer_pos >= min_bytes)
    }

    fn read_next_record(&mut self) -> SegmentResult<Option<(u64, LogRecord)>> {
        let start = self.current_offset;

        if !self.ensure_buffered(HEADER_SIZE)? {
            return Ok(None);
        }

        let header = &self.buffer[self.buffer_pos..self.buffer_pos + HEADER_SIZE];
        if header[0..4] != LOG_MAGIC {
            return Err(SegmentError::journal_corruption(format!(
                "invalid magic at offset {start}"
            )));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > LOG_VERSION {
            return Err(SegmentError::journal_corruption(format!(
                "unsupported version {version} at offset {start}"
            )));
        }

        let type_byte = header[6];
        let record_type = LogRecordType::from_byte(type_byte).ok_or_else(|| {
            SegmentError::journal_corruption(format!(
                "unknown record type {type_byte} at offset {start}"
            ))
        })?;

        let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;
        let total_len = HEADER_SIZE + payload_len + CRC_SIZE;

        if !self.ensure_buffered(total_len)? {
            return Ok(None);
        }

        let payload_start = self.buffer_pos + HEADER_SIZE;
        let payload_end = payload_start + payload_len;
        let stored_crc = u32::from_le_bytes([
            self.buffer[payload_end],
            self.buffer[payload_end + 1],
            self.buffer[payload_end + 2],
            self.buffer[payload_end + 3],
        ]);
        let computed_crc = compute_crc32(&self.buffer[self.buffer_pos..payload_end]);
        if stored_crc != computed_crc {
            return Err(SegmentError::ChecksumMismatch {
                expected: stored_crc,
                actual: computed_crc,
            });
        }

        let record = LogRecord::decode_payload(record_type, &self.buffer[payload_start..payload_end])?;

        self.buffer_pos += total_len;
        self.current_offset += total_len as u64;

        Ok(Some((start, record)))
    }
}

impl Iterator for LogRecordIterator<'_> {
    type Item = SegmentResult<(u64, LogRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.read_next_record() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
