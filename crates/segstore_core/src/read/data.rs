//! Segment byte storage.

use crate::error::SegmentResult;
use bytes::Bytes;
use parking_lot::RwLock;
use segstore_storage::{InMemoryBackend, StorageBackend};

/// Bytes of one segment, addressed by segment offset.
///
/// Appends happen inside the segment's critical section; reads take only the
/// shared lock so tailing readers never contend with each other. Bytes below
/// the truncation offset are kept; memory is only released by [`clear`].
///
/// [`clear`]: SegmentData::clear
pub struct SegmentData {
    backend: RwLock<Box<dyn StorageBackend>>,
}

impl SegmentData {
    /// Creates empty in-memory data.
    #[must_use]
    pub fn new() -> Self {
        Self::with_backend(Box::new(InMemoryBackend::new()))
    }

    /// Uses the given backend for the bytes.
    #[must_use]
    pub fn with_backend(backend: Box<dyn StorageBackend>) -> Self {
        Self {
            backend: RwLock::new(backend),
        }
    }

    /// Appends bytes at the end.
    pub fn append(&self, data: &[u8]) -> SegmentResult<u64> {
        Ok(self.backend.write().append(data)?)
    }

    /// Reads up to `max_len` bytes at `offset`, stopping at the end.
    pub fn read(&self, offset: u64, max_len: usize) -> SegmentResult<Bytes> {
        let buf = self.backend.read().read_available(offset, max_len)?;
        Ok(Bytes::from(buf))
    }

    /// Number of bytes stored.
    pub fn len(&self) -> SegmentResult<u64> {
        Ok(self.backend.read().size()?)
    }

    /// Drops all bytes.
    pub fn clear(&self) -> SegmentResult<()> {
        self.backend.write().truncate(0)?;
        Ok(())
    }
}

impl Default for SegmentData {
    fn default() -> Self {
        Self::new()
    }
}
