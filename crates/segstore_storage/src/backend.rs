//! Storage backend trait definition.

use crate::error::StorageResult;

/// An append-only byte store.
///
/// Backends never interpret what they hold. The journal, segment data and
/// the attribute index each own their framing and only rely on the
/// guarantees below.
///
/// # Invariants
///
/// - `append` writes contiguously and returns the offset of the first byte
/// - `read_at` returns exactly the bytes previously appended at that range
/// - `size` is the offset the next `append` will use
/// - after `flush` returns, appended bytes survive a process restart
/// - backends are `Send + Sync` so one can be shared behind a lock
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range is not fully
    /// written, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends `data` and returns the offset it was written at.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes appended bytes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the number of bytes held.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Like [`flush`](Self::flush), and also persists file metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Cuts the storage down to `new_size` bytes.
    ///
    /// Used to drop a torn record left at the tail by a crash.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::TruncatePastEnd`] if `new_size` is
    /// larger than the current size, or an I/O error.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Reads up to `max_len` bytes starting at `offset`, stopping at the
    /// current end.
    ///
    /// An `offset` equal to the size yields an empty buffer.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if `offset` is beyond the
    /// end, or an I/O error.
    fn read_available(&self, offset: u64, max_len: usize) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        let available = size.saturating_sub(offset);
        let len = usize::try_from(available).map_or(max_len, |a| a.min(max_len));
        self.read_at(offset, len)
    }
}
