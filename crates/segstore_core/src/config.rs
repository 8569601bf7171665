//! Store configuration.

use std::time::Duration;

/// Configuration for opening a [`crate::SegmentStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Largest payload a single append may carry.
    pub max_append_length: usize,

    /// Longest accepted segment name, in bytes.
    pub max_segment_name_length: usize,

    /// Extended attributes kept resident per segment before the least
    /// recently used ones are dropped from memory.
    pub max_cached_attributes: usize,

    /// Largest chunk a [`crate::ReadResult`] hands out at once.
    pub read_chunk_size: usize,

    /// Whether the journal and attribute index are flushed to the OS on
    /// every commit. This hands the bytes to the OS without `fsync`, so it
    /// survives a process crash but not a power loss.
    pub sync_on_commit: bool,

    /// Timeout used by callers that do not carry their own, such as the CLI.
    pub default_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_append_length: 8 * 1024 * 1024, // 8 MB
            max_segment_name_length: 512,
            max_cached_attributes: 1024,
            read_chunk_size: 64 * 1024, // 64 KB
            sync_on_commit: true,
            default_timeout: Duration::from_secs(30),
        }
    }
}

impl StoreConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum append length.
    #[must_use]
    pub const fn max_append_length(mut self, len: usize) -> Self {
        self.max_append_length = len;
        self
    }

    /// Sets the maximum segment name length.
    #[must_use]
    pub const fn max_segment_name_length(mut self, len: usize) -> Self {
        self.max_segment_name_length = len;
        self
    }

    /// Sets how many extended attributes stay resident per segment.
    #[must_use]
    pub const fn max_cached_attributes(mut self, count: usize) -> Self {
        self.max_cached_attributes = count;
        self
    }

    /// Sets the read chunk size. Zero is treated as one byte.
    #[must_use]
    pub const fn read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = if size == 0 { 1 } else { size };
        self
    }

    /// Sets whether to flush the journal on every commit (no `fsync`).
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the default operation timeout.
    #[must_use]
    pub const fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}
