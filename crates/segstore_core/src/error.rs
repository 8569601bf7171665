//! Error types for the segment store.
//!
//! Two families, kept apart so callers can branch on retryability:
//!
//! - [`ArgumentError`] is returned synchronously, before any state is
//!   consulted. It is a caller bug and is never worth retrying.
//! - [`SegmentError`] is delivered through an operation's handle. Its
//!   [`ErrorClass`] says whether the failure is a precondition conflict,
//!   a missing or terminal segment, a transient availability problem, or
//!   an engine fault.

use crate::attributes::AttributeId;
use std::time::Duration;
use thiserror::Error;

/// Result type for asynchronous segment operations.
pub type SegmentResult<T> = Result<T, SegmentError>;

/// Synchronous argument validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgumentError {
    /// The segment name is malformed.
    #[error("invalid segment name {name:?}: {reason}")]
    InvalidSegmentName {
        /// The offending name.
        name: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// A timeout of zero can never be met.
    #[error("timeout must be greater than zero")]
    ZeroTimeout,

    /// The append payload exceeds the configured maximum.
    #[error("append of {len} bytes exceeds the maximum of {max} bytes")]
    AppendTooLarge {
        /// Payload length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A read asked for zero bytes.
    #[error("read length must be greater than zero")]
    ZeroReadLength,

    /// An offset does not fit the signed 64-bit offset space.
    #[error("offset {offset} is out of range")]
    OffsetOutOfRange {
        /// The offending offset.
        offset: u64,
    },

    /// The same attribute appears twice in one update batch.
    #[error("attribute {attribute_id} appears more than once in the update batch")]
    DuplicateAttribute {
        /// The repeated attribute.
        attribute_id: AttributeId,
    },

    /// A segment cannot be merged into itself.
    #[error("cannot merge segment {name:?} into itself")]
    SelfMerge {
        /// The segment name given as both source and target.
        name: String,
    },
}

/// Broad category of a [`SegmentError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// A logical precondition failed. Retrying only helps after the caller
    /// re-reads the state the precondition depends on.
    StateConflict,
    /// The segment is missing, deleted, merged away, or the requested range
    /// has been truncated.
    NotFound,
    /// Timeout, cancellation or shutdown. Safe to retry for idempotent
    /// operations.
    Unavailable,
    /// Storage, journal or task failure inside the engine.
    Internal,
}

/// Failures delivered through an operation handle.
#[derive(Debug, Error)]
pub enum SegmentError {
    /// No live segment has this name.
    #[error("segment not found: {name}")]
    SegmentNotFound {
        /// Segment name.
        name: String,
    },

    /// A segment with this name already exists.
    #[error("segment already exists: {name}")]
    SegmentExists {
        /// Segment name.
        name: String,
    },

    /// The segment is sealed and does not accept the write.
    #[error("segment is sealed: {name}")]
    SegmentSealed {
        /// Segment name.
        name: String,
    },

    /// A merge source has not been sealed.
    #[error("segment is not sealed: {name}")]
    SegmentNotSealed {
        /// Segment name.
        name: String,
    },

    /// The segment was merged into another and is terminal.
    #[error("segment has been merged: {name}")]
    SegmentMerged {
        /// Segment name.
        name: String,
    },

    /// The requested offset lies below the truncation offset.
    #[error("segment {name} is truncated at {truncation_offset}, offset {offset} is no longer readable")]
    SegmentTruncated {
        /// Segment name.
        name: String,
        /// The requested offset.
        offset: u64,
        /// The current truncation offset.
        truncation_offset: u64,
    },

    /// An offset-qualified operation disagreed with the segment's state.
    #[error("bad offset {offset} for segment {name}: {reason}")]
    BadOffset {
        /// Segment name.
        name: String,
        /// The offset supplied by the caller.
        offset: u64,
        /// What the offset was checked against.
        reason: String,
    },

    /// A conditional attribute update did not hold; nothing was applied.
    #[error("attribute update failed for {attribute_id} on segment {name}: {reason}")]
    AttributeUpdateFailed {
        /// Segment name.
        name: String,
        /// The attribute whose condition failed.
        attribute_id: AttributeId,
        /// Why the condition failed.
        reason: String,
    },

    /// The operation did not finish within its timeout.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// Operation name.
        operation: &'static str,
        /// The timeout that expired.
        timeout: Duration,
    },

    /// The operation or read was cancelled.
    #[error("cancelled: {reason}")]
    Cancelled {
        /// What triggered the cancellation.
        reason: String,
    },

    /// The store has been shut down.
    #[error("segment store is closed")]
    StoreClosed,

    /// Another process holds the store directory lock.
    #[error("store directory is locked by another process: {path}")]
    StoreLocked {
        /// Directory path.
        path: String,
    },

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] segstore_storage::StorageError),

    /// The operation journal is corrupted or inconsistent.
    #[error("journal corruption: {message}")]
    JournalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch on a persisted record.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// A journal payload could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// An engine task failed unexpectedly.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl SegmentError {
    /// Creates a not-found error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::SegmentNotFound { name: name.into() }
    }

    /// Creates a merged error.
    pub fn merged(name: impl Into<String>) -> Self {
        Self::SegmentMerged { name: name.into() }
    }

    /// Creates a sealed error.
    pub fn sealed(name: impl Into<String>) -> Self {
        Self::SegmentSealed { name: name.into() }
    }

    /// Creates a bad-offset error for a conditional append.
    pub fn bad_append_offset(name: impl Into<String>, offset: u64, length: u64) -> Self {
        Self::BadOffset {
            name: name.into(),
            offset,
            reason: format!("segment length is {length}"),
        }
    }

    /// Creates a bad-offset error for a truncation outside `[lower, length]`.
    pub fn bad_truncation_offset(
        name: impl Into<String>,
        offset: u64,
        lower: u64,
        length: u64,
    ) -> Self {
        Self::BadOffset {
            name: name.into(),
            offset,
            reason: format!("truncation offset must be within [{lower}, {length}]"),
        }
    }

    /// Creates an attribute update failure.
    pub fn attribute_update_failed(
        name: impl Into<String>,
        attribute_id: AttributeId,
        reason: impl Into<String>,
    ) -> Self {
        Self::AttributeUpdateFailed {
            name: name.into(),
            attribute_id,
            reason: reason.into(),
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Creates a journal corruption error.
    pub fn journal_corruption(message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns the broad category of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::BadOffset { .. }
            | Self::AttributeUpdateFailed { .. }
            | Self::SegmentExists { .. }
            | Self::SegmentNotSealed { .. }
            | Self::SegmentSealed { .. } => ErrorClass::StateConflict,
            Self::SegmentNotFound { .. }
            | Self::SegmentMerged { .. }
            | Self::SegmentTruncated { .. } => ErrorClass::NotFound,
            Self::Timeout { .. }
            | Self::Cancelled { .. }
            | Self::StoreClosed
            | Self::StoreLocked { .. } => ErrorClass::Unavailable,
            Self::Storage(_)
            | Self::JournalCorruption { .. }
            | Self::ChecksumMismatch { .. }
            | Self::Codec { .. }
            | Self::Internal { .. } => ErrorClass::Internal,
        }
    }

    /// Returns true if the same call may succeed when simply retried.
    ///
    /// Unconditional appends are the exception: retrying one after a timeout
    /// may duplicate data unless the caller de-duplicates through attributes.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Unavailable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(
            SegmentError::bad_append_offset("s", 0, 10).class(),
            ErrorClass::StateConflict
        );
        assert_eq!(SegmentError::merged("s").class(), ErrorClass::NotFound);
        assert_eq!(SegmentError::StoreClosed.class(), ErrorClass::Unavailable);
        assert_eq!(
            SegmentError::journal_corruption("bad").class(),
            ErrorClass::Internal
        );
    }

    #[test]
    fn only_unavailable_is_retryable() {
        let timeout = SegmentError::Timeout {
            operation: "append",
            timeout: Duration::from_millis(5),
        };
        assert!(timeout.is_retryable());
        assert!(SegmentError::cancelled("shutdown").is_retryable());
        assert!(!SegmentError::not_found("s").is_retryable());
        assert!(!SegmentError::sealed("s").is_retryable());
    }

    #[test]
    fn display_carries_context() {
        let err = SegmentError::bad_truncation_offset("events", 3, 5, 20);
        let msg = err.to_string();
        assert!(msg.contains("events"));
        assert!(msg.contains("[5, 20]"));

        let arg = ArgumentError::AppendTooLarge { len: 10, max: 4 };
        assert!(arg.to_string().contains("10 bytes"));
    }
}
