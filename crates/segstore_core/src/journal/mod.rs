//! Operation journal for durability and recovery.
//!
//! Every mutation is written to the journal before it is applied to memory
//! or acknowledged. On open, the journal is replayed to rebuild segment
//! state.
//!
//! ## Record Format
//!
//! ```text
//! | magic (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! The payload is the CBOR encoding of a [`LogRecord`]. The checksum covers
//! header and payload.
//!
//! ## Recovery Policy
//!
//! Tolerated (clean end of log):
//!
//! - **Truncated header or payload**: a crash mid-write. The partial record
//!   is discarded and cut off the journal.
//!
//! Fatal (open fails):
//!
//! - **CRC mismatch**
//! - **Invalid magic bytes**
//! - **Unknown record type**
//! - **Unsupported version**
//! - **Records inconsistent with replayed state**, such as an append at the
//!   wrong offset or a record for an unknown segment.

mod iterator;
mod record;
mod writer;

pub use iterator::LogRecordIterator;
pub use record::{compute_crc32, LogRecord, LogRecordType, LOG_MAGIC, LOG_VERSION};
pub use writer::OperationLog;

/// magic (4) + version (2) + type (1) + length (4)
pub const HEADER_SIZE: usize = 11;

/// Trailing checksum size.
pub const CRC_SIZE: usize = 4;
