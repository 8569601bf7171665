//! # Segstore Core
//!
//! Segment-oriented storage engine.
//!
//! A segment is a named, append-only byte stream with a set of `i64`
//! attributes. This crate provides:
//! - [`SegmentStore`]: create, append (conditional and unconditional),
//!   read with tailing, seal, merge, truncate and delete
//! - Two-tier attributes: a bounded per-segment cache over a durable
//!   [`AttributeStore`], with conditional, atomic update batches
//! - Per-segment ordering of conditional operations
//! - An operation journal replayed on open
//!
//! ```rust,ignore
//! let store = SegmentStore::open_in_memory()?;
//! let timeout = Duration::from_secs(5);
//! store.create_stream_segment("orders/0", vec![], timeout)?.await?;
//! store.append_at("orders/0", 0, Bytes::from_static(b"event"), vec![], timeout)?.await?;
//! let mut read = store.read("orders/0", 0, 5, timeout)?.await?;
//! let bytes = read.read_to_end().await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod attributes;
mod config;
pub mod dir;
mod error;
mod handle;
pub mod journal;
mod pending;
pub mod read;
pub mod segment;
mod sequencer;
mod store;
mod types;

pub use attributes::{
    AttributeCache, AttributeId, AttributeResolver, AttributeStore, AttributeUpdate,
    AttributeUpdateType, InMemoryAttributeStore, PersistentAttributeStore, NULL_ATTRIBUTE_VALUE,
};
pub use config::StoreConfig;
pub use error::{ArgumentError, ErrorClass, SegmentError, SegmentResult};
pub use handle::OpHandle;
pub use journal::{LogRecord, LogRecordType, OperationLog};
pub use pending::{PendingGuard, PendingOps};
pub use read::ReadResult;
pub use segment::{SegmentProperties, SegmentState};
pub use sequencer::{OrderingSequencer, SequencerTurn};
pub use store::{RecoveryStats, SegmentStore};
pub use types::SegmentId;
