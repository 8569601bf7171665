//! # Segstore Storage
//!
//! Byte storage backends used underneath the segment store.
//!
//! Three consumers sit on top of this crate, and none of them is known to it:
//!
//! - the operation journal (framed, checksummed commit records)
//! - per-segment data (the raw appended bytes of one segment)
//! - the persisted attribute index (log-structured attribute records)
//!
//! A backend only knows how to append bytes, read them back by offset,
//! make them durable and cut a torn tail. Every format decision lives in
//! `segstore_core`.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - tests, ephemeral stores, and segment data whose
//!   durability comes from the journal
//! - [`FileBackend`] - a single file opened for read + append
//!
//! ## Example
//!
//! ```rust
//! use segstore_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"event-1").unwrap();
//! assert_eq!(backend.read_at(offset, 7).unwrap(), b"event-1");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
