//! Read-only view of a store directory.
//!
//! Commands never write to the store. The directory lock is held while the
//! files are copied into memory, and everything after that, including
//! replay and torn-tail handling, works on the copies.

use crate::error::{CliError, CliResult};
use segstore_core::dir::StoreDir;
use segstore_core::{PersistentAttributeStore, SegmentStore, StoreConfig};
use segstore_storage::{FileBackend, InMemoryBackend, StorageBackend};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// In-memory copies of a store's files.
pub struct StoreSnapshot {
    /// Store directory.
    pub path: PathBuf,
    /// Journal bytes.
    pub journal: Vec<u8>,
    /// Attribute index bytes.
    pub attributes: Vec<u8>,
}

impl StoreSnapshot {
    /// Locks the store directory and copies its files.
    pub fn load(path: &Path) -> CliResult<Self> {
        if !path.is_dir() {
            return Err(CliError::StoreNotFound(path.to_path_buf()));
        }
        let dir = StoreDir::open(path, false)?;
        if dir.is_new() {
            return Err(CliError::StoreNotFound(path.to_path_buf()));
        }
        Ok(Self {
            path: path.to_path_buf(),
            journal: read_file(&dir.journal_path())?,
            attributes: read_file(&dir.attributes_path())?,
        })
    }

    /// Opens an in-memory store over the copies, replaying the journal.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn open_store(&self) -> CliResult<SegmentStore> {
        let attributes = PersistentAttributeStore::open(
            Box::new(InMemoryBackend::with_data(self.attributes.clone())),
            false,
        )?;
        let store = SegmentStore::open_with_backends(
            StoreConfig::default().sync_on_commit(false),
            Box::new(InMemoryBackend::with_data(self.journal.clone())),
            Arc::new(attributes),
        )?;
        Ok(store)
    }
}

fn read_file(path: &Path) -> CliResult<Vec<u8>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let backend = FileBackend::open(path)?;
    let size = backend.size()?;
    let len = usize::try_from(size).unwrap_or(usize::MAX);
    Ok(backend.read_at(0, len)?)
}

/// Builds the single-threaded runtime commands run on.
pub fn runtime() -> CliResult<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread().enable_all().build()?)
}
