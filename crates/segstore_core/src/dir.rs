//! Store directory management.
//!
//! ```text
//! <store_path>/
//! ├─ LOCK              # Advisory lock for single-process access
//! ├─ journal.log       # Operation journal
//! └─ attributes.idx    # Persisted extended attribute index
//! ```
//!
//! The LOCK file ensures only one process opens the store at a time.

use crate::error::{SegmentError, SegmentResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
/// File name of the operation journal.
pub const JOURNAL_FILE: &str = "journal.log";
/// File name of the attribute index.
pub const ATTRIBUTES_FILE: &str = "attributes.idx";

/// An exclusively locked store directory.
///
/// The lock is released when the value is dropped.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens or creates a store directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - The path is not a directory
    /// - Another process holds the lock (`StoreLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> SegmentResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path).map_err(segstore_storage::StorageError::from)?;
            } else {
                return Err(SegmentError::internal(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }
        if !path.is_dir() {
            return Err(SegmentError::internal(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))
            .map_err(segstore_storage::StorageError::from)?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(SegmentError::StoreLocked {
                path: path.display().to_string(),
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// The directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the operation journal.
    #[must_use]
    pub fn journal_path(&self) -> PathBuf {
        self.path.join(JOURNAL_FILE)
    }

    /// Path of the attribute index.
    #[must_use]
    pub fn attributes_path(&self) -> PathBuf {
        self.path.join(ATTRIBUTES_FILE)
    }

    /// Returns true if no journal has been written yet.
    #[must_use]
    pub fn is_new(&self) -> bool {
        !self.journal_path().exists()
    }
}
