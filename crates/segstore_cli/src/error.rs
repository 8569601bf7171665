//! CLI error type.

use segstore_core::{ArgumentError, SegmentError};
use segstore_storage::StorageError;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// No store directory at the given path.
    #[error("no segment store found at {}", .0.display())]
    StoreNotFound(PathBuf),

    /// A command needs `--path`.
    #[error("store path required for {0}")]
    PathRequired(&'static str),

    /// Verification found problems.
    #[error("verification failed with {0} problem(s)")]
    VerificationFailed(usize),

    /// Rejected operation arguments.
    #[error(transparent)]
    Argument(#[from] ArgumentError),

    /// Engine error.
    #[error(transparent)]
    Segment(#[from] SegmentError),

    /// Storage error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// JSON output error.
    #[error("failed to render JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Runtime setup error.
    #[error("failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),
}
