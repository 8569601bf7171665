//! # Segstore Testkit
//!
//! Test utilities for segstore.
//!
//! This crate provides:
//! - Store fixtures backed by memory or a temporary directory
//! - Property-based generators for names, payloads and attribute updates
//! - A crash harness that tears or damages the journal between reopens
//! - Concurrent append workloads for stress testing
//!
//! ## Usage
//!
//! ```rust,ignore
//! use segstore_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn survives_reopen() {
//!     let mut store = TestStore::file();
//!     store.create("s").await;
//!     store.reopen();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use stress::*;
