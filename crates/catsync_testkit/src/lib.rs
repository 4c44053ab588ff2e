//! # catsync Testkit
//!
//! Test utilities for catsync.
//!
//! This crate provides:
//! - Fixtures pinned to a fixed epoch
//! - Property-based test generators using proptest
//! - An in-process host that drives both dispatch phases
//!
//! ## Usage
//!
//! ```rust,ignore
//! use catsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn mirrors_new_records() {
//!     let harness = MirrorHarness::new();
//!     let outcomes = harness.create(t_shirt("1")).await.unwrap();
//!     assert_eq!(harness.remote.len(), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod harness;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::harness::*;
}

pub use fixtures::*;
pub use generators::*;
pub use harness::*;
