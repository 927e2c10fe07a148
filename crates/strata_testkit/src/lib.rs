//! # Strata Testkit
//!
//! Test utilities for Strata.
//!
//! This crate provides:
//! - Fixture persistent types covering relations, inheritance and every
//!   scalar field type
//! - A store harness bound to an in-memory backend
//! - Property-based test generators using proptest
//! - Logging setup for test binaries
//!
//! ## Usage
//!
//! ```rust,ignore
//! use strata_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_store() {
//!     let mut harness = TestStore::music();
//!     let ptr = harness.store.insert(Track::titled("Intro")).unwrap();
//!     // ... test operations
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_tracing;
    pub use crate::integration::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Installs a test-friendly `tracing` subscriber once per process.
///
/// The filter is read from `STRATA_LOG`, then `RUST_LOG`, and defaults to
/// `warn`. Output goes through the test harness's captured writer.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_env("STRATA_LOG")
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
