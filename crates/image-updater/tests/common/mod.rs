//! Shared test utilities for image-updater integration tests.
//!
//! This module provides:
//! - `TestHarness` with a local bare remote seeded with manifests
//! - Event and rule builders for the common scenario

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
