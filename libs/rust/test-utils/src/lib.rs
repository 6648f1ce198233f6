//! Shared test utilities for the pact mock engine.
//!
//! This crate provides:
//! - Proptest generators for interactions and bodies
//! - Pact documents and registries used across test suites
//! - An in-process fake plugin and connector

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod plugin;

pub use generators::*;

/// Install a test-captured tracing subscriber once per process.
pub fn init_test_tracing() {
    rust_common::init_tracing(
        &rust_common::TracingConfig::default()
            .with_log_level("debug")
            .for_tests(),
    );
}
