//! Shared cross-cutting concerns for the pact mock engine.
//!
//! This crate provides:
//! - Tracing subscriber setup with env-filter and JSON output
//! - Retry policies with exponential backoff for out-of-process calls

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod retry;
pub mod tracing_config;

pub use retry::{RetryConfig, RetryPolicy, Retryable};
pub use tracing_config::{TracingConfig, init_tracing, try_init_tracing};
