//! Logging infrastructure.
//!
//! Provides structured tracing output for the write and fetch paths.

pub mod tracing;
