//! Batchspool: a crash-tolerant staging buffer backed by SQLite.
//!
//! Records are collected in a bounded in-memory buffer, periodically
//! coalesced into a JSON-array batch and persisted in one transaction.
//! A separate path dequeues the oldest batch under the database write
//! lock and only deletes it for good once the consumer acknowledges it,
//! giving At-Least-Once delivery on both paths.
//!
//! # Architecture
//!
//! - **Backpressure**: producers wait when the buffer is full; nothing is dropped
//! - **Requeue on failure**: a failed flush puts its records back in the buffer
//! - **Two-phase dequeue**: fetch returns a lease, clean commits or rolls it back
//! - **Durable**: batches survive crashes with WAL and `synchronous=FULL`
//!
//! # Modules
//!
//! - [`buffer`]: Bounded record buffer
//! - [`config`]: CLI and environment configuration
//! - [`observability`]: Tracing setup
//! - [`pipeline`]: Background flush and consume tasks
//! - [`storage`]: SQLite persistence layer

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions,    // storage::StoreError is fine
    clippy::must_use_candidate,         // Not all functions need #[must_use]
    clippy::missing_errors_doc,         // Error docs can be verbose
    clippy::missing_panics_doc,         // Panic docs can be verbose
    clippy::needless_raw_string_hashes  // r#""# is fine for SQL
)]

pub mod buffer;
pub mod config;
pub mod observability;
pub mod pipeline;
pub mod storage;

pub use buffer::{Buffer, BufferError};
pub use pipeline::{BatchHandler, CycleOutcome, Pipeline};
pub use storage::batch::BatchConfig;
pub use storage::fetcher::{BatchLease, Fetcher};
pub use storage::pool::{Store, StoreConfig};
pub use storage::writer::{FlushOutcome, Writer};
pub use storage::StoreError;
