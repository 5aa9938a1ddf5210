//! SQLite storage layer for Batchspool.
//!
//! Provides:
//! - Connection pool with per-connection pragmas
//! - Schema initialization
//! - Transaction scope with guaranteed commit/rollback
//! - Batch writer with requeue on failure
//! - Two-phase fetcher for downstream consumption

pub mod batch;
pub mod fetcher;
pub mod pool;
pub mod schema;
pub mod transaction;
pub mod writer;

use thiserror::Error;

/// Error type for storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to check out connection: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Could not begin the transaction: {0}")]
    Begin(#[source] rusqlite::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Could not commit the transaction: {0}")]
    Commit(#[source] rusqlite::Error),

    /// Rollback failed; `cause` is the error that triggered the rollback.
    #[error("Could not roll back after [{cause}]: {source}")]
    Rollback {
        cause: Box<StoreError>,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Unit of work panicked: {0}")]
    Panicked(String),

    /// The caller reported a processing failure when finalizing a fetch.
    #[error("Batch processing failed: {0}")]
    Aborted(String),

    #[error("Received empty rows")]
    Empty,

    #[error("Could not encode batch: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether this error only means "nothing to fetch".
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}
