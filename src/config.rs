//! Configuration parsing for Batchspool.
//!
//! Supports:
//! - CLI arguments via clap
//! - Environment variable overrides
//! - Sensible defaults for quick start

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::storage::batch::BatchConfig;
use crate::storage::pool::StoreConfig;

/// Error type for invalid configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("buffer capacity ({capacity}) must exceed waiting size ({waiting_size})")]
    CapacityTooSmall { capacity: usize, waiting_size: usize },
}

/// Batchspool: a crash-tolerant staging buffer backed by SQLite.
#[derive(Parser, Debug, Clone)]
#[command(name = "batchspool")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// SQLite database file holding persisted batches
    #[arg(short, long, env = "BATCHSPOOL_DB_PATH", default_value = "./data/batchspool.db")]
    pub db_path: PathBuf,

    /// Maximum number of records held in memory (backpressure control)
    #[arg(long, env = "BATCHSPOOL_BUFFER_CAPACITY", default_value_t = 1000)]
    pub buffer_capacity: usize,

    /// Maximum number of records coalesced into one batch
    #[arg(short, long, env = "BATCHSPOOL_WAITING_SIZE", default_value_t = 100)]
    pub waiting_size: usize,

    /// Interval between buffer flushes in milliseconds
    #[arg(long, env = "BATCHSPOOL_FLUSH_INTERVAL_MS", default_value_t = 1000)]
    pub flush_interval_ms: u64,

    /// Pause after finding no batch to consume, in milliseconds
    #[arg(long, env = "BATCHSPOOL_IDLE_INTERVAL_MS", default_value_t = 500)]
    pub idle_interval_ms: u64,

    /// Size of the SQLite connection pool
    #[arg(long, env = "BATCHSPOOL_POOL_SIZE", default_value_t = 4)]
    pub pool_size: u32,

    /// How long a statement waits on a locked database, in milliseconds
    #[arg(long, env = "BATCHSPOOL_BUSY_TIMEOUT_MS", default_value_t = 5000)]
    pub busy_timeout_ms: u64,

    /// Persist an empty batch when a flush finds no records
    #[arg(long, env = "BATCHSPOOL_WRITE_EMPTY_BATCHES")]
    pub write_empty_batches: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "BATCHSPOOL_LOG_JSON")]
    pub log_json: bool,
}

impl Config {
    /// Parse configuration from CLI arguments and environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Check sizes that would otherwise fail at runtime.
    ///
    /// The buffer must hold more than one batch: a failed flush pushes
    /// the whole batch back and would block forever otherwise.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_capacity == 0 {
            return Err(ConfigError::Zero("buffer capacity"));
        }
        if self.waiting_size == 0 {
            return Err(ConfigError::Zero("waiting size"));
        }
        if self.pool_size == 0 {
            return Err(ConfigError::Zero("pool size"));
        }
        if self.buffer_capacity <= self.waiting_size {
            return Err(ConfigError::CapacityTooSmall {
                capacity: self.buffer_capacity,
                waiting_size: self.waiting_size,
            });
        }
        Ok(())
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig::from_config(self.waiting_size, self.write_empty_batches)
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            pool_size: self.pool_size,
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
        }
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    /// Create a default configuration for testing.
    #[cfg(test)]
    pub fn test_config(db_path: PathBuf) -> Self {
        Self {
            db_path,
            buffer_capacity: 16,
            waiting_size: 4,
            flush_interval_ms: 10,
            idle_interval_ms: 10,
            pool_size: 4,
            busy_timeout_ms: 1000,
            write_empty_batches: false,
            log_level: "debug".into(),
            log_json: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/batchspool.db"),
            buffer_capacity: 1000,
            waiting_size: 100,
            flush_interval_ms: 1000,
            idle_interval_ms: 500,
            pool_size: 4,
            busy_timeout_ms: 5000,
            write_empty_batches: false,
            log_level: "info".into(),
            log_json: false,
        }
    }
}
