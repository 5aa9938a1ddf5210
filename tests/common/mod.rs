//! Test utilities for Batchspool integration tests.
//!
//! Provides:
//! - Temporary database fixtures
//! - Writer/fetcher wiring over a fresh store
//! - Row seeding helpers

#![allow(dead_code)]

use batchspool::observability::tracing::init_test_tracing;
use batchspool::{BatchConfig, Buffer, Fetcher, Store, StoreConfig, Writer};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Test fixture that manages a temporary database directory.
///
/// The directory is automatically cleaned up when the fixture is dropped.
pub struct TestFixture {
    /// Temporary directory for test database
    pub temp_dir: TempDir,
    /// Path to the database file
    pub db_path: PathBuf,
    pub store: Store,
}

impl TestFixture {
    /// Create a new fixture with an initialized, empty database.
    pub fn new() -> Self {
        Self::with_busy_timeout(Duration::from_secs(5))
    }

    pub fn with_busy_timeout(busy_timeout: Duration) -> Self {
        init_test_tracing();
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");
        let store = Store::open_initialized(
            &db_path,
            StoreConfig {
                pool_size: 4,
                busy_timeout,
            },
        )
        .expect("failed to open store");
        Self {
            temp_dir,
            db_path,
            store,
        }
    }

    /// Writer over a fresh buffer of `capacity` records.
    pub fn writer(&self, capacity: usize, waiting_size: usize) -> Writer {
        Writer::new(
            self.store.clone(),
            Arc::new(Buffer::new(capacity)),
            BatchConfig::from_config(waiting_size, false),
        )
        .expect("invalid writer config")
    }

    pub fn fetcher(&self) -> Fetcher {
        Fetcher::new(self.store.clone())
    }

    /// Insert a batch row directly, returning its id.
    pub fn seed(&self, json: &str) -> i64 {
        let conn = self.store.connection().expect("connection");
        conn.execute("INSERT INTO persistence(json) VALUES (?1)", [json])
            .expect("seed insert failed");
        conn.last_insert_rowid()
    }

    pub fn count(&self) -> i64 {
        self.store.count().expect("count failed")
    }

    /// Make every subsequent insert fail.
    pub fn break_table(&self) {
        self.store
            .connection()
            .expect("connection")
            .execute_batch("DROP TABLE persistence")
            .expect("drop failed");
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a batch payload made of plain string records.
pub fn decode(payload: &str) -> Vec<String> {
    serde_json::from_str(payload).expect("payload is not a JSON array of strings")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_creates_temp_dir() {
        let fixture = TestFixture::new();
        assert!(fixture.temp_dir.path().exists());
        assert_eq!(fixture.count(), 0);
    }
}
