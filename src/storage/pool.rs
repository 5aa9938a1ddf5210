//! Connection pool shared by the write and fetch paths.
//!
//! Uses r2d2 with r2d2_sqlite. Every connection gets the durability
//! pragmas and busy timeout when it is acquired, so an open fetch lease
//! makes concurrent writers wait instead of failing immediately.

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use std::time::Duration;

use super::schema::{apply_pragmas, count_batches, initialize_schema, purge_empty_batches};
use super::StoreError;

/// A connection checked out of the [`Store`] pool.
pub type Connection = PooledConnection<SqliteConnectionManager>;

/// Pool settings.
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    /// Maximum number of pooled connections
    pub pool_size: u32,
    /// How long a statement waits on a locked database before failing
    pub busy_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Pooled handle to the SQLite database holding persisted batches.
#[derive(Clone)]
pub struct Store {
    pool: Pool<SqliteConnectionManager>,
}

impl Store {
    /// Open a pool for the database at `db_path`, creating the file if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be created.
    pub fn open<P: AsRef<Path>>(db_path: P, config: StoreConfig) -> Result<Self, StoreError> {
        let manager = SqliteConnectionManager::file(db_path);

        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_customizer(Box::new(PragmaCustomizer {
                busy_timeout: config.busy_timeout,
            }))
            .build(manager)?;

        Ok(Self { pool })
    }

    /// Open the pool and make sure the schema exists.
    pub fn open_initialized<P: AsRef<Path>>(
        db_path: P,
        config: StoreConfig,
    ) -> Result<Self, StoreError> {
        let store = Self::open(db_path, config)?;
        store.initialize()?;
        Ok(store)
    }

    /// Get a connection from the pool.
    pub fn connection(&self) -> Result<Connection, StoreError> {
        Ok(self.pool.get()?)
    }

    /// Create the persistence table if missing.
    pub fn initialize(&self) -> Result<(), StoreError> {
        let conn = self.connection()?;
        initialize_schema(&conn)?;
        Ok(())
    }

    /// Number of stored batches.
    pub fn count(&self) -> Result<i64, StoreError> {
        let conn = self.connection()?;
        Ok(count_batches(&conn)?)
    }

    /// Remove rows written by empty flushes.
    pub fn purge_empty(&self) -> Result<usize, StoreError> {
        let conn = self.connection()?;
        let purged = purge_empty_batches(&conn)?;
        if purged > 0 {
            tracing::debug!(purged, "Purged empty batches");
        }
        Ok(purged)
    }

    /// Get the current pool state for monitoring.
    pub fn state(&self) -> r2d2::State {
        self.pool.state()
    }
}

/// Connection customizer that applies pragmas on acquire.
#[derive(Debug)]
struct PragmaCustomizer {
    busy_timeout: Duration,
}

impl r2d2::CustomizeConnection<rusqlite::Connection, rusqlite::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut rusqlite::Connection) -> Result<(), rusqlite::Error> {
        apply_pragmas(conn, self.busy_timeout)
    }
}
