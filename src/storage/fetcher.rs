//! Two-phase dequeue of persisted batches.
//!
//! [`Fetcher::fetch`] opens a transaction, takes the database write lock,
//! reads the oldest batch and deletes it, all without committing. The
//! returned [`BatchLease`] owns that open transaction. The caller
//! processes the payload and then finalizes the lease: commit makes the
//! removal durable, rollback puts the row back. A lease that is dropped
//! without being finalized rolls back, so a batch whose consumer dies
//! mid-way is delivered again.
//!
//! SQLite has no `SELECT ... FOR UPDATE`; `BEGIN IMMEDIATE` takes the
//! write lock up front, so concurrent fetchers queue on the busy timeout
//! instead of reading the same row.

use rusqlite::OptionalExtension;
use std::fmt::Display;
use tokio::sync::mpsc::UnboundedSender;

use super::pool::{Connection, Store};
use super::StoreError;

const SELECT_OLDEST: &str = "SELECT id, json FROM persistence \
     WHERE json NOT IN ('', '[]') ORDER BY id ASC LIMIT 1";

const DELETE_BY_ID: &str = "DELETE FROM persistence WHERE id = ?1";

/// Reads persisted batches for downstream consumption.
#[derive(Clone)]
pub struct Fetcher {
    store: Store,
}

impl Fetcher {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Store this fetcher reads from.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Lock, read and tentatively delete the oldest batch.
    ///
    /// When there is nothing to fetch the transaction is rolled back,
    /// `false` is sent on `done` and [`StoreError::Empty`] is returned.
    ///
    /// Blocks on database I/O, including waiting for another lease to be
    /// finalized.
    pub fn fetch(&self, done: &UnboundedSender<bool>) -> Result<BatchLease, StoreError> {
        let conn = self.store.connection()?;
        let mut tx = OpenTransaction::begin(conn)?;

        let row = tx
            .conn
            .query_row(SELECT_OLDEST, [], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .optional()
            .map_err(|e| {
                tracing::warn!(error = %e, "Could not fetch rows from the database");
                StoreError::Database(e)
            })?;

        let Some((id, payload)) = row else {
            if let Err(e) = tx.finish("ROLLBACK") {
                tracing::warn!(error = %e, "Could not roll back the transaction");
            }
            // The receiver may be gone; the error return still reports emptiness.
            let _ = done.send(false);
            return Err(StoreError::Empty);
        };

        tx.conn.execute(DELETE_BY_ID, [id]).map_err(|e| {
            tracing::warn!(id, error = %e, "Could not delete the row");
            StoreError::Database(e)
        })?;

        tracing::debug!(id, bytes = payload.len(), "Batch fetched");
        Ok(BatchLease { tx, id, payload })
    }

    /// Finalize a lease from a prior [`Fetcher::fetch`].
    ///
    /// Commits when `outcome` is `Ok`, rolls back otherwise. A `None`
    /// lease means no fetch is pending, and the call does nothing.
    pub fn clean<E: Display>(
        &self,
        lease: Option<BatchLease>,
        outcome: Result<(), E>,
    ) -> Result<(), StoreError> {
        match lease {
            Some(lease) => lease.clean(outcome),
            None => Ok(()),
        }
    }
}

/// A fetched batch whose deletion is not yet committed.
///
/// Holds a pooled connection with an open transaction and the database
/// write lock until it is finalized or dropped.
pub struct BatchLease {
    tx: OpenTransaction,
    id: i64,
    payload: String,
}

impl BatchLease {
    /// Row id of the fetched batch.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// JSON-array payload of the fetched batch.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Make the deletion durable.
    pub fn commit(mut self) -> Result<(), StoreError> {
        self.tx.finish("COMMIT").map_err(|e| {
            tracing::warn!(id = self.id, error = %e, "Could not commit the transaction");
            StoreError::Commit(e)
        })?;
        tracing::debug!(id = self.id, "Batch acknowledged");
        Ok(())
    }

    /// Undo the deletion so the batch can be fetched again.
    pub fn rollback(mut self) -> Result<(), StoreError> {
        self.tx.finish("ROLLBACK").map_err(|e| {
            tracing::warn!(id = self.id, error = %e, "Could not roll back the transaction");
            StoreError::Database(e)
        })
    }

    /// Commit on `Ok`, roll back on `Err`.
    ///
    /// A failed rollback is reported with the processing error as its cause.
    pub fn clean<E: Display>(mut self, outcome: Result<(), E>) -> Result<(), StoreError> {
        match outcome {
            Ok(()) => self.commit(),
            Err(cause) => {
                tracing::debug!(id = self.id, error = %cause, "Returning batch to the store");
                self.tx.finish("ROLLBACK").map_err(|e| {
                    tracing::warn!(id = self.id, error = %e, "Could not roll back the transaction");
                    StoreError::Rollback {
                        cause: Box::new(StoreError::Aborted(cause.to_string())),
                        source: e,
                    }
                })
            }
        }
    }

    /// Take the payload, leaving the lease able to finalize.
    pub fn take_payload(&mut self) -> String {
        std::mem::take(&mut self.payload)
    }
}

impl std::fmt::Debug for BatchLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchLease")
            .field("id", &self.id)
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}

/// Transaction opened with a raw `BEGIN` on an owned pooled connection.
///
/// Rolls back on drop unless [`OpenTransaction::finish`] succeeded, so
/// the connection never returns to the pool mid-transaction.
struct OpenTransaction {
    conn: Connection,
    open: bool,
}

impl OpenTransaction {
    fn begin(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("BEGIN IMMEDIATE").map_err(|e| {
            tracing::warn!(error = %e, "Could not begin the transaction");
            StoreError::Begin(e)
        })?;
        Ok(Self { conn, open: true })
    }

    /// Run `COMMIT` or `ROLLBACK`. Stays open if the statement fails.
    fn finish(&mut self, statement: &str) -> rusqlite::Result<()> {
        if !self.open {
            return Ok(());
        }
        self.conn.execute_batch(statement)?;
        self.open = false;
        Ok(())
    }
}

impl Drop for OpenTransaction {
    fn drop(&mut self) {
        if !self.open || self.conn.is_autocommit() {
            return;
        }
        tracing::info!("Unfinalized fetch transaction dropped, rolling back");
        if let Err(e) = self.conn.execute_batch("ROLLBACK") {
            tracing::warn!(error = %e, "Could not roll back the transaction");
        }
    }
}
