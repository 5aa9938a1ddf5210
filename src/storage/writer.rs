//! Batch writer that persists one row per flush.
//!
//! Each [`Writer::flush`] drains up to `waiting_size` records, renders
//! them as a JSON array and inserts that array in a single transaction.
//! If anything fails, the drained records go back into the buffer so a
//! later flush can retry them.

use std::sync::Arc;
use thiserror::Error;

use super::batch::{encode_batch, BatchConfig};
use super::pool::Store;
use super::transaction::with_transaction;
use super::StoreError;
use crate::buffer::Buffer;

/// Error raised when a writer is configured so that requeueing could deadlock.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("buffer capacity {capacity} must exceed waiting size {waiting_size}")]
pub struct CapacityError {
    pub capacity: usize,
    pub waiting_size: usize,
}

/// Result of a flush that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// A batch row was inserted.
    Written { id: i64, records: usize },
    /// The buffer was empty and empty batches are not written.
    Skipped,
}

/// Coalesces buffered records into persisted batches.
pub struct Writer {
    store: Store,
    buffer: Arc<Buffer>,
    config: BatchConfig,
}

impl Writer {
    /// Create a writer draining `buffer` into `store`.
    ///
    /// # Errors
    ///
    /// Fails if the buffer cannot hold a full batch on top of one more
    /// record, since a failed flush pushes the whole batch back.
    pub fn new(store: Store, buffer: Arc<Buffer>, config: BatchConfig) -> Result<Self, CapacityError> {
        if buffer.capacity() <= config.waiting_size {
            return Err(CapacityError {
                capacity: buffer.capacity(),
                waiting_size: config.waiting_size,
            });
        }

        Ok(Self {
            store,
            buffer,
            config,
        })
    }

    /// Buffer this writer drains.
    pub fn buffer(&self) -> &Arc<Buffer> {
        &self.buffer
    }

    /// Drain, encode and persist one batch.
    ///
    /// Blocks on database I/O, and while requeueing if producers have
    /// refilled the buffer in the meantime. Call it from a blocking
    /// context.
    ///
    /// # Errors
    ///
    /// Returns the storage error that aborted the flush. By the time it
    /// returns, every drained record is back in the buffer.
    pub fn flush(&self) -> Result<FlushOutcome, StoreError> {
        let records = self.buffer.drain(self.config.waiting_size);

        if records.is_empty() && !self.config.write_empty_batches {
            return Ok(FlushOutcome::Skipped);
        }

        match self.persist(&records) {
            Ok(id) => {
                tracing::debug!(id, records = records.len(), "Batch persisted");
                Ok(FlushOutcome::Written {
                    id,
                    records: records.len(),
                })
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    records = records.len(),
                    "Could not store the batch, restoring records"
                );
                self.restore(records);
                Err(e)
            }
        }
    }

    fn persist(&self, records: &[String]) -> Result<i64, StoreError> {
        let payload = encode_batch(records)?;
        let mut conn = self.store.connection()?;

        with_transaction(&mut conn, "write", |tx| {
            tx.execute("INSERT INTO persistence(json) VALUES (?1)", [&payload])?;
            Ok(tx.last_insert_rowid())
        })
    }

    fn restore(&self, records: Vec<String>) {
        for record in records {
            self.buffer.blocking_enqueue(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::pool::StoreConfig;
    use tempfile::TempDir;

    fn setup(capacity: usize, config: BatchConfig) -> (TempDir, Store, Writer) {
        let temp_dir = TempDir::new().unwrap();
        let store =
            Store::open_initialized(temp_dir.path().join("test.db"), StoreConfig::default())
                .unwrap();
        let writer = Writer::new(store.clone(), Arc::new(Buffer::new(capacity)), config).unwrap();
        (temp_dir, store, writer)
    }

    fn payloads(store: &Store) -> Vec<String> {
        let conn = store.connection().unwrap();
        let mut stmt = conn
            .prepare("SELECT json FROM persistence ORDER BY id")
            .unwrap();
        let rows = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<String>, _>>()
            .unwrap();
        rows
    }

    #[test]
    fn test_capacity_must_exceed_waiting_size() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path().join("test.db"), StoreConfig::default()).unwrap();

        let err = Writer::new(store, Arc::new(Buffer::new(3)), BatchConfig::from_config(3, false))
            .err()
            .unwrap();
        assert_eq!(
            err,
            CapacityError {
                capacity: 3,
                waiting_size: 3
            }
        );
    }

    #[test]
    fn test_flush_writes_one_row() {
        let (_dir, store, writer) = setup(10, BatchConfig::from_config(3, false));
        for record in ["a", "b", "c", "d"] {
            writer.buffer().try_enqueue(record.into()).unwrap();
        }

        let outcome = writer.flush().unwrap();
        assert_eq!(outcome, FlushOutcome::Written { id: 1, records: 3 });
        assert_eq!(payloads(&store), vec![r#"["a","b","c"]"#]);
        assert_eq!(writer.buffer().drain(10), vec!["d"]);
    }

    #[test]
    fn test_empty_flush_is_skipped_by_default() {
        let (_dir, store, writer) = setup(10, BatchConfig::from_config(3, false));

        assert_eq!(writer.flush().unwrap(), FlushOutcome::Skipped);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_empty_flush_writes_heartbeat_when_enabled() {
        let (_dir, store, writer) = setup(10, BatchConfig::from_config(3, true));

        assert_eq!(
            writer.flush().unwrap(),
            FlushOutcome::Written { id: 1, records: 0 }
        );
        assert_eq!(payloads(&store), vec!["[]"]);
    }

    #[test]
    fn test_failed_flush_restores_records() {
        let (_dir, store, writer) = setup(10, BatchConfig::from_config(5, false));
        for record in ["x", "y", "z"] {
            writer.buffer().try_enqueue(record.into()).unwrap();
        }
        store
            .connection()
            .unwrap()
            .execute_batch("DROP TABLE persistence")
            .unwrap();

        let err = writer.flush().unwrap_err();
        assert!(matches!(err, StoreError::Database(_)), "got {err:?}");

        let mut restored = writer.buffer().drain(10);
        restored.sort();
        assert_eq!(restored, vec!["x", "y", "z"]);
    }
}
