//! Background tasks that drive the write and fetch paths.
//!
//! Wires up:
//! - A periodic flush task moving buffered records into the store
//! - A consume task handing persisted batches to a [`BatchHandler`]
//! - Graceful shutdown via a `watch` channel
//!
//! All store I/O runs on the blocking pool.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::buffer::Buffer;
use crate::config::Config;
use crate::storage::fetcher::Fetcher;
use crate::storage::pool::Store;
use crate::storage::writer::{FlushOutcome, Writer};
use crate::storage::StoreError;

/// Downstream consumer of fetched batches.
///
/// Returning `Ok` acknowledges the batch; an error puts it back in the
/// store for a later attempt.
pub trait BatchHandler: Send + Sync + 'static {
    fn handle(&self, payload: &str) -> anyhow::Result<()>;
}

/// What happened to the batch of one consume cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The handler succeeded and the deletion was committed.
    Acknowledged { id: i64 },
    /// The handler failed and the batch was rolled back into the store.
    Returned { id: i64 },
}

/// Components of a running spool.
pub struct Pipeline {
    pub store: Store,
    pub buffer: Arc<Buffer>,
    pub writer: Arc<Writer>,
    pub fetcher: Fetcher,
}

impl Pipeline {
    /// Open the store and build the buffer, writer and fetcher.
    pub fn open(config: &Config) -> anyhow::Result<Self> {
        config.validate()?;

        let store = Store::open_initialized(&config.db_path, config.store_config())?;
        let buffer = Arc::new(Buffer::new(config.buffer_capacity));
        let writer = Writer::new(store.clone(), buffer.clone(), config.batch_config())?;
        let fetcher = Fetcher::new(store.clone());

        let pool = store.state();
        tracing::info!(
            db_path = %config.db_path.display(),
            buffer_capacity = config.buffer_capacity,
            waiting_size = config.waiting_size,
            connections = pool.connections,
            idle_connections = pool.idle_connections,
            "Pipeline opened"
        );

        Ok(Self {
            store,
            buffer,
            writer: Arc::new(writer),
            fetcher,
        })
    }
}

/// Run one flush on the blocking pool.
pub async fn flush_once(writer: Arc<Writer>) -> Result<FlushOutcome, StoreError> {
    let outcome = tokio::task::spawn_blocking(move || writer.flush())
        .await
        .unwrap_or_else(|e| Err(StoreError::Panicked(e.to_string())));

    match &outcome {
        Ok(FlushOutcome::Written { id, records }) => {
            tracing::debug!(id, records, "Flush complete");
        }
        Ok(FlushOutcome::Skipped) => {}
        Err(e) => tracing::warn!(error = %e, "Flush failed, will retry"),
    }
    outcome
}

/// Run one fetch, handle, clean cycle on the blocking pool.
///
/// Sends `false` on `done` when the store has nothing to fetch.
pub async fn consume_once<H: BatchHandler>(
    fetcher: Fetcher,
    handler: Arc<H>,
    done: mpsc::UnboundedSender<bool>,
) -> Result<CycleOutcome, StoreError> {
    tokio::task::spawn_blocking(move || -> Result<CycleOutcome, StoreError> {
        let lease = fetcher.fetch(&done)?;
        let id = lease.id();

        let outcome = handler.handle(lease.payload());
        if let Err(e) = &outcome {
            let error = format!("{e:#}");
            tracing::warn!(id, %error, "Batch handler failed");
        }
        let acknowledged = outcome.is_ok();

        fetcher.clean(Some(lease), outcome)?;
        Ok(if acknowledged {
            CycleOutcome::Acknowledged { id }
        } else {
            CycleOutcome::Returned { id }
        })
    })
    .await
    // A panicking handler drops the lease, which rolls the batch back.
    .unwrap_or_else(|e| Err(StoreError::Panicked(e.to_string())))
}

/// Spawn the periodic flush task.
///
/// On shutdown the buffer is flushed until it is empty or a flush fails.
pub fn spawn_flusher(
    writer: Arc<Writer>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = flush_once(writer.clone()).await;
                }
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!(pending = writer.buffer().len(), "Flusher stopping, draining buffer");
        while !writer.buffer().is_empty() {
            match flush_once(writer.clone()).await {
                Ok(FlushOutcome::Written { .. }) => {}
                Ok(FlushOutcome::Skipped) | Err(_) => break,
            }
        }
    })
}

/// Delete `[]` rows left by empty flushes, on the blocking pool.
///
/// The fetch query skips such rows, so without this they accumulate when
/// empty batches are written.
pub async fn purge_empty(store: Store) -> Result<usize, StoreError> {
    let purged = tokio::task::spawn_blocking(move || store.purge_empty())
        .await
        .unwrap_or_else(|e| Err(StoreError::Panicked(e.to_string())));

    if let Err(e) = &purged {
        tracing::warn!(error = %e, "Could not purge empty batches");
    }
    purged
}

/// Spawn the consume task.
///
/// Cycles back-to-back while batches are available and sleeps for `idle`
/// after the store reports empty or a cycle fails. Each time the store
/// reports empty, and once more on shutdown, rows from empty flushes are
/// purged.
pub fn spawn_consumer<H: BatchHandler>(
    fetcher: Fetcher,
    handler: Arc<H>,
    idle: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        while !*shutdown.borrow() {
            let result = consume_once(fetcher.clone(), handler.clone(), done_tx.clone()).await;
            let drained = matches!(done_rx.try_recv(), Ok(false));

            match result {
                Ok(CycleOutcome::Acknowledged { .. }) if !drained => continue,
                Ok(_) => {}
                Err(e) if e.is_empty() => {}
                Err(e) => tracing::warn!(error = %e, "Consume cycle failed"),
            }

            if drained {
                let _ = purge_empty(fetcher.store().clone()).await;
            }

            tokio::select! {
                _ = tokio::time::sleep(idle) => {}
                _ = shutdown.changed() => break,
            }
        }

        let _ = purge_empty(fetcher.store().clone()).await;
        tracing::info!("Consumer stopped");
    })
}
