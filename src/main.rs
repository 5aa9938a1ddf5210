//! Batchspool: spool newline-delimited records through SQLite.
//!
//! # Usage
//!
//! ```bash
//! producer | batchspool --db-path ./data/spool.db --waiting-size 100
//! ```
//!
//! Each stdin line becomes one record. Persisted batches are written to
//! stdout as JSON arrays, one per line, and acknowledged once written.
//! At end of input the remaining batches are delivered before exiting;
//! on SIGINT/SIGTERM they stay in the database for the next run.
//!
//! Environment variables can also be used:
//! - `BATCHSPOOL_DB_PATH`: SQLite database file
//! - `BATCHSPOOL_WAITING_SIZE`: Records per batch
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)

use anyhow::Context;
use batchspool::config::Config;
use batchspool::observability::tracing::init_tracing;
use batchspool::pipeline::{spawn_consumer, spawn_flusher, BatchHandler, Pipeline};
use batchspool::storage::pool::Store;
use batchspool::storage::StoreError;
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};

/// Writes each batch as one line on stdout.
struct StdoutHandler;

impl BatchHandler for StdoutHandler {
    fn handle(&self, payload: &str) -> anyhow::Result<()> {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{payload}")?;
        stdout.flush()?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse configuration from CLI arguments and environment
    let config = Config::parse_args();

    // Initialize tracing/logging
    init_tracing(&config.log_level, config.log_json);

    // Ensure the database directory exists
    if let Some(dir) = config.db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating data directory {}", dir.display()))?;
    }

    let pipeline = Pipeline::open(&config)?;

    // Separate signals so end of input can drain the store before stopping the consumer
    let (flush_tx, flush_rx) = watch::channel(false);
    let (consume_tx, consume_rx) = watch::channel(false);

    let flusher = spawn_flusher(pipeline.writer.clone(), config.flush_interval(), flush_rx);
    let consumer = spawn_consumer(
        pipeline.fetcher.clone(),
        Arc::new(StdoutHandler),
        config.idle_interval(),
        consume_rx,
    );

    // Feed stdin into the buffer until EOF. A plain thread, so a pending
    // read never holds up runtime shutdown.
    let buffer = pipeline.buffer.clone();
    let (input_closed_tx, input_closed) = oneshot::channel();
    std::thread::Builder::new()
        .name("batchspool-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => buffer.blocking_enqueue(line),
                    Err(e) => {
                        tracing::warn!(error = %e, "Could not read input");
                        break;
                    }
                }
            }
            tracing::info!("Input closed");
            let _ = input_closed_tx.send(());
        })
        .context("spawning input thread")?;

    let signal = shutdown_signal();
    tokio::pin!(signal);

    // Wait for SIGTERM, SIGINT (Ctrl+C) or end of input
    let interrupted = tokio::select! {
        _ = &mut signal => true,
        _ = input_closed => false,
    };

    let _ = flush_tx.send(true);
    flusher.await?;

    if !interrupted {
        // Deliver what the final flush persisted unless a signal arrives first
        tokio::select! {
            _ = &mut signal => {}
            result = wait_until_drained(&pipeline.store, config.idle_interval()) => result?,
        }
    }

    let _ = consume_tx.send(true);
    consumer.await?;

    tracing::info!(
        remaining = pipeline.store.count()?,
        "Batchspool shutdown complete"
    );
    Ok(())
}

/// Poll until the store holds no batches.
async fn wait_until_drained(store: &Store, poll: Duration) -> anyhow::Result<()> {
    loop {
        let store = store.clone();
        let remaining = tokio::task::spawn_blocking(move || -> Result<i64, StoreError> {
            store.purge_empty()?;
            store.count()
        })
        .await??;
        if remaining == 0 {
            return Ok(());
        }
        tokio::time::sleep(poll).await;
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::warn!(error = %e, "Could not install SIGTERM handler");
                let _ = ctrl_c.await;
                return;
            }
        };

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown...");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        tracing::info!("Received Ctrl+C, initiating shutdown...");
    }
}
