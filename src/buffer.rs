//! Bounded in-memory record buffer.
//!
//! Producers push serialized records and the writer drains them in
//! batches. The buffer applies backpressure when full instead of
//! dropping records.

use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};

/// Error type for buffer operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    /// The buffer is at capacity; the rejected record is handed back.
    #[error("buffer is full")]
    Full(String),
}

impl BufferError {
    /// Recover the record that could not be enqueued.
    pub fn into_record(self) -> String {
        match self {
            Self::Full(record) => record,
        }
    }
}

/// Bounded FIFO of opaque record strings.
///
/// An empty string is a sentinel a producer may push to signal "no data
/// right now". Sentinels are discarded by [`Buffer::drain`].
#[derive(Debug)]
pub struct Buffer {
    sender: Sender<String>,
    receiver: Mutex<Receiver<String>>,
}

impl Buffer {
    /// Create a buffer holding at most `capacity` records.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    /// Enqueue a record, waiting for free capacity.
    ///
    /// Cannot fail: the receiving half lives as long as the buffer.
    pub async fn enqueue(&self, record: String) {
        let _ = self.sender.send(record).await;
    }

    /// Enqueue a record from synchronous code, blocking the thread while full.
    ///
    /// Must not be called from within an async execution context; use
    /// `spawn_blocking` there. Cannot fail, like [`Buffer::enqueue`].
    pub fn blocking_enqueue(&self, record: String) {
        let _ = self.sender.blocking_send(record);
    }

    /// Enqueue a record without waiting.
    pub fn try_enqueue(&self, record: String) -> Result<(), BufferError> {
        self.sender.try_send(record).map_err(|e| match e {
            TrySendError::Full(record) | TrySendError::Closed(record) => BufferError::Full(record),
        })
    }

    /// Remove up to `max` records without blocking.
    ///
    /// Only records present when the call starts are considered, so
    /// concurrent producers cannot stretch a drain. Stops early once the
    /// buffer is observed empty. Sentinels are dropped and do not count
    /// toward `max`.
    pub fn drain(&self, max: usize) -> Vec<String> {
        let mut receiver = self.receiver.lock().unwrap_or_else(PoisonError::into_inner);
        let present = self.len();
        let mut records = Vec::with_capacity(max.min(present));

        for _ in 0..present {
            if records.len() >= max {
                break;
            }
            match receiver.try_recv() {
                Ok(record) if record.is_empty() => continue,
                Ok(record) => records.push(record),
                Err(_) => break,
            }
        }

        records
    }

    /// Number of records currently held, sentinels included.
    pub fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of records the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(capacity: usize, records: &[&str]) -> Buffer {
        let buffer = Buffer::new(capacity);
        for record in records {
            buffer.try_enqueue((*record).to_string()).unwrap();
        }
        buffer
    }

    #[test]
    fn test_drain_respects_max() {
        let buffer = filled(10, &["a", "b", "c", "d"]);

        assert_eq!(buffer.drain(3), vec!["a", "b", "c"]);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.drain(3), vec!["d"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_drain_stops_when_empty() {
        let buffer = filled(10, &["a"]);
        assert_eq!(buffer.drain(100), vec!["a"]);
        assert!(buffer.drain(100).is_empty());
    }

    #[test]
    fn test_drain_zero_takes_nothing() {
        let buffer = filled(4, &["a", "b"]);
        assert!(buffer.drain(0).is_empty());
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_sentinels_are_discarded_and_not_counted() {
        let buffer = filled(10, &["", "a", "", "", "b", "c", ""]);

        // Two real records requested; the sentinels in front do not use up the budget.
        assert_eq!(buffer.drain(2), vec!["a", "b"]);
        // Trailing sentinel is consumed and ends the drain once the buffer is empty.
        assert_eq!(buffer.drain(5), vec!["c"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_only_sentinels_yield_nothing() {
        let buffer = filled(4, &["", ""]);
        assert!(buffer.drain(4).is_empty());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_try_enqueue_full_returns_record() {
        let buffer = filled(2, &["a", "b"]);

        let err = buffer.try_enqueue("c".into()).unwrap_err();
        assert_eq!(err, BufferError::Full("c".into()));
        assert_eq!(err.into_record(), "c");
        assert_eq!(buffer.capacity(), 2);
    }

    #[test]
    fn test_blocking_enqueue_waits_for_space() {
        let buffer = std::sync::Arc::new(filled(1, &["a"]));

        let producer = {
            let buffer = buffer.clone();
            std::thread::spawn(move || buffer.blocking_enqueue("b".into()))
        };

        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(buffer.drain(1), vec!["a"]);

        producer.join().unwrap();
        assert_eq!(buffer.drain(1), vec!["b"]);
    }

    #[test]
    fn test_drain_ignores_records_arriving_mid_drain() {
        let buffer = std::sync::Arc::new(filled(4, &["a", "b", "c", "d"]));

        let producer = {
            let buffer = buffer.clone();
            std::thread::spawn(move || {
                for i in 0..1000 {
                    buffer.blocking_enqueue(format!("late-{i}"));
                }
            })
        };

        // At most the four records present at entry, however fast the producer refills.
        let drained = buffer.drain(10_000);
        assert!(drained.len() <= 4, "drained {} records", drained.len());

        while !producer.is_finished() {
            buffer.drain(10_000);
        }
        producer.join().unwrap();
    }

    #[tokio::test]
    async fn test_async_enqueue() {
        let buffer = Buffer::new(4);
        buffer.enqueue("x".into()).await;
        buffer.enqueue("y".into()).await;
        assert_eq!(buffer.drain(4), vec!["x", "y"]);
    }
}
