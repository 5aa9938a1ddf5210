//! Batch coalescing: turning drained records into one JSON-array payload.
//!
//! Records are opaque strings. A record that already is JSON text (an
//! object from an upstream serializer, say) is embedded as-is; anything
//! else is embedded as a JSON string, so the stored payload is always a
//! valid JSON array.

use serde::de::IgnoredAny;

/// Configuration for batch flushes.
#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    /// Maximum number of records coalesced into one batch
    pub waiting_size: usize,
    /// Write a `[]` row when a flush finds the buffer empty
    pub write_empty_batches: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            waiting_size: 100,
            write_empty_batches: false,
        }
    }
}

impl BatchConfig {
    /// Create a BatchConfig from application config values.
    pub fn from_config(waiting_size: usize, write_empty_batches: bool) -> Self {
        Self {
            waiting_size,
            write_empty_batches,
        }
    }
}

/// Render records as a JSON array string.
///
/// An empty slice renders as `[]`.
pub fn encode_batch(records: &[String]) -> Result<String, serde_json::Error> {
    let estimate = records.iter().map(|r| r.len() + 3).sum::<usize>();
    let mut payload = String::with_capacity(estimate + 2);
    payload.push('[');

    for (i, record) in records.iter().enumerate() {
        if i > 0 {
            payload.push(',');
        }
        if is_json(record) {
            payload.push_str(record);
        } else {
            payload.push_str(&serde_json::to_string(record)?);
        }
    }

    payload.push(']');
    Ok(payload)
}

fn is_json(record: &str) -> bool {
    serde_json::from_str::<IgnoredAny>(record).is_ok()
}
