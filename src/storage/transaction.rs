//! Transaction scope for the write path.
//!
//! [`with_transaction`] opens an IMMEDIATE transaction, runs a unit of
//! work and then commits or rolls back. Every exit path finalizes the
//! transaction: success commits, an error rolls back, and a panic is
//! caught, logged and rolled back. A panic never escapes to the caller.

use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use super::StoreError;

/// Run `work` inside a transaction on `conn`.
///
/// `op` names the operation in log events.
///
/// # Errors
///
/// - [`StoreError::Begin`] if the transaction cannot be opened.
/// - The error returned by `work`, after a successful rollback.
/// - [`StoreError::Panicked`] if `work` panicked.
/// - [`StoreError::Commit`] if the commit fails.
/// - [`StoreError::Rollback`] if rolling back fails; the original error
///   is kept as its cause.
pub fn with_transaction<T, F>(conn: &mut Connection, op: &str, work: F) -> Result<T, StoreError>
where
    F: FnOnce(&Transaction<'_>) -> Result<T, StoreError>,
{
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| {
            tracing::warn!(op, error = %e, "Could not begin the transaction");
            StoreError::Begin(e)
        })?;

    match panic::catch_unwind(AssertUnwindSafe(|| work(&tx))) {
        Ok(Ok(value)) => {
            tx.commit().map_err(|e| {
                tracing::warn!(op, error = %e, "Could not commit the transaction");
                StoreError::Commit(e)
            })?;
            Ok(value)
        }
        Ok(Err(err)) => Err(rollback(tx, op, err)),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(op, panic = %message, "Unit of work panicked, rolling back");
            Err(rollback(tx, op, StoreError::Panicked(message)))
        }
    }
}

/// Roll back `tx`, chaining any rollback failure onto `cause`.
fn rollback(tx: Transaction<'_>, op: &str, cause: StoreError) -> StoreError {
    match tx.rollback() {
        Ok(()) => cause,
        Err(e) => {
            tracing::warn!(op, error = %e, cause = %cause, "Could not roll back the transaction");
            StoreError::Rollback {
                cause: Box::new(cause),
                source: e,
            }
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
