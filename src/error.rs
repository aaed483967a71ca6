//! Watcher error types.

use thiserror::Error;

use crate::record::ChangeOp;

/// Errors raised by the watcher.
///
/// Setup and teardown errors (`Schema`, and `Storage` from
/// `open`/`watch`/`unwatch`/`cleanup`) propagate synchronously to the
/// caller.
/// Errors raised while draining never terminate the drain loop; they are
/// reported to the handlers registered via
/// [`SqliteWatcher::on_error`](crate::SqliteWatcher::on_error).
#[derive(Debug, Error)]
pub enum Error {
    /// A watched table is missing or could not be introspected.
    #[error("schema error on table {table}: {reason}")]
    Schema {
        /// Table that failed introspection.
        table: String,
        /// Why the table could not be watched.
        reason: String,
    },

    /// A read or write against the change log failed.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A subscriber callback returned an error.
    ///
    /// Isolated per callback: sibling callbacks still run and the record
    /// is still considered delivered.
    #[error("callback error on table {table} ({operation}): {source}")]
    Callback {
        /// Table the record was captured from.
        table: String,
        /// Operation of the record being dispatched.
        operation: ChangeOp,
        /// The error returned by the callback.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Result alias for watcher operations.
pub type Result<T> = std::result::Result<T, Error>;
