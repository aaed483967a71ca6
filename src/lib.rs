//! Change-data-capture for SQLite.
//!
//! This crate detects row-level INSERT/UPDATE/DELETE events on
//! designated tables — regardless of which process or connection
//! produced them — and delivers them as ordered, typed notifications to
//! in-process subscribers, with bounded storage and configurable
//! retention.
//!
//! Capture works through SQL triggers: watching a table installs three
//! AFTER triggers that serialize each mutation into a shared change log
//! table inside the database. A periodic drain task reads the log in
//! sequence order, fans each record out to the table's subscribers, and
//! deletes the delivered batch. Delivery is at-least-once; the change
//! log is bounded by both a retention window and a row-count cap.
//!
//! ```no_run
//! use sqlite_watcher::{SqliteWatcher, WatcherConfig};
//!
//! # async fn demo() -> sqlite_watcher::Result<()> {
//! let watcher = SqliteWatcher::open(WatcherConfig::new("./app.db"))?;
//! watcher
//!     .watch("users")?
//!     .on_insert(|record| async move {
//!         println!("user {} inserted: {:?}", record.row_id, record.payload);
//!         Ok(())
//!     });
//! watcher.start();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod record;
pub mod registry;
pub mod watcher;

mod drain;
mod store;
mod triggers;

pub use config::WatcherConfig;
pub use error::{Error, Result};
pub use record::{ChangeOp, ChangeRecord};
pub use registry::{CallbackError, TableWatch};
pub use store::{CHANGES_TABLE, CLEANUP_TRIGGER};
pub use watcher::{SqliteWatcher, WatcherStats};
