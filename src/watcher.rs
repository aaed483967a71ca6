//! The watcher lifecycle controller.
//!
//! [`SqliteWatcher`] owns the database handle, the change log store, and
//! the subscription registry; it orchestrates setup (WAL mode, change
//! log DDL, capture triggers), start/stop of the drain loop, and
//! teardown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rusqlite::Connection;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::WatcherConfig;
use crate::drain;
use crate::error::{Error, Result};
use crate::registry::{Registry, TableWatch};
use crate::store::ChangeLogStore;
use crate::triggers;

/// Error handler registered via [`SqliteWatcher::on_error`].
pub type ErrorHandler = Arc<dyn Fn(&Error) + Send + Sync>;

/// Snapshot of delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatcherStats {
    /// Records dispatched to at least one callback.
    pub records_delivered: u64,
    /// Records skipped (unwatched table, filter reject, or no callback).
    pub records_skipped: u64,
    /// Drain ticks that processed a non-empty batch.
    pub batches_drained: u64,
    /// Callback invocations that returned an error.
    pub callback_errors: u64,
}

#[derive(Default)]
pub(crate) struct StatsCounters {
    delivered: AtomicU64,
    skipped: AtomicU64,
    batches: AtomicU64,
    callback_errors: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_tick(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_callback_error(&self) {
        self.callback_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> WatcherStats {
        WatcherStats {
            records_delivered: self.delivered.load(Ordering::Relaxed),
            records_skipped: self.skipped.load(Ordering::Relaxed),
            batches_drained: self.batches.load(Ordering::Relaxed),
            callback_errors: self.callback_errors.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the watcher handle and the drain task.
pub(crate) struct WatcherInner {
    pub(crate) conn: Mutex<Connection>,
    pub(crate) store: ChangeLogStore,
    pub(crate) registry: Registry,
    pub(crate) stats: StatsCounters,
    pub(crate) batch_limit: usize,
    /// Serializes the periodic loop against `drain_now`; a tick holds
    /// it for its full read-dispatch-delete span.
    pub(crate) tick_lock: tokio::sync::Mutex<()>,
    handlers: RwLock<Vec<ErrorHandler>>,
}

impl WatcherInner {
    /// Funnel a drain-time error to the registered handlers.
    ///
    /// With no handlers registered the error is logged and otherwise
    /// swallowed; the drain loop never terminates on error.
    pub(crate) fn report(&self, err: &Error) {
        let handlers = self.handlers.read();
        if handlers.is_empty() {
            error!(%err, "unhandled watcher error");
            return;
        }
        for handler in handlers.iter() {
            handler(err);
        }
    }
}

/// Watches SQLite tables for row-level changes and delivers them as
/// ordered, typed notifications to in-process subscribers.
///
/// Mutations are captured by SQL triggers regardless of which process
/// or connection produced them, buffered in a bounded change log inside
/// the database, and drained by a periodic tokio task started with
/// [`start`](Self::start).
pub struct SqliteWatcher {
    inner: Arc<WatcherInner>,
    poll_interval: Duration,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SqliteWatcher {
    /// Open the database and set up the change capture plumbing.
    ///
    /// Enables WAL journaling with relaxed synchronous mode, creates
    /// the change log table and its retention trigger, and installs
    /// capture triggers for any tables named in the configuration.
    pub fn open(config: WatcherConfig) -> Result<Self> {
        let mut conn = Connection::open(&config.path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;

        let store = ChangeLogStore::new(config.retention.as_secs(), config.buffer_size);
        store.create(&conn)?;

        let registry = Registry::default();
        for table in &config.tables {
            triggers::install_capture_triggers(&mut conn, table)?;
            registry.ensure(table);
        }

        info!(path = %config.path.display(), tables = config.tables.len(), "watcher opened");

        Ok(Self {
            inner: Arc::new(WatcherInner {
                conn: Mutex::new(conn),
                store,
                registry,
                stats: StatsCounters::default(),
                batch_limit: config.max_changes_per_batch,
                tick_lock: tokio::sync::Mutex::new(()),
                handlers: RwLock::new(Vec::new()),
            }),
            poll_interval: config.poll_interval,
            shutdown_tx: Mutex::new(None),
            task: Mutex::new(None),
        })
    }

    /// Install capture triggers for a table and return its registration
    /// builder.
    ///
    /// Idempotent: watching a table twice reinstalls the triggers
    /// without duplicating capture, and keeps previously registered
    /// callbacks. Fails with [`Error::Schema`] if the table does not
    /// exist; nothing is installed in that case.
    pub fn watch(&self, table: &str) -> Result<TableWatch<'_>> {
        {
            let mut conn = self.inner.conn.lock();
            triggers::install_capture_triggers(&mut conn, table)?;
        }
        self.inner.registry.ensure(table);
        Ok(TableWatch::new(&self.inner.registry, table))
    }

    /// Remove a table's capture triggers and drop its subscriber set.
    ///
    /// Stale change log rows for the table are skipped (not errored) by
    /// later drain ticks; an already-started tick still delivers them.
    pub fn unwatch(&self, table: &str) -> Result<()> {
        {
            let conn = self.inner.conn.lock();
            triggers::remove_capture_triggers(&conn, table)?;
        }
        self.inner.registry.remove(table);
        Ok(())
    }

    /// Start the periodic drain loop. A no-op if already running.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let (tx, rx) = watch::channel(false);
        *self.shutdown_tx.lock() = Some(tx);
        *task = Some(tokio::spawn(drain::run(
            self.inner.clone(),
            self.poll_interval,
            rx,
        )));
    }

    /// Stop the drain loop and wait for it to finish.
    ///
    /// An in-flight tick runs to completion and a final tick flushes
    /// the remaining backlog, so captured changes are not dropped.
    pub async fn stop(&self) {
        let handle = self.task.lock().take();
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Run one drain tick immediately on the caller's task.
    ///
    /// Shares the single-flight tick lock with the periodic loop.
    /// Returns the number of records processed. Useful for tests and
    /// for flushing before shutdown. Drain errors are funneled to the
    /// registered handlers in addition to being returned.
    pub async fn drain_now(&self) -> Result<usize> {
        match drain::tick(&self.inner).await {
            Ok(processed) => Ok(processed),
            Err(error) => {
                self.inner.report(&error);
                Err(error)
            }
        }
    }

    /// Register a handler for errors raised while draining.
    ///
    /// Handlers are invoked on the drain task. If none are registered,
    /// drain errors are logged and swallowed.
    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.inner.handlers.write().push(Arc::new(handler));
    }

    /// Whether a table currently has a subscriber set.
    pub fn is_watching(&self, table: &str) -> bool {
        self.inner.registry.contains(table)
    }

    /// Names of all watched tables, sorted.
    pub fn watched_tables(&self) -> Vec<String> {
        self.inner.registry.table_names()
    }

    /// Number of records currently buffered in the change log.
    pub fn change_log_size(&self) -> Result<u64> {
        let conn = self.inner.conn.lock();
        self.inner.store.size(&conn)
    }

    /// Snapshot of the delivery counters.
    pub fn stats(&self) -> WatcherStats {
        self.inner.stats.snapshot()
    }

    /// Stop the drain loop and remove all capture triggers.
    ///
    /// With `drop_table` set, the shared change log table and its
    /// retention trigger are dropped as well; otherwise the change log
    /// is left intact and queryable.
    pub async fn cleanup(&self, drop_table: bool) -> Result<()> {
        self.stop().await;

        let tables = self.inner.registry.drain_all();
        let conn = self.inner.conn.lock();
        for table in &tables {
            triggers::remove_capture_triggers(&conn, table)?;
        }
        if drop_table {
            self.inner.store.drop_objects(&conn)?;
        }

        info!(tables = tables.len(), drop_table, "watcher cleaned up");
        Ok(())
    }
}

impl Drop for SqliteWatcher {
    fn drop(&mut self) {
        // Best-effort shutdown signal; callers needing the final flush
        // must await `stop` or `cleanup` themselves.
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(true);
        }
    }
}
