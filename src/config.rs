//! Watcher configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Default drain poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Default maximum records drained per tick.
pub const DEFAULT_MAX_CHANGES_PER_BATCH: usize = 1000;

/// Default retention window in seconds.
pub const DEFAULT_RETENTION_SECS: u64 = 3600;

/// Default maximum number of buffered change records.
pub const DEFAULT_BUFFER_SIZE: usize = 10_000;

/// Configuration for a [`SqliteWatcher`](crate::SqliteWatcher).
///
/// The poll interval and batch size are the two knobs controlling the
/// latency/throughput trade-off; retention and buffer size bound the
/// change log's age and row count.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Path to the SQLite database file.
    pub path: PathBuf,

    /// How often the drain loop wakes up.
    pub poll_interval: Duration,

    /// Maximum records read and dispatched per drain tick.
    pub max_changes_per_batch: usize,

    /// Maximum age of an undelivered change record.
    pub retention: Duration,

    /// Maximum number of rows the change log may hold.
    pub buffer_size: usize,

    /// Tables to install capture triggers for at open time. Tables are
    /// typically added later via `watch` instead.
    pub tables: Vec<String>,
}

impl WatcherConfig {
    /// Create a configuration with defaults for the given database path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_changes_per_batch: DEFAULT_MAX_CHANGES_PER_BATCH,
            retention: Duration::from_secs(DEFAULT_RETENTION_SECS),
            buffer_size: DEFAULT_BUFFER_SIZE,
            tables: Vec::new(),
        }
    }

    /// Set the drain poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the maximum records drained per tick.
    pub fn with_max_changes_per_batch(mut self, limit: usize) -> Self {
        self.max_changes_per_batch = limit.max(1);
        self
    }

    /// Set the retention window for undelivered records.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Set the maximum number of buffered change records.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Add a table to watch at open time.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.tables.push(table.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WatcherConfig::new("./watched.db");
        assert_eq!(config.path, PathBuf::from("./watched.db"));
        assert_eq!(
            config.poll_interval,
            Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)
        );
        assert_eq!(config.max_changes_per_batch, DEFAULT_MAX_CHANGES_PER_BATCH);
        assert_eq!(config.retention, Duration::from_secs(DEFAULT_RETENTION_SECS));
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
        assert!(config.tables.is_empty());
    }

    #[test]
    fn test_config_builder() {
        let config = WatcherConfig::new("/var/lib/app.db")
            .with_poll_interval(Duration::from_millis(50))
            .with_max_changes_per_batch(10)
            .with_retention(Duration::from_secs(60))
            .with_buffer_size(100)
            .with_table("users")
            .with_table("orders");

        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.max_changes_per_batch, 10);
        assert_eq!(config.retention, Duration::from_secs(60));
        assert_eq!(config.buffer_size, 100);
        assert_eq!(config.tables, vec!["users", "orders"]);
    }

    #[test]
    fn test_config_minimums() {
        let config = WatcherConfig::new("./a.db")
            .with_max_changes_per_batch(0)
            .with_buffer_size(0);
        assert_eq!(config.max_changes_per_batch, 1);
        assert_eq!(config.buffer_size, 1);
    }
}
