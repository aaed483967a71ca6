//! Subscription registry and the `watch` builder.
//!
//! Maps a table name to its subscriber set: per-operation callbacks, a
//! wildcard list, and at most one predicate filter. Purely in-memory;
//! the drain loop takes per-table snapshots and never mutates.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;

use crate::record::{ChangeOp, ChangeRecord};

/// Error type subscriber callbacks may return.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// A registered subscriber callback.
pub type ChangeCallback =
    Arc<dyn Fn(ChangeRecord) -> BoxFuture<'static, Result<(), CallbackError>> + Send + Sync>;

/// A predicate applied to each record before dispatch.
pub type ChangePredicate = Arc<dyn Fn(&ChangeRecord) -> bool + Send + Sync>;

/// Per-table collection of registered callbacks and an optional filter.
///
/// One list per operation tag plus a wildcard list; insertion order is
/// preserved but carries no delivery-order meaning, since all matching
/// callbacks for a record fire concurrently.
#[derive(Clone, Default)]
pub(crate) struct SubscriberSet {
    on_insert: Vec<ChangeCallback>,
    on_update: Vec<ChangeCallback>,
    on_delete: Vec<ChangeCallback>,
    wildcard: Vec<ChangeCallback>,
    predicate: Option<ChangePredicate>,
}

impl SubscriberSet {
    fn push(&mut self, op: ChangeOp, callback: ChangeCallback) {
        match op {
            ChangeOp::Insert => self.on_insert.push(callback),
            ChangeOp::Update => self.on_update.push(callback),
            ChangeOp::Delete => self.on_delete.push(callback),
        }
    }

    /// Apply the predicate filter; no predicate accepts everything.
    pub(crate) fn accepts(&self, record: &ChangeRecord) -> bool {
        self.predicate.as_ref().map_or(true, |p| p(record))
    }

    /// All callbacks matching the record's operation, wildcard included.
    pub(crate) fn callbacks_for(&self, op: ChangeOp) -> Vec<ChangeCallback> {
        let tagged = match op {
            ChangeOp::Insert => &self.on_insert,
            ChangeOp::Update => &self.on_update,
            ChangeOp::Delete => &self.on_delete,
        };
        tagged.iter().chain(self.wildcard.iter()).cloned().collect()
    }
}

/// Table name to subscriber set mapping.
#[derive(Default)]
pub(crate) struct Registry {
    tables: RwLock<HashMap<String, SubscriberSet>>,
}

impl Registry {
    /// Create the table's subscriber set if absent.
    pub(crate) fn ensure(&self, table: &str) {
        self.tables.write().entry(table.to_string()).or_default();
    }

    /// Drop the table's subscriber set.
    pub(crate) fn remove(&self, table: &str) {
        self.tables.write().remove(table);
    }

    /// Drop every subscriber set, returning the table names that had one.
    pub(crate) fn drain_all(&self) -> Vec<String> {
        self.tables.write().drain().map(|(table, _)| table).collect()
    }

    /// Read-only snapshot of one table's subscriber set.
    ///
    /// Callbacks are `Arc`s, so the clone is cheap; the drain loop works
    /// against the snapshot for the whole record, untouched by
    /// concurrent registration.
    pub(crate) fn snapshot(&self, table: &str) -> Option<SubscriberSet> {
        self.tables.read().get(table).cloned()
    }

    pub(crate) fn contains(&self, table: &str) -> bool {
        self.tables.read().contains_key(table)
    }

    pub(crate) fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn add_callback(&self, table: &str, op: Option<ChangeOp>, callback: ChangeCallback) {
        let mut tables = self.tables.write();
        let set = tables.entry(table.to_string()).or_default();
        match op {
            Some(op) => set.push(op, callback),
            None => set.wildcard.push(callback),
        }
    }

    fn set_predicate(&self, table: &str, predicate: ChangePredicate) {
        let mut tables = self.tables.write();
        let set = tables.entry(table.to_string()).or_default();
        set.predicate = Some(predicate);
    }
}

/// Chained registration builder returned by
/// [`SqliteWatcher::watch`](crate::SqliteWatcher::watch).
///
/// ```ignore
/// watcher
///     .watch("users")?
///     .filter(|record| record.row_id != 0)
///     .on_insert(|record| async move { /* ... */ Ok(()) })
///     .on_any(|record| async move { /* ... */ Ok(()) });
/// ```
pub struct TableWatch<'a> {
    registry: &'a Registry,
    table: String,
}

impl std::fmt::Debug for TableWatch<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableWatch")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl<'a> TableWatch<'a> {
    pub(crate) fn new(registry: &'a Registry, table: impl Into<String>) -> Self {
        Self {
            registry,
            table: table.into(),
        }
    }

    /// The table this builder is bound to.
    pub fn table(&self) -> &str {
        &self.table
    }

    fn register<F, Fut>(self, op: Option<ChangeOp>, callback: F) -> Self
    where
        F: Fn(ChangeRecord) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), CallbackError>> + Send + 'static,
    {
        let callback: ChangeCallback = Arc::new(move |record| callback(record).boxed());
        self.registry.add_callback(&self.table, op, callback);
        self
    }

    /// Register a callback for captured inserts.
    pub fn on_insert<F, Fut>(self, callback: F) -> Self
    where
        F: Fn(ChangeRecord) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), CallbackError>> + Send + 'static,
    {
        self.register(Some(ChangeOp::Insert), callback)
    }

    /// Register a callback for captured updates.
    pub fn on_update<F, Fut>(self, callback: F) -> Self
    where
        F: Fn(ChangeRecord) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), CallbackError>> + Send + 'static,
    {
        self.register(Some(ChangeOp::Update), callback)
    }

    /// Register a callback for captured deletes.
    pub fn on_delete<F, Fut>(self, callback: F) -> Self
    where
        F: Fn(ChangeRecord) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), CallbackError>> + Send + 'static,
    {
        self.register(Some(ChangeOp::Delete), callback)
    }

    /// Register a wildcard callback fired for every operation.
    pub fn on_any<F, Fut>(self, callback: F) -> Self
    where
        F: Fn(ChangeRecord) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), CallbackError>> + Send + 'static,
    {
        self.register(None, callback)
    }

    /// Set the predicate filter for this table. The last filter set
    /// wins; filters are not composed. Rejected records are skipped
    /// without notifying any callback.
    pub fn filter<P>(self, predicate: P) -> Self
    where
        P: Fn(&ChangeRecord) -> bool + Send + Sync + 'static,
    {
        self.registry.set_predicate(&self.table, Arc::new(predicate));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(op: ChangeOp, row_id: i64) -> ChangeRecord {
        ChangeRecord {
            seq: 1,
            table: "users".to_string(),
            op,
            row_id,
            payload: serde_json::Map::new(),
            captured_at: 0,
        }
    }

    fn noop() -> impl Fn(ChangeRecord) -> futures::future::Ready<Result<(), CallbackError>>
           + Send
           + Sync
           + 'static {
        |_| futures::future::ready(Ok(()))
    }

    #[test]
    fn test_callbacks_for_includes_wildcard() {
        let registry = Registry::default();
        TableWatch::new(&registry, "users")
            .on_insert(noop())
            .on_delete(noop())
            .on_any(noop());

        let set = registry.snapshot("users").unwrap();
        assert_eq!(set.callbacks_for(ChangeOp::Insert).len(), 2);
        assert_eq!(set.callbacks_for(ChangeOp::Update).len(), 1);
        assert_eq!(set.callbacks_for(ChangeOp::Delete).len(), 2);
    }

    #[test]
    fn test_last_filter_wins() {
        let registry = Registry::default();
        TableWatch::new(&registry, "users")
            .filter(|_| false)
            .filter(|record| record.row_id > 10);

        let set = registry.snapshot("users").unwrap();
        assert!(!set.accepts(&record(ChangeOp::Insert, 1)));
        assert!(set.accepts(&record(ChangeOp::Insert, 11)));
    }

    #[test]
    fn test_no_filter_accepts_everything() {
        let registry = Registry::default();
        registry.ensure("users");
        let set = registry.snapshot("users").unwrap();
        assert!(set.accepts(&record(ChangeOp::Delete, 0)));
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_registration() {
        let registry = Registry::default();
        registry.ensure("users");
        let snapshot = registry.snapshot("users").unwrap();

        TableWatch::new(&registry, "users").on_insert(noop());

        assert!(snapshot.callbacks_for(ChangeOp::Insert).is_empty());
        let fresh = registry.snapshot("users").unwrap();
        assert_eq!(fresh.callbacks_for(ChangeOp::Insert).len(), 1);
    }

    #[test]
    fn test_remove_and_names() {
        let registry = Registry::default();
        registry.ensure("users");
        registry.ensure("orders");
        assert_eq!(registry.table_names(), vec!["orders", "users"]);
        assert!(registry.contains("users"));

        registry.remove("users");
        assert!(!registry.contains("users"));
        assert!(registry.snapshot("users").is_none());
    }

    #[test]
    fn test_drain_all() {
        let registry = Registry::default();
        registry.ensure("a");
        registry.ensure("b");
        let mut drained = registry.drain_all();
        drained.sort();
        assert_eq!(drained, vec!["a", "b"]);
        assert!(registry.table_names().is_empty());
    }
}
