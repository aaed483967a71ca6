//! The change log store.
//!
//! A single physical table (`_sqlite_watcher_changes`) holds an
//! append-only, strictly increasing sequence of change records shared by
//! every watched table. Capture triggers append to it; the drain loop
//! reads and deletes from it. Retention is owned by the store itself: a
//! cleanup trigger fires on every insert and enforces both an age bound
//! and a row-count bound, whichever is stricter. Eviction of undelivered
//! rows is a defined lossy behavior, not an error.

use rusqlite::{params, Connection};
use serde_json::Value;
use tracing::warn;

use crate::error::Result;
use crate::record::{ChangeOp, ChangeRecord};

/// Name of the shared change log table.
pub const CHANGES_TABLE: &str = "_sqlite_watcher_changes";

/// Name of the retention trigger on the change log table.
pub const CLEANUP_TRIGGER: &str = "cleanup_old_watcher_changes";

/// One drained batch: decoded records plus the highest sequence id seen.
///
/// `last_seq` covers every fetched row, including any that failed to
/// decode, so the delete watermark never leaves a poison row behind.
pub(crate) struct DrainBatch {
    pub records: Vec<ChangeRecord>,
    pub last_seq: Option<i64>,
}

/// DDL and row operations for the change log table.
#[derive(Debug, Clone)]
pub(crate) struct ChangeLogStore {
    retention_secs: u64,
    buffer_size: usize,
}

impl ChangeLogStore {
    pub(crate) fn new(retention_secs: u64, buffer_size: usize) -> Self {
        Self {
            retention_secs,
            buffer_size,
        }
    }

    /// Create the change log table, its indexes, and the retention
    /// trigger. Idempotent: safe to call on every open.
    ///
    /// The trigger is dropped and recreated so that retention limits
    /// from the current configuration always win.
    pub(crate) fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                table_name TEXT NOT NULL,
                operation TEXT NOT NULL,
                row_id INTEGER NOT NULL,
                changed_data TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_watcher_changes_timestamp
                ON {table}(timestamp);
            CREATE INDEX IF NOT EXISTS idx_watcher_changes_table_name
                ON {table}(table_name);

            DROP TRIGGER IF EXISTS {trigger};
            CREATE TRIGGER {trigger}
            AFTER INSERT ON {table}
            BEGIN
                DELETE FROM {table}
                WHERE timestamp < CAST(strftime('%s', 'now') AS INTEGER) - {retention}
                   OR id <= (
                       SELECT id FROM {table}
                       ORDER BY id DESC
                       LIMIT 1 OFFSET {buffer}
                   );
            END;
            "#,
            table = CHANGES_TABLE,
            trigger = CLEANUP_TRIGGER,
            retention = self.retention_secs,
            buffer = self.buffer_size,
        ))?;
        Ok(())
    }

    /// Read up to `limit` of the oldest undelivered records, ordered by
    /// sequence id ascending.
    pub(crate) fn drain_batch(&self, conn: &Connection, limit: usize) -> Result<DrainBatch> {
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT id, table_name, operation, row_id, changed_data, timestamp
             FROM {CHANGES_TABLE}
             ORDER BY id ASC
             LIMIT ?1"
        ))?;

        let rows = stmt.query_map([limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut records = Vec::new();
        let mut last_seq = None;
        for row in rows {
            let (seq, table, operation, row_id, changed_data, captured_at) = row?;
            last_seq = Some(seq);

            let Some(op) = ChangeOp::parse(&operation) else {
                warn!(seq, %table, %operation, "unknown operation in change log, skipping");
                continue;
            };
            records.push(ChangeRecord {
                seq,
                table,
                op,
                row_id,
                payload: decode_payload(seq, &changed_data),
                captured_at,
            });
        }

        Ok(DrainBatch { records, last_seq })
    }

    /// Delete every record with sequence id at or below the watermark.
    pub(crate) fn delete_up_to(&self, conn: &Connection, seq: i64) -> Result<usize> {
        let mut stmt =
            conn.prepare_cached(&format!("DELETE FROM {CHANGES_TABLE} WHERE id <= ?1"))?;
        Ok(stmt.execute(params![seq])?)
    }

    /// Number of records currently buffered in the change log.
    pub(crate) fn size(&self, conn: &Connection) -> Result<u64> {
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {CHANGES_TABLE}"),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Drop the change log table and its retention trigger.
    pub(crate) fn drop_objects(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!(
            "DROP TRIGGER IF EXISTS {CLEANUP_TRIGGER};
             DROP TABLE IF EXISTS {CHANGES_TABLE};"
        ))?;
        Ok(())
    }
}

/// Decode the `changed_data` JSON column into a column/value map.
///
/// Trigger-produced payloads are always JSON objects; anything else can
/// only come from outside tampering and is delivered as an empty map
/// rather than wedging the delete watermark.
fn decode_payload(seq: i64, text: &str) -> serde_json::Map<String, Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            warn!(seq, value_type = ?other, "change payload is not a JSON object");
            serde_json::Map::new()
        }
        Err(error) => {
            warn!(seq, %error, "malformed change payload");
            serde_json::Map::new()
        }
    }
}
