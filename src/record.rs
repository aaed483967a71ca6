//! Captured change records.

use std::fmt;

use serde_json::{Map, Value};

/// Row-level operation captured by a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeOp {
    /// A row was inserted.
    Insert,
    /// A row was updated (the captured payload is the post-update image).
    Update,
    /// A row was deleted (the captured payload is the pre-delete image).
    Delete,
}

impl ChangeOp {
    /// The SQL text stored in the change log's `operation` column.
    pub fn as_sql(&self) -> &'static str {
        match self {
            ChangeOp::Insert => "INSERT",
            ChangeOp::Update => "UPDATE",
            ChangeOp::Delete => "DELETE",
        }
    }

    /// Parse the `operation` column back into an op.
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "INSERT" => Some(ChangeOp::Insert),
            "UPDATE" => Some(ChangeOp::Update),
            "DELETE" => Some(ChangeOp::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// One captured row mutation pending delivery.
///
/// Records are immutable once written; `seq` is the only ordering key
/// (shared across all watched tables) and `captured_at` is used for
/// retention only.
#[derive(Debug, Clone)]
pub struct ChangeRecord {
    /// Monotonically increasing sequence id assigned by the change log.
    pub seq: i64,
    /// Name of the watched table that produced the change.
    pub table: String,
    /// The captured operation.
    pub op: ChangeOp,
    /// Engine-native row identifier of the affected row (post-mutation
    /// for insert/update, pre-mutation for delete).
    pub row_id: i64,
    /// Column name to value mapping captured from the row image.
    pub payload: Map<String, Value>,
    /// Seconds-resolution capture timestamp.
    pub captured_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_op_sql_round_trip() {
        for op in [ChangeOp::Insert, ChangeOp::Update, ChangeOp::Delete] {
            assert_eq!(ChangeOp::parse(op.as_sql()), Some(op));
        }
        assert_eq!(ChangeOp::parse("TRUNCATE"), None);
    }

    #[test]
    fn test_change_op_display() {
        assert_eq!(ChangeOp::Update.to_string(), "UPDATE");
    }
}
