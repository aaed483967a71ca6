//! Capture trigger generation.
//!
//! Per watched table, three AFTER triggers serialize row mutations into
//! the change log: insert and update capture the new row image, delete
//! captures the old one. Trigger bodies are generated from the table's
//! introspected schema as plain SQL text; identifiers and literals are
//! quoted so that hostile table or column names cannot inject SQL.

use rusqlite::{params, Connection};

use crate::error::{Error, Result};
use crate::record::ChangeOp;
use crate::store::CHANGES_TABLE;

/// Introspected shape of a watched table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TableSchema {
    /// Table name as given by the caller.
    pub table: String,
    /// Column names in declaration order.
    pub columns: Vec<String>,
    /// Single-column declared primary key, if any. `None` falls back to
    /// the engine's native `rowid`.
    pub key_column: Option<String>,
}

/// Double-quote an identifier, doubling embedded quotes.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Single-quote a string literal, doubling embedded quotes.
pub(crate) fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn trigger_name(table: &str, op: ChangeOp) -> String {
    let suffix = match op {
        ChangeOp::Insert => "insert",
        ChangeOp::Update => "update",
        ChangeOp::Delete => "delete",
    };
    format!("_sqlite_watcher_{table}_{suffix}")
}

/// Look up a table's columns and identifying column.
///
/// Fails with [`Error::Schema`] if the table does not exist. A table
/// with a composite primary key (or none at all) uses the rowid
/// fallback.
pub(crate) fn introspect(conn: &Connection, table: &str) -> Result<TableSchema> {
    let exists: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |row| row.get(0),
    )?;
    if exists == 0 {
        return Err(Error::Schema {
            table: table.to_string(),
            reason: "table does not exist".to_string(),
        });
    }

    let mut stmt = conn.prepare("SELECT name, pk FROM pragma_table_info(?1)")?;
    let columns: Vec<(String, i64)> = stmt
        .query_map(params![table], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<_, _>>()?;

    let key_columns: Vec<&String> = columns
        .iter()
        .filter(|(_, pk)| *pk > 0)
        .map(|(name, _)| name)
        .collect();
    let key_column = match key_columns.as_slice() {
        [single] => Some((*single).clone()),
        _ => None,
    };

    Ok(TableSchema {
        table: table.to_string(),
        columns: columns.into_iter().map(|(name, _)| name).collect(),
        key_column,
    })
}

/// Generate the capture trigger definition for one operation.
///
/// Pure `schema -> trigger text`; no connection involved.
pub(crate) fn capture_trigger_sql(schema: &TableSchema, op: ChangeOp) -> String {
    // Insert and update capture the post-mutation image; delete is left
    // with only the old values.
    let image = match op {
        ChangeOp::Insert | ChangeOp::Update => "NEW",
        ChangeOp::Delete => "OLD",
    };

    let row_id = match &schema.key_column {
        Some(key) => format!("{image}.{}", quote_ident(key)),
        None => format!("{image}.rowid"),
    };

    let pairs: Vec<String> = schema
        .columns
        .iter()
        .map(|col| format!("{}, {image}.{}", quote_literal(col), quote_ident(col)))
        .collect();
    let payload = format!("json_object({})", pairs.join(", "));

    let event = match op {
        ChangeOp::Insert => "INSERT",
        ChangeOp::Update => "UPDATE",
        ChangeOp::Delete => "DELETE",
    };

    format!(
        "CREATE TRIGGER {name}\n\
         AFTER {event} ON {table}\n\
         BEGIN\n\
             INSERT INTO {changes} (table_name, operation, row_id, changed_data, timestamp)\n\
             VALUES ({table_literal}, {op_literal}, {row_id}, {payload}, CAST(strftime('%s', 'now') AS INTEGER));\n\
         END",
        name = quote_ident(&trigger_name(&schema.table, op)),
        table = quote_ident(&schema.table),
        changes = CHANGES_TABLE,
        table_literal = quote_literal(&schema.table),
        op_literal = quote_literal(op.as_sql()),
    )
}

/// Install the three capture triggers for a table.
///
/// Pre-existing capture triggers are dropped first, so a double watch
/// never duplicates trigger firing. All six statements run in one
/// transaction: a failure installs nothing.
pub(crate) fn install_capture_triggers(conn: &mut Connection, table: &str) -> Result<()> {
    let schema = introspect(conn, table)?;

    let mut script = String::new();
    for op in [ChangeOp::Insert, ChangeOp::Update, ChangeOp::Delete] {
        script.push_str(&format!(
            "DROP TRIGGER IF EXISTS {};\n",
            quote_ident(&trigger_name(table, op))
        ));
        script.push_str(&capture_trigger_sql(&schema, op));
        script.push_str(";\n");
    }

    let tx = conn.transaction()?;
    tx.execute_batch(&script)?;
    tx.commit()?;

    tracing::debug!(%table, key = ?schema.key_column, "capture triggers installed");
    Ok(())
}

/// Drop all three capture triggers for a table.
///
/// Safe to call on tables that were never watched.
pub(crate) fn remove_capture_triggers(conn: &Connection, table: &str) -> Result<()> {
    for op in [ChangeOp::Insert, ChangeOp::Update, ChangeOp::Delete] {
        conn.execute_batch(&format!(
            "DROP TRIGGER IF EXISTS {}",
            quote_ident(&trigger_name(table, op))
        ))?;
    }
    tracing::debug!(%table, "capture triggers removed");
    Ok(())
}
