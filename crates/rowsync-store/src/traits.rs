//! RowStore trait: the row-level interface to a SQL engine.
//!
//! Capture and replay only ever touch the engine through this trait.
//! Implementations include SQLite (primary) and in-memory (for tests).

use std::sync::Arc;

use rowsync_core::{Row, TableHeader, Value};

use crate::error::{Result, StoreError};

/// Name of the pseudo-column exposed for tables without a declared key.
pub const ROWID_COLUMN: &str = "rowid";

/// Schema metadata for one table, as the engine reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    /// Name and key layout. The name is the engine's canonical spelling.
    pub header: Arc<TableHeader>,
    /// Column names in declared order, led by `rowid` when implicit.
    pub columns: Vec<String>,
    /// The table has no declared primary key and is keyed by rowid.
    pub implicit_rowid: bool,
}

impl TableInfo {
    /// Metadata for a table with a declared primary key.
    pub fn new(name: impl Into<String>, columns: Vec<String>, primary_key: Vec<bool>) -> Self {
        Self {
            header: Arc::new(TableHeader::new(name, primary_key)),
            columns,
            implicit_rowid: false,
        }
    }

    /// Metadata for a rowid-keyed table; `columns` excludes the rowid.
    pub fn with_implicit_rowid(name: impl Into<String>, columns: Vec<String>) -> Self {
        let mut all = Vec::with_capacity(columns.len() + 1);
        all.push(ROWID_COLUMN.to_string());
        all.extend(columns);
        let mut primary_key = vec![false; all.len()];
        primary_key[0] = true;
        Self {
            header: Arc::new(TableHeader::new(name, primary_key)),
            columns: all,
            implicit_rowid: true,
        }
    }

    /// Canonical table name.
    pub fn name(&self) -> &str {
        self.header.name()
    }

    /// Number of columns, counting the rowid pseudo-column.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Position of a column by name, compared case-insensitively.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Number of primary-key columns.
    pub fn key_len(&self) -> usize {
        self.header.key_columns().count()
    }

    /// Extract the key values from a full row.
    pub fn key_of(&self, row: &[Value]) -> Vec<Value> {
        self.header
            .key_columns()
            .filter_map(|i| row.get(i).cloned())
            .collect()
    }

    /// Column reference for SQL text. The rowid pseudo-column stays bare.
    pub fn sql_column(&self, index: usize) -> String {
        if self.implicit_rowid && index == 0 {
            ROWID_COLUMN.to_string()
        } else {
            quote_ident(&self.columns[index])
        }
    }

    /// Fail unless `row` has one value per column.
    pub fn check_row(&self, row: &[Value]) -> Result<()> {
        self.check_arity(row.len(), self.column_count())
    }

    /// Fail unless `key` has one value per key column.
    pub fn check_key(&self, key: &[Value]) -> Result<()> {
        self.check_arity(key.len(), self.key_len())
    }

    fn check_arity(&self, actual: usize, expected: usize) -> Result<()> {
        if actual == expected {
            Ok(())
        } else {
            Err(StoreError::Arity {
                table: self.name().to_string(),
                expected,
                actual,
            })
        }
    }
}

/// Why the engine refused a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// A foreign-key constraint failed.
    ForeignKey,
    /// Any other constraint (UNIQUE, NOT NULL, CHECK, primary key).
    Constraint,
}

/// Outcome of a single row write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// The engine accepted the write. `rowid` is set for inserts.
    Written { rowid: Option<i64> },
    /// The engine rejected the write; nothing changed.
    Rejected { reason: Rejection, message: String },
}

impl WriteResult {
    /// Whether the write went through.
    pub fn is_written(&self) -> bool {
        matches!(self, WriteResult::Written { .. })
    }
}

/// Row-level access to a SQL engine.
///
/// Rows are full images in [`TableInfo::columns`] order. Keys are the
/// primary-key values in column order. Reads take `&self`, writes `&mut self`.
pub trait RowStore {
    // ─────────────────────────────────────────────────────────────────────────
    // Schema
    // ─────────────────────────────────────────────────────────────────────────

    /// Look up a table. `Ok(None)` when it does not exist.
    fn table_info(&self, schema: &str, table: &str) -> Result<Option<TableInfo>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Fetch the row with the given key.
    fn fetch_row(&self, schema: &str, info: &TableInfo, key: &[Value]) -> Result<Option<Row>>;

    /// All rows, ordered by primary key.
    fn scan_rows(&self, schema: &str, info: &TableInfo) -> Result<Vec<Row>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a full row. For rowid-keyed tables a `Null` rowid lets the
    /// engine pick one.
    fn insert_row(&mut self, schema: &str, info: &TableInfo, row: &[Value]) -> Result<WriteResult>;

    /// Overwrite the row with key `key` with the full image `row`.
    fn update_row(
        &mut self,
        schema: &str,
        info: &TableInfo,
        key: &[Value],
        row: &[Value],
    ) -> Result<WriteResult>;

    /// Delete the row with key `key`.
    fn delete_row(&mut self, schema: &str, info: &TableInfo, key: &[Value]) -> Result<WriteResult>;

    // ─────────────────────────────────────────────────────────────────────────
    // Savepoints
    // ─────────────────────────────────────────────────────────────────────────

    /// Open a named savepoint.
    fn savepoint(&mut self, name: &str) -> Result<()>;

    /// Keep everything since the savepoint and close it.
    fn release(&mut self, name: &str) -> Result<()>;

    /// Undo everything since the savepoint and close it.
    fn rollback_to(&mut self, name: &str) -> Result<()>;
}

/// Quote an SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_implicit_rowid_layout() {
        let info = TableInfo::with_implicit_rowid("log", vec!["msg".into()]);
        assert_eq!(info.columns, vec!["rowid", "msg"]);
        assert_eq!(info.header.primary_key(), &[true, false]);
        assert_eq!(info.sql_column(0), "rowid");
        assert_eq!(info.sql_column(1), "\"msg\"");
        assert_eq!(info.key_len(), 1);
    }

    #[test]
    fn test_key_of_and_arity() {
        let info = TableInfo::new(
            "t",
            vec!["a".into(), "b".into(), "c".into()],
            vec![false, true, true],
        );
        let row = vec![Value::Integer(1), Value::Integer(2), Value::from("x")];
        assert_eq!(info.key_of(&row), vec![Value::Integer(2), Value::from("x")]);
        assert!(info.check_row(&row).is_ok());
        assert!(matches!(
            info.check_key(&row),
            Err(StoreError::Arity { expected: 2, actual: 3, .. })
        ));
        assert_eq!(info.column_index("B"), Some(1));
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
