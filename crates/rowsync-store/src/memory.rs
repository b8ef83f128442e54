//! In-memory implementation of the RowStore trait.
//!
//! This is primarily for testing replay without SQLite. It enforces
//! primary-key uniqueness and NOT NULL columns; foreign keys and other
//! constraints are not modelled.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use rowsync_core::{Row, Value};

use crate::error::{Result, StoreError};
use crate::traits::{Rejection, RowStore, TableInfo, WriteResult};

/// Schema that `create_table` places tables in.
const DEFAULT_SCHEMA: &str = "main";

/// In-memory engine.
///
/// All data is lost when the engine is dropped. Savepoints snapshot the
/// whole database.
#[derive(Default)]
pub struct MemoryEngine {
    tables: Tables,
    savepoints: Vec<(String, Tables)>,
}

/// Tables keyed by lowercased (schema, name).
type Tables = BTreeMap<(String, String), MemTable>;

#[derive(Clone)]
struct MemTable {
    info: TableInfo,
    not_null: Vec<bool>,
    rows: Vec<Row>,
    next_rowid: i64,
}

impl MemTable {
    fn position(&self, key: &[Value]) -> Option<usize> {
        self.rows
            .iter()
            .position(|row| self.info.key_of(row) == key)
    }

    fn null_violation(&self, row: &[Value]) -> Option<String> {
        self.not_null
            .iter()
            .zip(row)
            .zip(&self.info.columns)
            .find(|((required, value), _)| **required && value.is_null())
            .map(|(_, column)| format!("NOT NULL constraint failed: {}.{}", self.info.name(), column))
    }

    fn unique_violation(&self) -> WriteResult {
        let key: Vec<String> = self
            .info
            .header
            .key_columns()
            .map(|i| format!("{}.{}", self.info.name(), self.info.columns[i]))
            .collect();
        WriteResult::Rejected {
            reason: Rejection::Constraint,
            message: format!("UNIQUE constraint failed: {}", key.join(", ")),
        }
    }
}

impl MemoryEngine {
    /// Create a new empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table in `main`. Each column is `(name, is_key)`.
    pub fn create_table(&mut self, name: &str, columns: &[(&str, bool)]) -> &mut Self {
        let names = columns.iter().map(|(c, _)| c.to_string()).collect();
        let keys = columns.iter().map(|(_, k)| *k).collect();
        self.add(TableInfo::new(name, names, keys))
    }

    /// Create a rowid-keyed table in `main`.
    pub fn create_rowid_table(&mut self, name: &str, columns: &[&str]) -> &mut Self {
        let names = columns.iter().map(|c| c.to_string()).collect();
        self.add(TableInfo::with_implicit_rowid(name, names))
    }

    /// Mark a column NOT NULL.
    pub fn set_not_null(&mut self, table: &str, column: &str) -> &mut Self {
        if let Some(t) = self.tables.get_mut(&table_key(DEFAULT_SCHEMA, table)) {
            if let Some(i) = t.info.column_index(column) {
                t.not_null[i] = true;
            }
        }
        self
    }

    fn add(&mut self, info: TableInfo) -> &mut Self {
        let n = info.column_count();
        let key = table_key(DEFAULT_SCHEMA, info.name());
        self.tables.insert(
            key,
            MemTable {
                info,
                not_null: vec![false; n],
                rows: Vec::new(),
                next_rowid: 1,
            },
        );
        self
    }

    fn table_mut(&mut self, schema: &str, info: &TableInfo) -> Result<&mut MemTable> {
        self.tables
            .get_mut(&table_key(schema, info.name()))
            .ok_or_else(|| StoreError::NoSuchTable(info.name().to_string()))
    }

    fn table(&self, schema: &str, info: &TableInfo) -> Result<&MemTable> {
        self.tables
            .get(&table_key(schema, info.name()))
            .ok_or_else(|| StoreError::NoSuchTable(info.name().to_string()))
    }

    fn savepoint_index(&self, name: &str) -> Result<usize> {
        self.savepoints
            .iter()
            .rposition(|(n, _)| n.eq_ignore_ascii_case(name))
            .ok_or_else(|| StoreError::NoSuchSavepoint(name.to_string()))
    }
}

impl RowStore for MemoryEngine {
    fn table_info(&self, schema: &str, table: &str) -> Result<Option<TableInfo>> {
        Ok(self
            .tables
            .get(&table_key(schema, table))
            .map(|t| t.info.clone()))
    }

    fn fetch_row(&self, schema: &str, info: &TableInfo, key: &[Value]) -> Result<Option<Row>> {
        info.check_key(key)?;
        let table = self.table(schema, info)?;
        Ok(table.position(key).map(|i| table.rows[i].clone()))
    }

    fn scan_rows(&self, schema: &str, info: &TableInfo) -> Result<Vec<Row>> {
        let table = self.table(schema, info)?;
        let mut rows = table.rows.clone();
        rows.sort_by(|a, b| compare_keys(&info.key_of(a), &info.key_of(b)));
        Ok(rows)
    }

    fn insert_row(&mut self, schema: &str, info: &TableInfo, row: &[Value]) -> Result<WriteResult> {
        info.check_row(row)?;
        let table = self.table_mut(schema, info)?;

        let mut row = row.to_vec();
        if table.info.implicit_rowid && row[0].is_null() {
            row[0] = Value::Integer(table.next_rowid);
        }
        if let Some(message) = table.null_violation(&row) {
            return Ok(WriteResult::Rejected {
                reason: Rejection::Constraint,
                message,
            });
        }
        if table.position(&table.info.key_of(&row)).is_some() {
            return Ok(table.unique_violation());
        }

        let rowid = match row[0] {
            Value::Integer(id) if table.info.implicit_rowid => {
                table.next_rowid = table.next_rowid.max(id + 1);
                Some(id)
            }
            _ => None,
        };
        table.rows.push(row);
        Ok(WriteResult::Written { rowid })
    }

    fn update_row(
        &mut self,
        schema: &str,
        info: &TableInfo,
        key: &[Value],
        row: &[Value],
    ) -> Result<WriteResult> {
        info.check_key(key)?;
        info.check_row(row)?;
        let table = self.table_mut(schema, info)?;

        let Some(index) = table.position(key) else {
            return Ok(WriteResult::Written { rowid: None });
        };
        if let Some(message) = table.null_violation(row) {
            return Ok(WriteResult::Rejected {
                reason: Rejection::Constraint,
                message,
            });
        }
        let new_key = table.info.key_of(row);
        if new_key != key && table.position(&new_key).is_some() {
            return Ok(table.unique_violation());
        }

        table.rows[index] = row.to_vec();
        Ok(WriteResult::Written { rowid: None })
    }

    fn delete_row(&mut self, schema: &str, info: &TableInfo, key: &[Value]) -> Result<WriteResult> {
        info.check_key(key)?;
        let table = self.table_mut(schema, info)?;
        if let Some(index) = table.position(key) {
            table.rows.remove(index);
        }
        Ok(WriteResult::Written { rowid: None })
    }

    fn savepoint(&mut self, name: &str) -> Result<()> {
        self.savepoints.push((name.to_string(), self.tables.clone()));
        Ok(())
    }

    fn release(&mut self, name: &str) -> Result<()> {
        let index = self.savepoint_index(name)?;
        self.savepoints.truncate(index);
        Ok(())
    }

    fn rollback_to(&mut self, name: &str) -> Result<()> {
        let index = self.savepoint_index(name)?;
        let (_, snapshot) = self.savepoints.swap_remove(index);
        self.savepoints.truncate(index);
        self.tables = snapshot;
        Ok(())
    }
}

fn table_key(schema: &str, table: &str) -> (String, String) {
    (schema.to_ascii_lowercase(), table.to_ascii_lowercase())
}

/// Order values the way SQLite does: NULL, numbers, TEXT, BLOB.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn class(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Integer(_) | Value::Real(_) => 1,
            Value::Text(_) => 2,
            Value::Blob(_) => 3,
        }
    }

    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => x.cmp(y),
        (Value::Integer(x), Value::Real(y)) => (*x as f64).partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Real(x), Value::Integer(y)) => x.partial_cmp(&(*y as f64)).unwrap_or(Ordering::Equal),
        (Value::Real(x), Value::Real(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        (Value::Blob(x), Value::Blob(y)) => x.cmp(y),
        _ => class(a).cmp(&class(b)),
    }
}

fn compare_keys(a: &[Value], b: &[Value]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| compare_values(x, y))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_core::row;

    fn engine() -> MemoryEngine {
        let mut engine = MemoryEngine::new();
        engine
            .create_table("users", &[("id", true), ("name", false)])
            .set_not_null("users", "name")
            .create_rowid_table("notes", &["body"]);
        engine
    }

    fn info(engine: &MemoryEngine, table: &str) -> TableInfo {
        engine.table_info("main", table).unwrap().unwrap()
    }

    #[test]
    fn test_insert_and_unique_key() {
        let mut engine = engine();
        let users = info(&engine, "Users");

        assert!(engine.insert_row("main", &users, &row![1, "ann"]).unwrap().is_written());
        let dup = engine.insert_row("main", &users, &row![1, "bob"]).unwrap();
        assert!(matches!(
            dup,
            WriteResult::Rejected { reason: Rejection::Constraint, .. }
        ));
        let null = engine
            .insert_row("main", &users, &row![2, None::<String>])
            .unwrap();
        assert!(!null.is_written());
    }

    #[test]
    fn test_rowid_assignment() {
        let mut engine = engine();
        let notes = info(&engine, "notes");

        engine.insert_row("main", &notes, &row![5, "explicit"]).unwrap();
        let result = engine
            .insert_row("main", &notes, &row![None::<i64>, "auto"])
            .unwrap();
        assert_eq!(result, WriteResult::Written { rowid: Some(6) });
    }

    #[test]
    fn test_update_can_move_key() {
        let mut engine = engine();
        let users = info(&engine, "users");
        engine.insert_row("main", &users, &row![1, "ann"]).unwrap();
        engine.insert_row("main", &users, &row![2, "bob"]).unwrap();

        let clash = engine
            .update_row("main", &users, &row![1], &row![2, "ann"])
            .unwrap();
        assert!(!clash.is_written());

        engine
            .update_row("main", &users, &row![1], &row![3, "ann"])
            .unwrap();
        assert_eq!(
            engine.fetch_row("main", &users, &row![3]).unwrap(),
            Some(row![3, "ann"])
        );
        assert_eq!(engine.fetch_row("main", &users, &row![1]).unwrap(), None);
    }

    #[test]
    fn test_nested_savepoints() {
        let mut engine = engine();
        let users = info(&engine, "users");

        engine.savepoint("outer").unwrap();
        engine.insert_row("main", &users, &row![1, "ann"]).unwrap();
        engine.savepoint("inner").unwrap();
        engine.insert_row("main", &users, &row![2, "bob"]).unwrap();
        engine.rollback_to("inner").unwrap();
        assert_eq!(engine.scan_rows("main", &users).unwrap().len(), 1);

        engine.rollback_to("outer").unwrap();
        assert!(engine.scan_rows("main", &users).unwrap().is_empty());
        assert!(matches!(
            engine.release("outer"),
            Err(StoreError::NoSuchSavepoint(_))
        ));
    }

    #[test]
    fn test_scan_in_key_order() {
        let mut engine = engine();
        let users = info(&engine, "users");
        for id in [3, 1, 2] {
            engine.insert_row("main", &users, &row![id, "x"]).unwrap();
        }
        let ids: Vec<_> = engine
            .scan_rows("main", &users)
            .unwrap()
            .iter()
            .map(|r| r[0].clone())
            .collect();
        assert_eq!(ids, row![1, 2, 3]);
    }

    #[test]
    fn test_compare_values_storage_classes() {
        assert_eq!(compare_values(&Value::Null, &Value::Integer(0)), Ordering::Less);
        assert_eq!(compare_values(&Value::Integer(2), &Value::Real(1.5)), Ordering::Greater);
        assert_eq!(compare_values(&Value::from("a"), &Value::Blob(vec![])), Ordering::Less);
    }
}
