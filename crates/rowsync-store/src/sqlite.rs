//! SQLite implementation of the RowStore trait.
//!
//! This is the primary engine. It wraps a single rusqlite connection and
//! builds row statements from table metadata, caching them per connection.

use std::path::Path;
use std::time::Duration;

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode, OpenFlags, OptionalExtension};
use tracing::debug;

use rowsync_core::{Row, Value};

use crate::error::{Result, StoreError};
use crate::traits::{quote_ident, Rejection, RowStore, TableInfo, WriteResult};

/// Location string for a private in-memory database.
pub const MEMORY_LOCATION: &str = ":memory:";

/// SQLite-based engine.
///
/// Not thread-safe; the owning connection serializes all access.
pub struct SqliteEngine {
    conn: Connection,
    location: String,
}

impl SqliteEngine {
    /// Open a database at `location`, or a private in-memory database for
    /// [`MEMORY_LOCATION`].
    pub fn open(location: &str, read_only: bool) -> Result<Self> {
        let flags = if read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
        } else {
            OpenFlags::default()
        };
        let conn = if location == MEMORY_LOCATION {
            Connection::open_in_memory_with_flags(flags)?
        } else {
            Connection::open_with_flags(Path::new(location), flags)?
        };
        debug!(location, read_only, "opened sqlite engine");
        Ok(Self {
            conn,
            location: location.to_string(),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(MEMORY_LOCATION, false)
    }

    /// The location this engine was opened with.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Turn foreign-key enforcement on or off.
    pub fn set_foreign_keys(&self, enabled: bool) -> Result<()> {
        self.conn.pragma_update(None, "foreign_keys", enabled)?;
        Ok(())
    }

    /// Wait up to `timeout` for locks held by other connections.
    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<()> {
        self.conn.busy_timeout(timeout)?;
        Ok(())
    }

    /// Run a batch of SQL statements.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    /// Whether an explicit transaction is open.
    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    /// Start an explicit transaction.
    pub fn begin(&self) -> Result<()> {
        self.execute_batch("BEGIN")
    }

    /// Commit the open transaction.
    pub fn commit(&self) -> Result<()> {
        self.execute_batch("COMMIT")
    }

    /// Roll back the open transaction.
    pub fn rollback(&self) -> Result<()> {
        self.execute_batch("ROLLBACK")
    }

    /// Finalize every cached prepared statement.
    pub fn flush_prepared_statement_cache(&self) {
        self.conn.flush_prepared_statement_cache();
    }

    /// Close the underlying handle.
    ///
    /// Cached statements must be flushed first or the close may fail with
    /// `SQLITE_BUSY`.
    pub fn close(self) -> Result<()> {
        let location = self.location;
        self.conn.close().map_err(|(_, e)| StoreError::Database(e))?;
        debug!(location = %location, "closed sqlite engine");
        Ok(())
    }

    fn select_sql(schema: &str, info: &TableInfo) -> String {
        let columns: Vec<String> = (0..info.column_count())
            .map(|i| info.sql_column(i))
            .collect();
        format!(
            "SELECT {} FROM {}.{}",
            columns.join(", "),
            quote_ident(schema),
            quote_ident(info.name())
        )
    }

    /// `WHERE` clause over the key columns, numbering parameters from `first`.
    fn key_predicate(info: &TableInfo, first: usize) -> String {
        info.header
            .key_columns()
            .enumerate()
            .map(|(n, i)| format!("{} IS ?{}", info.sql_column(i), first + n))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    fn write(&self, sql: &str, params: Vec<SqlValue>) -> Result<WriteResult> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        match stmt.execute(params_from_iter(params.iter())) {
            Ok(_) => Ok(WriteResult::Written { rowid: None }),
            Err(e) => classify_rejection(e),
        }
    }
}

impl RowStore for SqliteEngine {
    fn table_info(&self, schema: &str, table: &str) -> Result<Option<TableInfo>> {
        let master = format!(
            "SELECT name, sql FROM {}.sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
            quote_ident(schema)
        );
        let found: Option<(String, Option<String>)> = self
            .conn
            .prepare_cached(&master)?
            .query_row([table], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;

        let Some((name, sql)) = found else {
            return Ok(None);
        };
        let is_virtual = sql
            .as_deref()
            .map(|s| s.trim_start().to_ascii_uppercase().starts_with("CREATE VIRTUAL"))
            .unwrap_or(false);
        if is_virtual {
            return Err(StoreError::Unsupported {
                table: name,
                reason: "virtual tables cannot be tracked".into(),
            });
        }

        let pragma = format!(
            "PRAGMA {}.table_info({})",
            quote_ident(schema),
            quote_ident(&name)
        );
        let mut stmt = self.conn.prepare(&pragma)?;
        let columns: Vec<(String, bool)> = stmt
            .query_map([], |row| {
                let pk: i64 = row.get("pk")?;
                Ok((row.get("name")?, pk > 0))
            })?
            .collect::<rusqlite::Result<_>>()?;

        let (names, keys): (Vec<String>, Vec<bool>) = columns.into_iter().unzip();
        let info = if keys.iter().any(|&k| k) {
            TableInfo::new(name, names, keys)
        } else {
            TableInfo::with_implicit_rowid(name, names)
        };
        Ok(Some(info))
    }

    fn fetch_row(&self, schema: &str, info: &TableInfo, key: &[Value]) -> Result<Option<Row>> {
        info.check_key(key)?;
        let sql = format!(
            "{} WHERE {}",
            Self::select_sql(schema, info),
            Self::key_predicate(info, 1)
        );
        let n = info.column_count();
        let row = self
            .conn
            .prepare_cached(&sql)?
            .query_row(params_from_iter(key.iter().map(to_sql_value)), |row| {
                read_row(row, n)
            })
            .optional()?;
        Ok(row)
    }

    fn scan_rows(&self, schema: &str, info: &TableInfo) -> Result<Vec<Row>> {
        let order: Vec<String> = info.header.key_columns().map(|i| info.sql_column(i)).collect();
        let sql = format!(
            "{} ORDER BY {}",
            Self::select_sql(schema, info),
            order.join(", ")
        );
        let n = info.column_count();
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map([], |row| read_row(row, n))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn insert_row(&mut self, schema: &str, info: &TableInfo, row: &[Value]) -> Result<WriteResult> {
        info.check_row(row)?;
        let columns: Vec<String> = (0..info.column_count())
            .map(|i| info.sql_column(i))
            .collect();
        let placeholders: Vec<String> = (1..=row.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {}.{} ({}) VALUES ({})",
            quote_ident(schema),
            quote_ident(info.name()),
            columns.join(", "),
            placeholders.join(", ")
        );
        match self.write(&sql, row.iter().map(to_sql_value).collect())? {
            WriteResult::Written { .. } => Ok(WriteResult::Written {
                rowid: Some(self.conn.last_insert_rowid()),
            }),
            rejected => Ok(rejected),
        }
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
        let assignments: Vec<String> = (0..info.column_count())
            .map(|i| format!("{} = ?{}", info.sql_column(i), i + 1))
            .collect();
        let sql = format!(
            "UPDATE {}.{} SET {} WHERE {}",
            quote_ident(schema),
            quote_ident(info.name()),
            assignments.join(", "),
            Self::key_predicate(info, row.len() + 1)
        );
        let params = row.iter().chain(key.iter()).map(to_sql_value).collect();
        self.write(&sql, params)
    }

    fn delete_row(&mut self, schema: &str, info: &TableInfo, key: &[Value]) -> Result<WriteResult> {
        info.check_key(key)?;
        let sql = format!(
            "DELETE FROM {}.{} WHERE {}",
            quote_ident(schema),
            quote_ident(info.name()),
            Self::key_predicate(info, 1)
        );
        self.write(&sql, key.iter().map(to_sql_value).collect())
    }

    fn savepoint(&mut self, name: &str) -> Result<()> {
        self.execute_batch(&format!("SAVEPOINT {}", quote_ident(name)))
    }

    fn release(&mut self, name: &str) -> Result<()> {
        self.execute_batch(&format!("RELEASE {}", quote_ident(name)))
    }

    fn rollback_to(&mut self, name: &str) -> Result<()> {
        let name = quote_ident(name);
        self.execute_batch(&format!("ROLLBACK TO {0}; RELEASE {0}", name))
    }
}

/// Turn a constraint failure into a rejection; pass every other error up.
fn classify_rejection(err: rusqlite::Error) -> Result<WriteResult> {
    match err {
        rusqlite::Error::SqliteFailure(e, message) if e.code == ErrorCode::ConstraintViolation => {
            let reason = if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY {
                Rejection::ForeignKey
            } else {
                Rejection::Constraint
            };
            Ok(WriteResult::Rejected {
                reason,
                message: message.unwrap_or_else(|| e.to_string()),
            })
        }
        other => Err(other.into()),
    }
}

fn read_row(row: &rusqlite::Row<'_>, n: usize) -> rusqlite::Result<Row> {
    (0..n).map(|i| row.get_ref(i).and_then(from_sql_ref)).collect()
}

/// Convert a value to its rusqlite form.
pub fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Real(r) => SqlValue::Real(*r),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Blob(b) => SqlValue::Blob(b.clone()),
    }
}

/// Convert a column read from SQLite.
///
/// TEXT that is not valid UTF-8 is an error rather than a silently
/// repaired value.
pub fn from_sql_ref(value: ValueRef<'_>) -> rusqlite::Result<Value> {
    Ok(match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(r) => Value::Real(r),
        ValueRef::Text(t) => {
            let text = std::str::from_utf8(t).map_err(rusqlite::Error::Utf8Error)?;
            Value::Text(text.to_owned())
        }
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    })
}
