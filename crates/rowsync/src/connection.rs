//! The Connection: root owner of the engine handle and its sessions.
//!
//! A connection is single-threaded. Its state lives behind an
//! `Rc<RefCell<_>>` so sessions can hold a weak back-reference; a callback
//! that re-enters the connection while it is replaying gets
//! [`Error::ConnectionBusy`] instead of a panic.

use std::cell::{RefCell, RefMut};
use std::rc::Rc;

use tracing::debug;

use rowsync_core::{LogMark, Row, Value};
use rowsync_replay::{table_digest, ApplyOptions, ApplyReport, TableDigest};
use rowsync_store::{RowStore, SqliteEngine, TableInfo, WriteResult};

use crate::config::{ConnectionConfig, SessionOptions};
use crate::error::{Error, Result};
use crate::recording::RecordingStore;
use crate::session::{Session, SessionArena, SessionId};

/// Connection state shared with session handles.
pub(crate) struct ConnectionInner {
    /// `None` once closed.
    engine: Option<SqliteEngine>,
    pub(crate) sessions: SessionArena,
    config: ConnectionConfig,
    /// Session log positions at `begin()`.
    transaction_marks: Option<Vec<(SessionId, LogMark)>>,
}

impl ConnectionInner {
    fn engine(&mut self) -> Result<&mut SqliteEngine> {
        self.engine.as_mut().ok_or(Error::ConnectionNotOpen)
    }

    /// Split into a recording store and nothing else borrowed.
    fn recording(&mut self) -> Result<RecordingStore<'_>> {
        let engine = self.engine.as_mut().ok_or(Error::ConnectionNotOpen)?;
        Ok(RecordingStore::new(engine, &mut self.sessions))
    }

    /// Tear down in order: sessions, cached statements, engine handle.
    ///
    /// `None` if already closed.
    fn shutdown(&mut self) -> Option<Result<()>> {
        let engine = self.engine.take()?;
        let sessions = self.sessions.close_all();
        self.transaction_marks = None;
        engine.flush_prepared_statement_cache();
        let result = engine.close().map_err(Error::from);
        debug!(location = %self.config.location, sessions, "connection closed");
        Some(result)
    }
}

/// An open database connection.
///
/// Row writes made through [`insert`](Self::insert),
/// [`update`](Self::update), [`delete`](Self::delete), and
/// [`apply_changeset`](Self::apply_changeset) are recorded by every open
/// session in scope. SQL run through [`exec`](Self::exec) is not.
pub struct Connection {
    inner: Rc<RefCell<ConnectionInner>>,
}

impl Connection {
    /// Open a connection.
    pub fn open(config: ConnectionConfig) -> Result<Self> {
        let engine = SqliteEngine::open(&config.location, config.read_only)?;
        engine.set_foreign_keys(config.enable_foreign_keys)?;
        if let Some(timeout) = config.busy_timeout_duration() {
            engine.set_busy_timeout(timeout)?;
        }
        debug!(
            location = %config.location,
            read_only = config.read_only,
            foreign_keys = config.enable_foreign_keys,
            "connection opened"
        );
        Ok(Self {
            inner: Rc::new(RefCell::new(ConnectionInner {
                engine: Some(engine),
                sessions: SessionArena::default(),
                config,
                transaction_marks: None,
            })),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(ConnectionConfig::in_memory())
    }

    fn borrow_mut(&self) -> Result<RefMut<'_, ConnectionInner>> {
        self.inner.try_borrow_mut().map_err(|_| Error::ConnectionBusy)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Whether the connection is open.
    pub fn is_open(&self) -> bool {
        // Only a replay holds the borrow, and replay needs an open engine.
        self.inner
            .try_borrow()
            .map_or(true, |inner| inner.engine.is_some())
    }

    /// The configured location.
    pub fn location(&self) -> Result<String> {
        let inner = self.inner.try_borrow().map_err(|_| Error::ConnectionBusy)?;
        Ok(inner.config.location.clone())
    }

    /// Close the connection.
    ///
    /// Every session is closed first. Closing twice fails with
    /// [`Error::ConnectionNotOpen`].
    pub fn close(&self) -> Result<()> {
        self.borrow_mut()?
            .shutdown()
            .unwrap_or(Err(Error::ConnectionNotOpen))
    }

    /// Start recording a session.
    pub fn create_session(&self, options: SessionOptions) -> Result<Session> {
        let mut inner = self.borrow_mut()?;
        inner.engine()?;
        let (id, open) = inner.sessions.insert(options.clone());
        debug!(session = %id, table = ?options.table, db = %options.db, "session created");
        Ok(Session::new(id, options, open, Rc::downgrade(&self.inner)))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transactions
    // ─────────────────────────────────────────────────────────────────────────

    /// Whether an explicit transaction is open.
    pub fn is_transaction(&self) -> Result<bool> {
        Ok(self.borrow_mut()?.engine()?.in_transaction())
    }

    /// Begin a transaction.
    pub fn begin(&self) -> Result<()> {
        let mut inner = self.borrow_mut()?;
        inner.engine()?.begin()?;
        inner.transaction_marks = Some(inner.sessions.marks());
        Ok(())
    }

    /// Commit the open transaction.
    pub fn commit(&self) -> Result<()> {
        let mut inner = self.borrow_mut()?;
        inner.engine()?.commit()?;
        inner.transaction_marks = None;
        Ok(())
    }

    /// Roll back the open transaction, and with it every entry sessions
    /// recorded since [`begin`](Self::begin).
    pub fn rollback(&self) -> Result<()> {
        let mut inner = self.borrow_mut()?;
        inner.engine()?.rollback()?;
        if let Some(marks) = inner.transaction_marks.take() {
            inner.sessions.discard_since(&marks);
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // SQL and rows
    // ─────────────────────────────────────────────────────────────────────────

    /// Run SQL statements (DDL, pragmas, ATTACH). Not recorded.
    pub fn exec(&self, sql: &str) -> Result<()> {
        self.borrow_mut()?.engine()?.execute_batch(sql)?;
        Ok(())
    }

    /// Column names of a table, led by `rowid` for tables without a key.
    pub fn columns(&self, table: &str) -> Result<Vec<String>> {
        let mut inner = self.borrow_mut()?;
        let (schema, _) = split_table(table);
        let info = lookup(inner.engine()?, schema, table)?;
        Ok(info.columns)
    }

    /// Insert a row and return its rowid.
    ///
    /// For tables without a declared key, pass only the declared columns;
    /// the engine assigns the rowid.
    pub fn insert(&self, table: &str, row: Row) -> Result<i64> {
        let mut inner = self.borrow_mut()?;
        let (schema, _) = split_table(table);
        let info = lookup(inner.engine()?, schema, table)?;

        let row = if info.implicit_rowid && row.len() + 1 == info.column_count() {
            std::iter::once(Value::Null).chain(row).collect()
        } else {
            row
        };

        let result = inner.recording()?.insert_row(schema, &info, &row)?;
        match checked(&info, result)? {
            Some(rowid) => Ok(rowid),
            None => Ok(0),
        }
    }

    /// Set columns of the row with key `key`. Returns false if no such row.
    pub fn update(&self, table: &str, key: &[Value], changes: &[(&str, Value)]) -> Result<bool> {
        let mut inner = self.borrow_mut()?;
        let (schema, _) = split_table(table);
        let info = lookup(inner.engine()?, schema, table)?;

        let Some(mut row) = inner.engine()?.fetch_row(schema, &info, key)? else {
            return Ok(false);
        };
        for (column, value) in changes {
            let index = info
                .column_index(column)
                .ok_or_else(|| Error::UnknownColumn {
                    table: info.name().to_string(),
                    column: column.to_string(),
                })?;
            row[index] = value.clone();
        }

        let result = inner.recording()?.update_row(schema, &info, key, &row)?;
        checked(&info, result)?;
        Ok(true)
    }

    /// Delete the row with key `key`. Returns false if no such row.
    pub fn delete(&self, table: &str, key: &[Value]) -> Result<bool> {
        let mut inner = self.borrow_mut()?;
        let (schema, _) = split_table(table);
        let info = lookup(inner.engine()?, schema, table)?;

        if inner.engine()?.fetch_row(schema, &info, key)?.is_none() {
            return Ok(false);
        }
        let result = inner.recording()?.delete_row(schema, &info, key)?;
        checked(&info, result)?;
        Ok(true)
    }

    /// Fetch the row with key `key`.
    pub fn get(&self, table: &str, key: &[Value]) -> Result<Option<Row>> {
        let mut inner = self.borrow_mut()?;
        let (schema, _) = split_table(table);
        let engine = inner.engine()?;
        let info = lookup(engine, schema, table)?;
        Ok(engine.fetch_row(schema, &info, key)?)
    }

    /// Every row of a table, in key order.
    pub fn rows(&self, table: &str) -> Result<Vec<Row>> {
        let mut inner = self.borrow_mut()?;
        let (schema, _) = split_table(table);
        let engine = inner.engine()?;
        let info = lookup(engine, schema, table)?;
        Ok(engine.scan_rows(schema, &info)?)
    }

    /// Digest of a table's rows, for comparing two databases.
    ///
    /// `None` if the table does not exist.
    pub fn digest(&self, table: &str) -> Result<Option<TableDigest>> {
        let mut inner = self.borrow_mut()?;
        let (schema, table) = split_table(table);
        Ok(table_digest(&*inner.engine()?, schema, table)?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Replay
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply a changeset or patchset.
    ///
    /// Returns `Ok(false)` only when the resolver answered ABORT, in which
    /// case nothing was applied.
    pub fn apply_changeset(&self, changeset: &[u8], options: ApplyOptions<'_>) -> Result<bool> {
        Ok(self
            .apply_changeset_with_report(changeset, options)?
            .succeeded())
    }

    /// Apply a changeset and report what happened to each operation.
    pub fn apply_changeset_with_report(
        &self,
        changeset: &[u8],
        mut options: ApplyOptions<'_>,
    ) -> Result<ApplyReport> {
        let mut inner = self.borrow_mut()?;
        let mut store = inner.recording()?;
        Ok(rowsync_replay::apply(&mut store, changeset, &mut options)?)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.try_borrow_mut() {
            if let Some(Err(e)) = inner.shutdown() {
                debug!(error = %e, "close on drop failed");
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("open", &self.is_open())
            .finish()
    }
}

/// Split `"schema.table"`; unqualified names are in `main`.
fn split_table(name: &str) -> (&str, &str) {
    name.split_once('.').unwrap_or(("main", name))
}

fn lookup(engine: &SqliteEngine, schema: &str, qualified: &str) -> Result<TableInfo> {
    let (_, table) = split_table(qualified);
    engine
        .table_info(schema, table)?
        .ok_or_else(|| Error::UnknownTable(qualified.to_string()))
}

/// Turn a rejection into an error; pass the rowid through.
fn checked(info: &TableInfo, result: WriteResult) -> Result<Option<i64>> {
    match result {
        WriteResult::Written { rowid } => Ok(rowid),
        WriteResult::Rejected { reason, message } => Err(Error::Rejected {
            table: info.name().to_string(),
            reason,
            message,
        }),
    }
}
