//! # rowsync store
//!
//! The boundary between rowsync and the SQL engine. Capture and replay
//! read table metadata, fetch rows, and write rows through the
//! [`RowStore`] trait, so they never build SQL themselves.
//!
//! ## Key Types
//!
//! - [`RowStore`] - Row-level reads, writes, and savepoints
//! - [`SqliteEngine`] - SQLite-backed engine (rusqlite, bundled)
//! - [`MemoryEngine`] - In-memory engine for tests
//! - [`TableInfo`] - Column names and key layout of one table
//! - [`WriteResult`] - A write either lands or is rejected by a constraint
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rowsync_store::{RowStore, SqliteEngine};
//!
//! let engine = SqliteEngine::open_in_memory().unwrap();
//! engine.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)").unwrap();
//! let info = engine.table_info("main", "t").unwrap().unwrap();
//! assert_eq!(info.columns, vec!["id", "v"]);
//! ```
//!
//! ## Design Notes
//!
//! - **Rejections are values**: constraint failures come back as
//!   [`WriteResult::Rejected`] so replay can turn them into conflicts.
//! - **Implicit rowid**: tables without a declared key expose `rowid` as a
//!   leading key column.

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::{compare_values, MemoryEngine};
pub use sqlite::{from_sql_ref, to_sql_value, SqliteEngine, MEMORY_LOCATION};
pub use traits::{quote_ident, Rejection, RowStore, TableInfo, WriteResult, ROWID_COLUMN};
