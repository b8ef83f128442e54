//! # rowsync
//!
//! Session-based row change capture for SQLite: record what a connection
//! writes, export it as a compact changeset, and replay it elsewhere with
//! caller-controlled conflict resolution.
//!
//! ## Overview
//!
//! - **Sessions** attach to a [`Connection`] and record every row insert,
//!   update, and delete it performs, optionally scoped to one table.
//! - **Changesets** carry the before-images replay checks against;
//!   **patchsets** carry only keys and changed columns.
//! - **Replay** applies a changeset to another connection. Rows that do
//!   not match the expected before-image raise a conflict, answered by a
//!   resolver with OMIT, REPLACE, or ABORT.
//!
//! ## Key Concepts
//!
//! - **Cascade**: closing a connection closes its sessions first. A
//!   session handle that outlives its connection fails with
//!   [`Error::SessionNotOpen`] rather than touching freed state.
//! - **Abort**: a resolver answering ABORT rolls the replay back and makes
//!   [`Connection::apply_changeset`] return `Ok(false)`. Malformed input
//!   and engine failures are errors.
//!
//! ## Usage
//!
//! ```rust
//! use rowsync::{row, ApplyOptions, Connection, ConflictResolution, SessionOptions};
//!
//! let source = Connection::open_in_memory().unwrap();
//! let target = Connection::open_in_memory().unwrap();
//! for conn in [&source, &target] {
//!     conn.exec("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)").unwrap();
//! }
//!
//! let session = source.create_session(SessionOptions::new()).unwrap();
//! source.insert("users", row![1, "ann"]).unwrap();
//! let changeset = session.changeset().unwrap();
//!
//! let options = ApplyOptions::new().resolve_all(ConflictResolution::Replace);
//! assert!(target.apply_changeset(&changeset, options).unwrap());
//! assert_eq!(target.get("users", &row![1]).unwrap(), Some(row![1, "ann"]));
//! ```
//!
//! ## Re-exports
//!
//! - `rowsync::core` - Values, change logs, and the changeset codec
//! - `rowsync::store` - The engine boundary and its SQLite implementation
//! - `rowsync::replay` - The replay engine and convergence digests

pub mod config;
pub mod connection;
pub mod error;
mod recording;
pub mod session;

// Re-export component crates
pub use rowsync_core as core;
pub use rowsync_replay as replay;
pub use rowsync_store as store;

pub use config::{ConnectionConfig, SessionOptions};
pub use connection::Connection;
pub use error::{Error, Result};
pub use session::{Session, SessionId};

pub use rowsync_core::{
    decode, is_patchset, row, summarize, ChangeLogEntry, ChangesetReader, ConflictEvent,
    ConflictKind, ConflictResolution, DecodedOperation, EncodeMode, OpKind, Row, RowChange,
    TableSummary, Value,
};
pub use rowsync_replay::{ApplyOptions, ApplyReport, ResolverError, TableDigest};
pub use rowsync_store::Rejection;
