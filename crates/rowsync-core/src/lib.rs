//! # rowsync core
//!
//! Pure primitives for row change capture: column values, table headers,
//! change logs, and the changeset/patchset codec.
//!
//! This crate performs no I/O. Everything here is computation over
//! in-memory values, so it can be tested without a database.
//!
//! ## Key Types
//!
//! - [`Value`] - A typed column value
//! - [`TableHeader`] - Table name and primary-key layout carried in a changeset
//! - [`ChangeLogEntry`] - One captured row operation with its images
//! - [`ChangeLog`] - Ordered log of entries owned by a session
//! - [`ConflictKind`] / [`ConflictResolution`] - Replay conflict vocabulary
//!
//! ## Encoding
//!
//! Logs serialize to a compact binary form in one of two modes; see the
//! [`codec`] module for the byte layout.

pub mod change;
pub mod changelog;
pub mod codec;
pub mod conflict;
pub mod error;
pub mod table;
pub mod value;

pub use change::{ChangeLogEntry, OpKind, RowChange};
pub use changelog::{ChangeLog, LogMark};
pub use codec::{
    decode, detect_mode, encode, encode_changeset, encode_patchset, is_patchset, summarize,
    ChangesetReader, DecodedOperation, EncodeMode, Image, TableSummary,
};
pub use conflict::{ConflictEvent, ConflictKind, ConflictResolution};
pub use error::{CodecError, CodecResult};
pub use table::TableHeader;
pub use value::{Row, Value};
