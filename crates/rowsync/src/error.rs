//! Error types for connections and sessions.

use rowsync_core::CodecError;
use rowsync_replay::ReplayError;
use rowsync_store::{Rejection, StoreError};
use thiserror::Error;

/// Errors that can occur on a connection or session.
#[derive(Debug, Error)]
pub enum Error {
    /// The connection has been closed.
    #[error("connection is not open")]
    ConnectionNotOpen,

    /// The session has been closed, directly or by its connection.
    #[error("session is not open")]
    SessionNotOpen,

    /// A replay callback tried to use the connection that is replaying.
    #[error("connection is busy applying a changeset")]
    ConnectionBusy,

    /// The buffer is not a well-formed changeset or patchset.
    #[error("malformed changeset: {0}")]
    MalformedChangeset(#[from] CodecError),

    /// Engine error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Replay stopped on a resolver failure or an invalid resolution.
    #[error("replay failed: {0}")]
    Replay(#[source] ReplayError),

    /// The engine refused a write made through the connection.
    #[error("write to {table} rejected: {message}")]
    Rejected {
        table: String,
        reason: Rejection,
        message: String,
    },

    /// Table not found.
    #[error("no such table: {0}")]
    UnknownTable(String),

    /// Column not found.
    #[error("no such column: {table}.{column}")]
    UnknownColumn { table: String, column: String },

    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl From<ReplayError> for Error {
    fn from(e: ReplayError) -> Self {
        match e {
            ReplayError::Codec(c) => Error::MalformedChangeset(c),
            ReplayError::Store(s) => Error::Store(s),
            other => Error::Replay(other),
        }
    }
}

/// Result type for connection and session operations.
pub type Result<T> = std::result::Result<T, Error>;
