//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during store operations.
///
/// Constraint rejections of individual writes are not errors; they are
/// reported as [`WriteResult::Rejected`](crate::WriteResult::Rejected).
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The table does not exist in the given schema.
    #[error("no such table: {0}")]
    NoSuchTable(String),

    /// The table exists but cannot be tracked.
    #[error("unsupported table {table}: {reason}")]
    Unsupported { table: String, reason: String },

    /// A row or key has the wrong number of values.
    #[error("{table}: expected {expected} values, got {actual}")]
    Arity {
        table: String,
        expected: usize,
        actual: usize,
    },

    /// No savepoint with this name is open.
    #[error("no such savepoint: {0}")]
    NoSuchSavepoint(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
