//! Error types for replay.

use rowsync_core::{CodecError, ConflictKind, ConflictResolution, OpKind};
use thiserror::Error;

use crate::options::ResolverError;

/// Errors that stop a replay.
///
/// Every error is raised after the replay's savepoint has been rolled
/// back, so the target is left as it was.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// The buffer is not a well-formed changeset or patchset.
    #[error("malformed changeset: {0}")]
    Codec(#[from] CodecError),

    /// The engine failed.
    #[error("store error: {0}")]
    Store(#[from] rowsync_store::StoreError),

    /// The conflict resolver returned an error.
    #[error("conflict resolver failed: {0}")]
    Resolver(#[source] ResolverError),

    /// The resolver answered with a resolution that cannot be carried out.
    #[error("{resolution} is not valid for a {kind} conflict on {op} into {table}")]
    InvalidResolution {
        kind: ConflictKind,
        op: OpKind,
        table: String,
        resolution: ConflictResolution,
    },
}

/// Result type for replay operations.
pub type Result<T> = std::result::Result<T, ReplayError>;
