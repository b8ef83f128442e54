//! Error types for rowsync core.

use thiserror::Error;

/// Structural failures while decoding a changeset or patchset.
///
/// Every variant means the buffer is malformed; the decoder never attempts
/// partial recovery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unexpected end of input at offset {offset}")]
    Truncated { offset: usize },

    #[error("unknown table marker 0x{marker:02x} at offset {offset}")]
    UnknownTableMarker { marker: u8, offset: usize },

    #[error("unsupported format version {0}")]
    UnsupportedVersion(u8),

    #[error("unknown operation tag {tag} at offset {offset}")]
    UnknownOperation { tag: u8, offset: usize },

    #[error("unknown value tag {tag} at offset {offset}")]
    UnknownValueTag { tag: u8, offset: usize },

    #[error("changeset and patchset blocks mixed in one buffer")]
    MixedFormats,

    #[error("table header declares zero columns")]
    EmptyTable,

    #[error("varint overflows 64 bits at offset {offset}")]
    VarintOverflow { offset: usize },

    #[error("invalid UTF-8 in {what}")]
    InvalidUtf8 { what: &'static str },

    #[error("malformed record: {0}")]
    MalformedRecord(String),
}

/// Result type for codec operations.
pub type CodecResult<T> = std::result::Result<T, CodecError>;
