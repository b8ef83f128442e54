//! Conflict kinds and resolutions raised during replay.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::change::OpKind;
use crate::value::Row;

/// Why an operation could not be applied as recorded.
///
/// Discriminants match the engine's conflict codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ConflictKind {
    /// The target row exists but differs from the expected before-image.
    Data = 1,
    /// The target row for an UPDATE or DELETE does not exist.
    NotFound = 2,
    /// An INSERT collides with an existing row with the same key.
    Conflict = 3,
    /// The engine rejected the write for a constraint unrelated to tracking.
    Constraint = 4,
    /// The engine rejected the write for a foreign-key violation.
    ForeignKey = 5,
}

impl ConflictKind {
    /// Numeric code.
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Whether REPLACE is a meaningful answer for this kind.
    pub fn allows_replace(self) -> bool {
        matches!(
            self,
            ConflictKind::Data | ConflictKind::NotFound | ConflictKind::Conflict
        )
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConflictKind::Data => "DATA",
            ConflictKind::NotFound => "NOTFOUND",
            ConflictKind::Conflict => "CONFLICT",
            ConflictKind::Constraint => "CONSTRAINT",
            ConflictKind::ForeignKey => "FOREIGN_KEY",
        };
        f.write_str(s)
    }
}

/// How the resolver wants a conflict handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum ConflictResolution {
    /// Skip the operation and continue.
    #[default]
    Omit = 0,
    /// Force the operation over the target's current state and continue.
    Replace = 1,
    /// Stop, roll back everything this replay applied, and report failure.
    Abort = 2,
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConflictResolution::Omit => "OMIT",
            ConflictResolution::Replace => "REPLACE",
            ConflictResolution::Abort => "ABORT",
        };
        f.write_str(s)
    }
}

/// A conflict handed to the resolver.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictEvent {
    pub kind: ConflictKind,
    pub table: String,
    pub op: OpKind,
    /// The target's current row, when one exists.
    pub current: Option<Row>,
    /// Engine message for CONSTRAINT and FOREIGN_KEY conflicts.
    pub message: Option<String>,
}
