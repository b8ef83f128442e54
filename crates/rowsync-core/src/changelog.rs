//! The append-only change log owned by a session.

use std::sync::Arc;

use crate::change::{ChangeLogEntry, RowChange};
use crate::table::TableHeader;

/// Position in a log, returned by [`ChangeLog::mark`].
///
/// The default mark is the start of the log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct LogMark(usize);

/// Ordered record of row operations, in capture order.
///
/// Repeated operations on the same row are kept as separate entries; the
/// log never coalesces.
#[derive(Debug, Clone, Default)]
pub struct ChangeLog {
    entries: Vec<ChangeLogEntry>,
}

impl ChangeLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one operation.
    pub fn record(&mut self, table: Arc<TableHeader>, change: RowChange) {
        self.entries.push(ChangeLogEntry::new(table, change));
    }

    /// All entries in capture order. Reading does not consume them.
    pub fn entries(&self) -> &[ChangeLogEntry] {
        &self.entries
    }

    /// Number of recorded entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current end of the log.
    pub fn mark(&self) -> LogMark {
        LogMark(self.entries.len())
    }

    /// Drop entries recorded after `mark`.
    ///
    /// Only for effects the engine rolled back; entries before the mark are
    /// untouched.
    pub fn discard_since(&mut self, mark: LogMark) {
        self.entries.truncate(mark.0);
    }
}
