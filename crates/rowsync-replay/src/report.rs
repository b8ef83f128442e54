//! Outcome of a replay.

/// Counts of what a replay did with each operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Operations applied without conflict.
    pub applied: usize,
    /// Operations dropped by an OMIT resolution.
    pub omitted: usize,
    /// Operations forced through by a REPLACE resolution.
    pub replaced: usize,
    /// Operations on tables that were filtered out or do not match.
    pub skipped: usize,
    /// Conflicts handed to the resolver.
    pub conflicts: usize,
    /// Tables skipped, in order of first encounter.
    pub skipped_tables: Vec<String>,
    /// The resolver answered ABORT and everything was rolled back.
    pub aborted: bool,
}

impl ApplyReport {
    /// Whether the replay ran to completion.
    pub fn succeeded(&self) -> bool {
        !self.aborted
    }

    /// Total operations seen.
    pub fn total(&self) -> usize {
        self.applied + self.omitted + self.replaced + self.skipped
    }
}
