//! Caller hooks for a replay: the conflict resolver and the table filter.

use std::fmt;

use rowsync_core::{ConflictEvent, ConflictResolution};

/// Error type a resolver may fail with.
pub type ResolverError = Box<dyn std::error::Error + Send + Sync>;

/// Decides how each conflict is handled.
pub type ConflictResolver<'a> =
    Box<dyn FnMut(&ConflictEvent) -> Result<ConflictResolution, ResolverError> + 'a>;

/// Decides whether a table's operations are replayed at all.
pub type TableFilter<'a> = Box<dyn FnMut(&str) -> bool + 'a>;

/// Hooks for one replay.
///
/// Without a resolver every conflict is omitted. Without a filter every
/// table is included.
#[derive(Default)]
pub struct ApplyOptions<'a> {
    resolver: Option<ConflictResolver<'a>>,
    filter: Option<TableFilter<'a>>,
}

impl<'a> ApplyOptions<'a> {
    /// Options with no hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the conflict resolver.
    pub fn on_conflict<F>(mut self, resolver: F) -> Self
    where
        F: FnMut(&ConflictEvent) -> Result<ConflictResolution, ResolverError> + 'a,
    {
        self.resolver = Some(Box::new(resolver));
        self
    }

    /// Answer every conflict with the same resolution.
    pub fn resolve_all(self, resolution: ConflictResolution) -> Self {
        self.on_conflict(move |_| Ok(resolution))
    }

    /// Set the table filter.
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: FnMut(&str) -> bool + 'a,
    {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Whether a resolver is installed.
    pub fn has_resolver(&self) -> bool {
        self.resolver.is_some()
    }

    /// Whether a filter is installed.
    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }

    pub(crate) fn resolve(
        &mut self,
        event: &ConflictEvent,
    ) -> Result<ConflictResolution, ResolverError> {
        match self.resolver.as_mut() {
            Some(resolver) => resolver(event),
            None => Ok(ConflictResolution::Omit),
        }
    }

    pub(crate) fn includes(&mut self, table: &str) -> bool {
        self.filter.as_mut().map_or(true, |filter| filter(table))
    }
}

impl fmt::Debug for ApplyOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplyOptions")
            .field("resolver", &self.has_resolver())
            .field("filter", &self.has_filter())
            .finish()
    }
}
