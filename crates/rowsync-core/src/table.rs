//! Table headers: the schema fragment carried inside a changeset.

use serde::{Deserialize, Serialize};

/// Name, column count, and primary-key layout of a table.
///
/// This is everything the codec needs to frame rows. Column names and
/// types are deliberately absent; applying a changeset requires the
/// target's own schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableHeader {
    name: String,
    primary_key: Vec<bool>,
}

impl TableHeader {
    /// Create a header from a name and per-column key flags.
    pub fn new(name: impl Into<String>, primary_key: Vec<bool>) -> Self {
        Self {
            name: name.into(),
            primary_key,
        }
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of columns, including an implicit rowid column if present.
    pub fn column_count(&self) -> usize {
        self.primary_key.len()
    }

    /// Per-column primary-key flags.
    pub fn primary_key(&self) -> &[bool] {
        &self.primary_key
    }

    /// Whether column `index` is part of the primary key.
    pub fn is_key_column(&self, index: usize) -> bool {
        self.primary_key.get(index).copied().unwrap_or(false)
    }

    /// Indices of the primary-key columns, in column order.
    pub fn key_columns(&self) -> impl Iterator<Item = usize> + '_ {
        self.primary_key
            .iter()
            .enumerate()
            .filter_map(|(i, pk)| pk.then_some(i))
    }

    /// Whether two headers describe the same name and key layout.
    ///
    /// Table names compare case-insensitively, as the engine does.
    pub fn matches(&self, other: &TableHeader) -> bool {
        self.name.eq_ignore_ascii_case(&other.name) && self.primary_key == other.primary_key
    }

    /// Pack the key flags into a bitmap of `ceil(n / 8)` bytes.
    pub fn key_bitmap(&self) -> Vec<u8> {
        let mut bitmap = vec![0u8; self.primary_key.len().div_ceil(8)];
        for i in self.key_columns() {
            bitmap[i / 8] |= 1 << (i % 8);
        }
        bitmap
    }

    /// Unpack key flags for `column_count` columns from a bitmap.
    pub fn key_flags_from_bitmap(bitmap: &[u8], column_count: usize) -> Vec<bool> {
        (0..column_count)
            .map(|i| bitmap.get(i / 8).is_some_and(|b| b & (1 << (i % 8)) != 0))
            .collect()
    }
}
