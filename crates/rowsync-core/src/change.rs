//! Row-level operations as observed on a connection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::table::TableHeader;
use crate::value::{Row, Value};

/// The kind of a row operation.
///
/// Discriminants are the wire tags used by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OpKind {
    Delete = 9,
    Insert = 18,
    Update = 23,
}

impl OpKind {
    /// Wire tag for this operation.
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Parse a wire tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            9 => Some(OpKind::Delete),
            18 => Some(OpKind::Insert),
            23 => Some(OpKind::Update),
            _ => None,
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OpKind::Delete => "DELETE",
            OpKind::Insert => "INSERT",
            OpKind::Update => "UPDATE",
        };
        f.write_str(s)
    }
}

/// Before/after images of one row operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RowChange {
    /// A new row. `new` holds every column.
    Insert { new: Row },
    /// A modified row. `old` and `new` hold every column.
    Update { old: Row, new: Row },
    /// A removed row. `old` holds every column.
    Delete { old: Row },
}

impl RowChange {
    /// The operation kind.
    pub fn kind(&self) -> OpKind {
        match self {
            RowChange::Insert { .. } => OpKind::Insert,
            RowChange::Update { .. } => OpKind::Update,
            RowChange::Delete { .. } => OpKind::Delete,
        }
    }

    /// The image that identifies the row: the before-image for updates and
    /// deletes, the after-image for inserts.
    pub fn identifying_image(&self) -> &Row {
        match self {
            RowChange::Insert { new } => new,
            RowChange::Update { old, .. } | RowChange::Delete { old } => old,
        }
    }

    /// Before-image, if the operation has one.
    pub fn old(&self) -> Option<&Row> {
        match self {
            RowChange::Insert { .. } => None,
            RowChange::Update { old, .. } | RowChange::Delete { old } => Some(old),
        }
    }

    /// After-image, if the operation has one.
    pub fn new_image(&self) -> Option<&Row> {
        match self {
            RowChange::Insert { new } | RowChange::Update { new, .. } => Some(new),
            RowChange::Delete { .. } => None,
        }
    }
}

/// One recorded row operation on a table.
///
/// Entries share their table header through an `Arc` so a long log does not
/// repeat table metadata per row.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeLogEntry {
    pub table: Arc<TableHeader>,
    pub change: RowChange,
}

impl ChangeLogEntry {
    /// Create an entry.
    pub fn new(table: Arc<TableHeader>, change: RowChange) -> Self {
        Self { table, change }
    }

    /// Name of the table the operation touched.
    pub fn table_name(&self) -> &str {
        self.table.name()
    }

    /// The operation kind.
    pub fn kind(&self) -> OpKind {
        self.change.kind()
    }

    /// Primary-key values identifying the row.
    pub fn primary_key(&self) -> Vec<&Value> {
        let image = self.change.identifying_image();
        self.table
            .key_columns()
            .filter_map(|i| image.get(i))
            .collect()
    }

    /// Indices of columns whose value differs between before and after.
    ///
    /// Empty for inserts and deletes.
    pub fn changed_columns(&self) -> Vec<usize> {
        match &self.change {
            RowChange::Update { old, new } => old
                .iter()
                .zip(new.iter())
                .enumerate()
                .filter_map(|(i, (o, n))| (o != n).then_some(i))
                .collect(),
            _ => Vec::new(),
        }
    }
}
