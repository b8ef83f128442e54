//! Proptest generators for property-based testing.
//!
//! Two families: raw [`ChangeLogEntry`] sequences for codec properties,
//! and [`Script`]s of row writes against [`SCRIPT_SCHEMA`] for properties
//! that go through a real connection.

use std::sync::Arc;

use proptest::prelude::*;

use rowsync::{Connection, Error, Value};
use rowsync_core::{ChangeLogEntry, RowChange, TableHeader};

/// Any column value. Reals are finite so images compare equal to
/// themselves.
pub fn value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e9f64..1.0e9).prop_map(Value::Real),
        "[a-zA-Z0-9 ]{0,16}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Blob),
    ]
}

/// A value that can serve as a primary key.
pub fn key_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        (0i64..64).prop_map(Value::Integer),
        "[a-z]{1,4}".prop_map(Value::Text),
    ]
}

/// A table layout: a name and 1 to 6 columns, the first one a key.
pub fn table_header() -> impl Strategy<Value = Arc<TableHeader>> {
    ("[a-z][a-z0-9_]{0,11}", prop::collection::vec(any::<bool>(), 0..6)).prop_map(
        |(name, rest)| {
            let mut key = vec![true];
            key.extend(rest);
            Arc::new(TableHeader::new(name, key))
        },
    )
}

/// A row image for `header`.
pub fn row_for(header: &TableHeader) -> impl Strategy<Value = Vec<Value>> {
    let columns: Vec<_> = header
        .primary_key()
        .iter()
        .map(|&is_key| if is_key { key_value().boxed() } else { value().boxed() })
        .collect();
    columns
}

/// One entry on `header`.
pub fn entry_for(header: Arc<TableHeader>) -> impl Strategy<Value = ChangeLogEntry> {
    let images = (row_for(&header), row_for(&header));
    (0u8..3, images).prop_map(move |(kind, (old, new))| {
        let change = match kind {
            0 => RowChange::Insert { new },
            1 => RowChange::Update { old, new },
            _ => RowChange::Delete { old },
        };
        ChangeLogEntry::new(header.clone(), change)
    })
}

/// A change log spanning one to three tables, interleaved.
pub fn change_log(max_len: usize) -> impl Strategy<Value = Vec<ChangeLogEntry>> {
    prop::collection::vec(table_header(), 1..=3).prop_flat_map(move |headers| {
        let entry = prop::sample::select(headers).prop_flat_map(entry_for);
        prop::collection::vec(entry, 0..=max_len)
    })
}

/// Schema a [`Script`] runs against.
pub const SCRIPT_SCHEMA: &str =
    "CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT, qty INTEGER)";

/// A row write against the `items` table.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptOp {
    Insert { id: i64, label: String, qty: i64 },
    Update { id: i64, label: Option<String>, qty: i64 },
    Delete { id: i64 },
}

/// A sequence of writes. Ids are drawn from a small range so writes
/// frequently touch the same rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Script(pub Vec<ScriptOp>);

fn script_op() -> impl Strategy<Value = ScriptOp> {
    let id = 0i64..8;
    prop_oneof![
        (id.clone(), "[a-z]{0,6}", -100i64..100)
            .prop_map(|(id, label, qty)| ScriptOp::Insert { id, label, qty }),
        (id.clone(), proptest::option::of("[a-z]{0,6}"), -100i64..100)
            .prop_map(|(id, label, qty)| ScriptOp::Update { id, label, qty }),
        id.prop_map(|id| ScriptOp::Delete { id }),
    ]
}

impl Arbitrary for Script {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        prop::collection::vec(script_op(), 0..24)
            .prop_map(Script)
            .boxed()
    }
}

impl Script {
    /// Run against `conn`. Inserts of an existing id are skipped, as are
    /// updates and deletes of a missing one.
    pub fn run(&self, conn: &Connection) -> Result<(), Error> {
        for op in &self.0 {
            match op {
                ScriptOp::Insert { id, label, qty } => {
                    let row = vec![Value::Integer(*id), Value::from(label.as_str()), Value::Integer(*qty)];
                    match conn.insert("items", row) {
                        Ok(_) | Err(Error::Rejected { .. }) => {}
                        Err(e) => return Err(e),
                    }
                }
                ScriptOp::Update { id, label, qty } => {
                    let label = Value::from(label.clone());
                    conn.update(
                        "items",
                        &[Value::Integer(*id)],
                        &[("label", label), ("qty", Value::Integer(*qty))],
                    )?;
                }
                ScriptOp::Delete { id } => {
                    conn.delete("items", &[Value::Integer(*id)])?;
                }
            }
        }
        Ok(())
    }
}
