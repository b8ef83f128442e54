//! Golden wire vectors.
//!
//! Each vector pins the exact bytes a small log encodes to. Any change to
//! the format that alters one of these breaks compatibility with buffers
//! already written.

use std::sync::Arc;

use rowsync_core::{encode, row, ChangeLogEntry, EncodeMode, RowChange, TableHeader};

/// A golden test vector.
#[derive(Debug, Clone)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    /// Encoding mode.
    pub mode: EncodeMode,
    /// Builds the entries to encode.
    pub entries: fn() -> Vec<ChangeLogEntry>,
    /// Expected encoding (hex).
    pub expected_hex: &'static str,
}

fn kv_table() -> Arc<TableHeader> {
    // (id INTEGER PRIMARY KEY, v TEXT)
    Arc::new(TableHeader::new("t", vec![true, false]))
}

fn insert_one() -> Vec<ChangeLogEntry> {
    vec![ChangeLogEntry::new(
        kv_table(),
        RowChange::Insert { new: row![1, "a"] },
    )]
}

fn update_one() -> Vec<ChangeLogEntry> {
    vec![ChangeLogEntry::new(
        kv_table(),
        RowChange::Update {
            old: row![1, "a"],
            new: row![1, "b"],
        },
    )]
}

fn delete_with_null() -> Vec<ChangeLogEntry> {
    vec![ChangeLogEntry::new(
        kv_table(),
        RowChange::Delete {
            old: vec![rowsync_core::Value::Integer(2), rowsync_core::Value::Null],
        },
    )]
}

fn real_column() -> Vec<ChangeLogEntry> {
    let users = Arc::new(TableHeader::new("users", vec![true, false, false]));
    vec![ChangeLogEntry::new(
        users,
        RowChange::Insert {
            new: row![7, "ann", 1.5],
        },
    )]
}

fn composite_key_blob() -> Vec<ChangeLogEntry> {
    let kv = Arc::new(TableHeader::new("kv", vec![true, true, false]));
    vec![ChangeLogEntry::new(
        kv,
        RowChange::Insert {
            new: row!["x", 2, vec![0xde_u8, 0xad]],
        },
    )]
}

/// Get all golden vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![
        GoldenVector {
            name: "changeset insert",
            mode: EncodeMode::Full,
            entries: insert_one,
            // T v1 "t" 2 cols key=0b01 | INSERT 1 'a'
            expected_hex: "54010174020112010000000000000001030161",
        },
        GoldenVector {
            name: "changeset update",
            mode: EncodeMode::Full,
            entries: update_one,
            // old: key and changed column; new: changed column only
            expected_hex: "5401017402011701000000000000000103016100030162",
        },
        GoldenVector {
            name: "patchset update",
            mode: EncodeMode::Condensed,
            entries: update_one,
            // old: key only; new: changed column only
            expected_hex: "500101740201170100000000000000010000030162",
        },
        GoldenVector {
            name: "changeset delete with null",
            mode: EncodeMode::Full,
            entries: delete_with_null,
            expected_hex: "5401017402010901000000000000000205",
        },
        GoldenVector {
            name: "patchset delete",
            mode: EncodeMode::Condensed,
            entries: delete_with_null,
            expected_hex: "5001017402010901000000000000000200",
        },
        GoldenVector {
            name: "real column",
            mode: EncodeMode::Full,
            entries: real_column,
            expected_hex: "5401057573657273030112010000000000000007030361\
                           6e6e023ff8000000000000",
        },
        GoldenVector {
            name: "composite key with blob",
            mode: EncodeMode::Full,
            entries: composite_key_blob,
            expected_hex: "5401026b760303120301780100000000000000020402dead",
        },
        GoldenVector {
            name: "empty log",
            mode: EncodeMode::Full,
            entries: Vec::new,
            expected_hex: "",
        },
    ]
}

/// Encode a vector's entries.
pub fn encode_vector(vector: &GoldenVector) -> Vec<u8> {
    encode(&(vector.entries)(), vector.mode).to_vec()
}

/// Check every vector against its expected bytes.
///
/// Returns `(name, matches, actual_hex)` per vector.
pub fn verify_all_vectors() -> Vec<(String, bool, String)> {
    all_vectors()
        .iter()
        .map(|v| {
            let actual = hex::encode(encode_vector(v));
            (v.name.to_string(), actual == v.expected_hex, actual)
        })
        .collect()
}
