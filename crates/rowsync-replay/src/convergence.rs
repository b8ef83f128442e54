//! Convergence checks after replay.
//!
//! Two databases have converged on a table when their table digests agree.
//! A digest covers every row in primary-key order, so it can be exchanged
//! instead of the rows themselves.

use std::fmt;

use rowsync_core::{encode_changeset, ChangeLogEntry, RowChange};
use rowsync_store::RowStore;

use crate::error::Result;

/// Blake3 digest of a table's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableDigest(pub [u8; 32]);

impl TableDigest {
    /// Lowercase hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for TableDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Compute the digest of `schema.table`, or `None` if it does not exist.
///
/// Algorithm:
/// 1. Scan all rows in primary-key order
/// 2. Encode them as a changeset of INSERTs
/// 3. Hash: Blake3("rowsync-table-v1:" || lowercase name || encoding)
pub fn table_digest<S>(store: &S, schema: &str, table: &str) -> Result<Option<TableDigest>>
where
    S: RowStore + ?Sized,
{
    let Some(info) = store.table_info(schema, table)? else {
        return Ok(None);
    };
    let entries: Vec<ChangeLogEntry> = store
        .scan_rows(schema, &info)?
        .into_iter()
        .map(|new| ChangeLogEntry::new(info.header.clone(), RowChange::Insert { new }))
        .collect();

    let mut hasher = blake3::Hasher::new();
    hasher.update(b"rowsync-table-v1:");
    hasher.update(info.name().to_ascii_lowercase().as_bytes());
    hasher.update(&encode_changeset(&entries));
    Ok(Some(TableDigest(*hasher.finalize().as_bytes())))
}

/// Result of comparing two databases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    /// Every compared table has identical contents.
    Converged,
    /// These tables differ or exist on one side only.
    Diverged { tables: Vec<String> },
}

impl ConvergenceResult {
    /// Check if the databases have converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged)
    }
}

/// Compare `tables` in the `main` schema of two stores.
pub fn verify_convergence<A, B>(local: &A, remote: &B, tables: &[&str]) -> Result<ConvergenceResult>
where
    A: RowStore + ?Sized,
    B: RowStore + ?Sized,
{
    let mut diverged = Vec::new();
    for table in tables {
        let ours = table_digest(local, "main", table)?;
        let theirs = table_digest(remote, "main", table)?;
        if ours != theirs {
            diverged.push(table.to_string());
        }
    }

    if diverged.is_empty() {
        Ok(ConvergenceResult::Converged)
    } else {
        Ok(ConvergenceResult::Diverged { tables: diverged })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{apply, ApplyOptions};
    use proptest::prelude::*;
    use rowsync_core::{row, Value};
    use rowsync_store::MemoryEngine;

    fn engine() -> MemoryEngine {
        let mut engine = MemoryEngine::new();
        engine.create_table("kv", &[("k", true), ("v", false)]);
        engine
    }

    fn put(engine: &mut MemoryEngine, k: i64, v: &str) -> ChangeLogEntry {
        let info = engine.table_info("main", "kv").unwrap().unwrap();
        let new = row![k, v];
        engine.insert_row("main", &info, &new).unwrap();
        ChangeLogEntry::new(info.header.clone(), RowChange::Insert { new })
    }

    #[test]
    fn test_digest_ignores_insertion_order() {
        let mut a = engine();
        let mut b = engine();
        put(&mut a, 1, "x");
        put(&mut a, 2, "y");
        put(&mut b, 2, "y");
        put(&mut b, 1, "x");

        let da = table_digest(&a, "main", "kv").unwrap().unwrap();
        let db = table_digest(&b, "main", "kv").unwrap().unwrap();
        assert_eq!(da, db);
        assert_eq!(da.to_hex().len(), 64);
        assert!(table_digest(&a, "main", "nope").unwrap().is_none());
    }

    #[test]
    fn test_divergence_reported_per_table() {
        let mut a = engine();
        let b = engine();
        put(&mut a, 1, "x");

        let result = verify_convergence(&a, &b, &["kv"]).unwrap();
        assert_eq!(
            result,
            ConvergenceResult::Diverged {
                tables: vec!["kv".into()]
            }
        );
        assert!(!result.is_converged());
    }

    proptest! {
        #[test]
        fn prop_replayed_inserts_converge(
            rows in proptest::collection::btree_map(any::<i64>(), "[a-z]{0,8}", 0..32)
        ) {
            let mut source = engine();
            let log: Vec<_> = rows.iter().map(|(k, v)| put(&mut source, *k, v)).collect();

            let mut target = engine();
            let report = apply(&mut target, &encode_changeset(&log), &mut ApplyOptions::new()).unwrap();

            prop_assert_eq!(report.applied, rows.len());
            prop_assert!(verify_convergence(&source, &target, &["kv"]).unwrap().is_converged());
            let first = target
                .scan_rows("main", &target.table_info("main", "kv").unwrap().unwrap())
                .unwrap()
                .into_iter()
                .next()
                .map(|r| r[0].clone());
            prop_assert_eq!(first, rows.keys().next().map(|k| Value::Integer(*k)));
        }
    }
}
