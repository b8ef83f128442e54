//! Replaying a changeset or patchset against a target.
//!
//! The whole replay runs inside one savepoint. Operations are applied in
//! encoded order; each one that cannot be applied as recorded raises a
//! conflict, and the resolver decides whether to skip it, force it, or
//! abandon the replay.
//!
//! | Operation | Target state                 | Conflict    |
//! |-----------|------------------------------|-------------|
//! | INSERT    | key already present          | CONFLICT    |
//! | UPDATE    | key missing                  | NOTFOUND    |
//! | UPDATE    | row differs from before-image| DATA        |
//! | DELETE    | key missing                  | NOTFOUND    |
//! | DELETE    | row differs from before-image| DATA        |
//! | any       | engine rejects the write     | CONSTRAINT or FOREIGN_KEY |

use std::collections::HashMap;

use tracing::{debug, warn};

use rowsync_core::{
    decode, CodecError, ConflictEvent, ConflictKind, ConflictResolution, DecodedOperation,
    EncodeMode, Image, OpKind, Row, Value,
};
use rowsync_store::{Rejection, RowStore, StoreError, TableInfo, WriteResult};

use crate::error::{ReplayError, Result};
use crate::options::ApplyOptions;
use crate::report::ApplyReport;

/// Schema every replay writes into.
pub const TARGET_SCHEMA: &str = "main";

/// Savepoint wrapping a replay.
pub const APPLY_SAVEPOINT: &str = "rowsync_apply";

/// Replay `changeset` against `store`.
///
/// The buffer is decoded in full before anything is written, so a
/// malformed buffer leaves the target untouched. An ABORT resolution rolls
/// back and returns a report with `aborted` set; errors roll back and are
/// returned as-is. A panicking resolver or filter also rolls back before
/// the panic continues.
pub fn apply<S>(
    store: &mut S,
    changeset: &[u8],
    options: &mut ApplyOptions<'_>,
) -> Result<ApplyReport>
where
    S: RowStore + ?Sized,
{
    let operations = decode(changeset)?;
    debug!(operations = operations.len(), "replay started");

    store.savepoint(APPLY_SAVEPOINT)?;
    let mut guard = SavepointGuard {
        store,
        settled: false,
    };
    let mut replayer = Replayer {
        store: &mut *guard.store,
        options,
        tables: HashMap::new(),
        report: ApplyReport::default(),
    };
    let outcome = replayer.run(&operations);
    let mut report = replayer.report;

    match outcome {
        Ok(Flow::Continue) => guard.release()?,
        Ok(Flow::Abort) => {
            guard.rollback()?;
            report.aborted = true;
        }
        // Dropping the guard rolls back.
        Err(e) => return Err(e),
    }

    debug!(
        applied = report.applied,
        omitted = report.omitted,
        replaced = report.replaced,
        skipped = report.skipped,
        conflicts = report.conflicts,
        aborted = report.aborted,
        "replay finished"
    );
    Ok(report)
}

/// Holds the replay savepoint open; rolls it back when dropped unsettled.
struct SavepointGuard<'s, S: RowStore + ?Sized> {
    store: &'s mut S,
    settled: bool,
}

impl<S: RowStore + ?Sized> SavepointGuard<'_, S> {
    fn release(mut self) -> Result<()> {
        self.store.release(APPLY_SAVEPOINT)?;
        self.settled = true;
        Ok(())
    }

    fn rollback(mut self) -> Result<()> {
        self.settled = true;
        self.store.rollback_to(APPLY_SAVEPOINT)?;
        Ok(())
    }
}

impl<S: RowStore + ?Sized> Drop for SavepointGuard<'_, S> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Err(e) = self.store.rollback_to(APPLY_SAVEPOINT) {
            warn!(error = %e, "rollback of interrupted replay failed");
        }
    }
}

enum Flow {
    Continue,
    Abort,
}

enum Write<'a> {
    Insert(&'a [Value]),
    Update { key: &'a [Value], row: &'a [Value] },
    Delete(&'a [Value]),
}

struct Replayer<'s, 'o, S: ?Sized> {
    store: &'s mut S,
    options: &'s mut ApplyOptions<'o>,
    /// Target metadata per lowercased table name; `None` means skip.
    tables: HashMap<String, Option<TableInfo>>,
    report: ApplyReport,
}

impl<S: RowStore + ?Sized> Replayer<'_, '_, S> {
    fn run(&mut self, operations: &[DecodedOperation]) -> Result<Flow> {
        for op in operations {
            let Some(info) = self.target(op)? else {
                self.report.skipped += 1;
                continue;
            };
            let flow = match op.kind {
                OpKind::Insert => self.apply_insert(&info, op)?,
                OpKind::Update => self.apply_update(&info, op)?,
                OpKind::Delete => self.apply_delete(&info, op)?,
            };
            if let Flow::Abort = flow {
                return Ok(Flow::Abort);
            }
        }
        Ok(Flow::Continue)
    }

    /// Target metadata for an operation's table, resolved once per table.
    fn target(&mut self, op: &DecodedOperation) -> Result<Option<TableInfo>> {
        let key = op.table_name().to_ascii_lowercase();
        if let Some(entry) = self.tables.get(&key) {
            return Ok(entry.clone());
        }
        let entry = self.resolve_table(op)?;
        if entry.is_none() {
            self.report.skipped_tables.push(op.table_name().to_string());
        }
        self.tables.insert(key, entry.clone());
        Ok(entry)
    }

    fn resolve_table(&mut self, op: &DecodedOperation) -> Result<Option<TableInfo>> {
        let name = op.table_name();
        if !self.options.includes(name) {
            debug!(table = name, "table excluded by filter");
            return Ok(None);
        }

        let info = match self.store.table_info(TARGET_SCHEMA, name) {
            Ok(Some(info)) => info,
            Ok(None) => {
                warn!(table = name, "table missing in target, skipping");
                return Ok(None);
            }
            Err(StoreError::Unsupported { reason, .. }) => {
                warn!(table = name, %reason, "table unsupported in target, skipping");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if info.header.primary_key() != op.table.primary_key() {
            warn!(
                table = name,
                columns = op.table.column_count(),
                target_columns = info.column_count(),
                "table layout differs in target, skipping"
            );
            return Ok(None);
        }
        Ok(Some(info))
    }

    fn apply_insert(&mut self, info: &TableInfo, op: &DecodedOperation) -> Result<Flow> {
        let new = defined_row(op, op.new.as_ref())?;
        let key = info.key_of(&new);

        let Some(current) = self.store.fetch_row(TARGET_SCHEMA, info, &key)? else {
            return self.write(info, op, Write::Insert(&new), false);
        };
        match self.conflict(info, op, ConflictKind::Conflict, Some(current), None)? {
            ConflictResolution::Omit => Ok(self.omit()),
            ConflictResolution::Abort => Ok(Flow::Abort),
            ConflictResolution::Replace => {
                self.write(info, op, Write::Update { key: &key, row: &new }, true)
            }
        }
    }

    fn apply_update(&mut self, info: &TableInfo, op: &DecodedOperation) -> Result<Flow> {
        let old = image(op, op.old.as_ref())?;
        let new = image(op, op.new.as_ref())?;
        let key = defined_key(info, op, old)?;

        let Some(current) = self.store.fetch_row(TARGET_SCHEMA, info, &key)? else {
            return match self.conflict(info, op, ConflictKind::NotFound, None, None)? {
                ConflictResolution::Omit => Ok(self.omit()),
                ConflictResolution::Abort => Ok(Flow::Abort),
                ConflictResolution::Replace => match after_image(op, old, new) {
                    Some(row) => self.write(info, op, Write::Insert(&row), true),
                    None => Err(invalid(info, op, ConflictKind::NotFound)),
                },
            };
        };

        let target = overlay(&current, new);
        if matches_image(old, &current) {
            return self.write(info, op, Write::Update { key: &key, row: &target }, false);
        }
        match self.conflict(info, op, ConflictKind::Data, Some(current), None)? {
            ConflictResolution::Omit => Ok(self.omit()),
            ConflictResolution::Abort => Ok(Flow::Abort),
            ConflictResolution::Replace => {
                self.write(info, op, Write::Update { key: &key, row: &target }, true)
            }
        }
    }

    fn apply_delete(&mut self, info: &TableInfo, op: &DecodedOperation) -> Result<Flow> {
        let old = image(op, op.old.as_ref())?;
        let key = defined_key(info, op, old)?;

        let Some(current) = self.store.fetch_row(TARGET_SCHEMA, info, &key)? else {
            return match self.conflict(info, op, ConflictKind::NotFound, None, None)? {
                ConflictResolution::Omit => Ok(self.omit()),
                ConflictResolution::Abort => Ok(Flow::Abort),
                // Nothing left to delete.
                ConflictResolution::Replace => {
                    self.report.replaced += 1;
                    Ok(Flow::Continue)
                }
            };
        };

        if matches_image(old, &current) {
            return self.write(info, op, Write::Delete(&key), false);
        }
        match self.conflict(info, op, ConflictKind::Data, Some(current), None)? {
            ConflictResolution::Omit => Ok(self.omit()),
            ConflictResolution::Abort => Ok(Flow::Abort),
            ConflictResolution::Replace => self.write(info, op, Write::Delete(&key), true),
        }
    }

    /// Perform a write, turning an engine rejection into a conflict.
    fn write(
        &mut self,
        info: &TableInfo,
        op: &DecodedOperation,
        write: Write<'_>,
        replacing: bool,
    ) -> Result<Flow> {
        let result = match write {
            Write::Insert(row) => self.store.insert_row(TARGET_SCHEMA, info, row)?,
            Write::Update { key, row } => self.store.update_row(TARGET_SCHEMA, info, key, row)?,
            Write::Delete(key) => self.store.delete_row(TARGET_SCHEMA, info, key)?,
        };

        let (reason, message) = match result {
            WriteResult::Written { .. } => {
                if replacing {
                    self.report.replaced += 1;
                } else {
                    self.report.applied += 1;
                }
                return Ok(Flow::Continue);
            }
            WriteResult::Rejected { reason, message } => (reason, message),
        };

        let kind = match reason {
            Rejection::ForeignKey => ConflictKind::ForeignKey,
            Rejection::Constraint => ConflictKind::Constraint,
        };
        match self.conflict(info, op, kind, None, Some(message))? {
            ConflictResolution::Omit => Ok(self.omit()),
            ConflictResolution::Abort => Ok(Flow::Abort),
            ConflictResolution::Replace => Err(invalid(info, op, kind)),
        }
    }

    fn conflict(
        &mut self,
        info: &TableInfo,
        op: &DecodedOperation,
        kind: ConflictKind,
        current: Option<Row>,
        message: Option<String>,
    ) -> Result<ConflictResolution> {
        self.report.conflicts += 1;
        let event = ConflictEvent {
            kind,
            table: info.name().to_string(),
            op: op.kind,
            current,
            message,
        };
        let resolution = self
            .options
            .resolve(&event)
            .map_err(ReplayError::Resolver)?;
        debug!(table = info.name(), op = %op.kind, %kind, %resolution, "conflict");
        Ok(resolution)
    }

    fn omit(&mut self) -> Flow {
        self.report.omitted += 1;
        Flow::Continue
    }
}

fn invalid(info: &TableInfo, op: &DecodedOperation, kind: ConflictKind) -> ReplayError {
    ReplayError::InvalidResolution {
        kind,
        op: op.kind,
        table: info.name().to_string(),
        resolution: ConflictResolution::Replace,
    }
}

fn malformed(op: &DecodedOperation) -> ReplayError {
    ReplayError::Codec(CodecError::MalformedRecord(format!(
        "{} on {} is missing required columns",
        op.kind,
        op.table_name()
    )))
}

fn image<'a>(op: &DecodedOperation, image: Option<&'a Image>) -> Result<&'a Image> {
    image.ok_or_else(|| malformed(op))
}

fn defined_row(op: &DecodedOperation, image: Option<&Image>) -> Result<Row> {
    image
        .and_then(|img| img.iter().cloned().collect::<Option<Row>>())
        .ok_or_else(|| malformed(op))
}

fn defined_key(info: &TableInfo, op: &DecodedOperation, image: &Image) -> Result<Vec<Value>> {
    info.header
        .key_columns()
        .map(|i| image.get(i).cloned().flatten().ok_or_else(|| malformed(op)))
        .collect()
}

/// The complete row an UPDATE leaves behind, when its records define it.
///
/// Only a changeset carries old values, so a patchset never qualifies.
fn after_image(op: &DecodedOperation, old: &Image, new: &Image) -> Option<Row> {
    if op.mode == EncodeMode::Condensed {
        return None;
    }
    new.iter()
        .zip(old)
        .map(|(n, o)| n.as_ref().or(o.as_ref()).cloned())
        .collect()
}

/// Whether every defined column of `expected` equals the target's value.
fn matches_image(expected: &Image, current: &[Value]) -> bool {
    expected
        .iter()
        .zip(current)
        .all(|(e, c)| e.as_ref().map_or(true, |e| e == c))
}

/// `current` with every defined column of `new` written over it.
fn overlay(current: &[Value], new: &Image) -> Row {
    current
        .iter()
        .zip(new)
        .map(|(c, n)| n.clone().unwrap_or_else(|| c.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::sync::Arc;

    use rowsync_core::{encode_changeset, encode_patchset, row, ChangeLogEntry, RowChange, TableHeader};
    use rowsync_store::MemoryEngine;

    fn users() -> Arc<TableHeader> {
        Arc::new(TableHeader::new("users", vec![true, false]))
    }

    fn target() -> MemoryEngine {
        let mut engine = MemoryEngine::new();
        engine
            .create_table("users", &[("id", true), ("name", false)])
            .set_not_null("users", "name")
            .create_table("other", &[("id", true), ("v", false)]);
        engine
    }

    fn seed(engine: &mut MemoryEngine, rows: &[Row]) {
        let info = engine.table_info("main", "users").unwrap().unwrap();
        for row in rows {
            assert!(engine.insert_row("main", &info, row).unwrap().is_written());
        }
    }

    fn contents(engine: &MemoryEngine, table: &str) -> Vec<Row> {
        let info = engine.table_info("main", table).unwrap().unwrap();
        engine.scan_rows("main", &info).unwrap()
    }

    fn entries(changes: Vec<RowChange>) -> Vec<ChangeLogEntry> {
        changes
            .into_iter()
            .map(|c| ChangeLogEntry::new(users(), c))
            .collect()
    }

    fn changeset(changes: Vec<RowChange>) -> Vec<u8> {
        encode_changeset(&entries(changes)).to_vec()
    }

    #[test]
    fn test_clean_replay() {
        let mut engine = target();
        seed(&mut engine, &[row![2, "bob"], row![3, "cy"]]);

        let bytes = changeset(vec![
            RowChange::Insert { new: row![1, "ann"] },
            RowChange::Update {
                old: row![2, "bob"],
                new: row![2, "bobby"],
            },
            RowChange::Delete { old: row![3, "cy"] },
        ]);
        let report = apply(&mut engine, &bytes, &mut ApplyOptions::new()).unwrap();

        assert_eq!(report.applied, 3);
        assert_eq!(report.conflicts, 0);
        assert!(report.succeeded());
        assert_eq!(contents(&engine, "users"), vec![row![1, "ann"], row![2, "bobby"]]);
    }

    #[test]
    fn test_empty_changeset_is_a_noop() {
        let mut engine = target();
        let report = apply(&mut engine, &[], &mut ApplyOptions::new()).unwrap();
        assert_eq!(report, ApplyReport::default());
    }

    #[test]
    fn test_conflicts_default_to_omit() {
        let mut engine = target();
        seed(&mut engine, &[row![1, "existing"], row![2, "changed"]]);

        let bytes = changeset(vec![
            RowChange::Insert { new: row![1, "ann"] },
            RowChange::Update {
                old: row![2, "bob"],
                new: row![2, "bobby"],
            },
            RowChange::Delete { old: row![9, "ghost"] },
        ]);
        let report = apply(&mut engine, &bytes, &mut ApplyOptions::new()).unwrap();

        assert_eq!(report.conflicts, 3);
        assert_eq!(report.omitted, 3);
        assert_eq!(
            contents(&engine, "users"),
            vec![row![1, "existing"], row![2, "changed"]]
        );
    }

    #[test]
    fn test_conflict_events_carry_kind_and_current_row() {
        let mut engine = target();
        seed(&mut engine, &[row![1, "existing"], row![2, "changed"]]);

        let bytes = changeset(vec![
            RowChange::Insert { new: row![1, "ann"] },
            RowChange::Update {
                old: row![2, "bob"],
                new: row![2, "bobby"],
            },
            RowChange::Update {
                old: row![7, "x"],
                new: row![7, "y"],
            },
        ]);
        let events = RefCell::new(Vec::new());
        let mut options = ApplyOptions::new().on_conflict(|e| {
            events.borrow_mut().push(e.clone());
            Ok(ConflictResolution::Omit)
        });
        apply(&mut engine, &bytes, &mut options).unwrap();
        drop(options);

        let events = events.into_inner();
        let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![ConflictKind::Conflict, ConflictKind::Data, ConflictKind::NotFound]
        );
        assert_eq!(events[0].current, Some(row![1, "existing"]));
        assert_eq!(events[1].op, OpKind::Update);
        assert_eq!(events[2].current, None);
        assert!(events.iter().all(|e| e.table == "users"));
    }

    #[test]
    fn test_replace_forces_writes() {
        let mut engine = target();
        seed(&mut engine, &[row![1, "existing"], row![2, "changed"], row![3, "drift"]]);

        let bytes = changeset(vec![
            RowChange::Insert { new: row![1, "ann"] },
            RowChange::Update {
                old: row![2, "bob"],
                new: row![2, "bobby"],
            },
            RowChange::Update {
                old: row![4, "dee"],
                new: row![4, "dana"],
            },
            RowChange::Delete { old: row![3, "cy"] },
            RowChange::Delete { old: row![5, "gone"] },
        ]);
        let mut options = ApplyOptions::new().resolve_all(ConflictResolution::Replace);
        let report = apply(&mut engine, &bytes, &mut options).unwrap();

        assert_eq!(report.replaced, 5);
        assert_eq!(
            contents(&engine, "users"),
            vec![row![1, "ann"], row![2, "bobby"], row![4, "dana"]]
        );
    }

    #[test]
    fn test_patchset_update_overlays_changed_columns() {
        let mut engine = MemoryEngine::new();
        engine.create_table("wide", &[("id", true), ("a", false), ("b", false)]);
        let info = engine.table_info("main", "wide").unwrap().unwrap();
        engine.insert_row("main", &info, &row![1, "a0", "target-b"]).unwrap();

        let header = Arc::new(TableHeader::new("wide", vec![true, false, false]));
        let bytes = encode_patchset(&[ChangeLogEntry::new(
            header,
            RowChange::Update {
                old: row![1, "a0", "source-b"],
                new: row![1, "a1", "source-b"],
            },
        )]);
        let report = apply(&mut engine, &bytes, &mut ApplyOptions::new()).unwrap();

        // Only the key is compared, and only `a` is written.
        assert_eq!(report.applied, 1);
        assert_eq!(contents(&engine, "wide"), vec![row![1, "a1", "target-b"]]);
    }

    fn wide_target(current: Row) -> MemoryEngine {
        let mut engine = MemoryEngine::new();
        engine.create_table("wide", &[("id", true), ("a", false), ("b", false)]);
        let info = engine.table_info("main", "wide").unwrap().unwrap();
        engine.insert_row("main", &info, &current).unwrap();
        engine
    }

    fn wide_update(old: Row, new: Row) -> Vec<u8> {
        let header = Arc::new(TableHeader::new("wide", vec![true, false, false]));
        encode_changeset(&[ChangeLogEntry::new(header, RowChange::Update { old, new })]).to_vec()
    }

    #[test]
    fn test_changeset_update_ignores_untouched_columns() {
        // The target changed `b`; the source only changed `a`.
        let mut engine = wide_target(row![1, "a0", "target-b"]);
        let bytes = wide_update(row![1, "a0", "b0"], row![1, "a1", "b0"]);
        let report = apply(&mut engine, &bytes, &mut ApplyOptions::new()).unwrap();

        assert_eq!((report.applied, report.conflicts), (1, 0));
        assert_eq!(contents(&engine, "wide"), vec![row![1, "a1", "target-b"]]);
    }

    #[test]
    fn test_changeset_data_replace_keeps_untouched_columns() {
        let mut engine = wide_target(row![1, "a-drift", "target-b"]);
        let bytes = wide_update(row![1, "a0", "b0"], row![1, "a1", "b0"]);
        let mut options = ApplyOptions::new().resolve_all(ConflictResolution::Replace);
        let report = apply(&mut engine, &bytes, &mut options).unwrap();

        assert_eq!((report.replaced, report.conflicts), (1, 1));
        assert_eq!(contents(&engine, "wide"), vec![row![1, "a1", "target-b"]]);
    }

    #[test]
    fn test_changeset_notfound_replace_needs_whole_row() {
        let mut engine = MemoryEngine::new();
        engine.create_table("wide", &[("id", true), ("a", false), ("b", false)]);
        let mut options = ApplyOptions::new().resolve_all(ConflictResolution::Replace);

        // `b` never changed, so the changeset cannot rebuild the row.
        let partial = wide_update(row![1, "a0", "b0"], row![1, "a1", "b0"]);
        assert!(matches!(
            apply(&mut engine, &partial, &mut options),
            Err(ReplayError::InvalidResolution {
                kind: ConflictKind::NotFound,
                ..
            })
        ));

        let whole = wide_update(row![1, "a0", "b0"], row![1, "a1", "b1"]);
        let report = apply(&mut engine, &whole, &mut options).unwrap();
        assert_eq!(report.replaced, 1);
        assert_eq!(contents(&engine, "wide"), vec![row![1, "a1", "b1"]]);
    }

    #[test]
    fn test_panicking_resolver_rolls_back() {
        let mut engine = target();
        seed(&mut engine, &[row![5, "keep"]]);
        let bytes = changeset(vec![
            RowChange::Insert { new: row![1, "ann"] },
            RowChange::Insert { new: row![5, "clash"] },
        ]);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut options = ApplyOptions::new().on_conflict(|_| panic!("resolver panicked"));
            apply(&mut engine, &bytes, &mut options)
        }));

        assert!(result.is_err());
        assert_eq!(contents(&engine, "users"), vec![row![5, "keep"]]);
        // The savepoint is gone.
        assert!(engine.release(APPLY_SAVEPOINT).is_err());
    }

    #[test]
    fn test_panicking_filter_rolls_back() {
        let mut engine = target();
        let other = Arc::new(TableHeader::new("other", vec![true, false]));
        let log = vec![
            ChangeLogEntry::new(users(), RowChange::Insert { new: row![1, "a"] }),
            ChangeLogEntry::new(other, RowChange::Insert { new: row![1, "x"] }),
        ];
        let bytes = encode_changeset(&log);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut options = ApplyOptions::new().filter(|t| {
                assert_eq!(t, "users", "filter panicked");
                true
            });
            apply(&mut engine, &bytes, &mut options)
        }));

        assert!(result.is_err());
        assert!(contents(&engine, "users").is_empty());
        assert!(engine.release(APPLY_SAVEPOINT).is_err());
    }

    #[test]
    fn test_patchset_notfound_replace_is_invalid() {
        let mut engine = target();
        let bytes = encode_patchset(&entries(vec![RowChange::Update {
            old: row![1, "a"],
            new: row![1, "b"],
        }]));
        let mut options = ApplyOptions::new().resolve_all(ConflictResolution::Replace);
        let err = apply(&mut engine, &bytes, &mut options).unwrap_err();
        assert!(matches!(
            err,
            ReplayError::InvalidResolution {
                kind: ConflictKind::NotFound,
                op: OpKind::Update,
                ..
            }
        ));
    }

    #[test]
    fn test_abort_rolls_back_everything() {
        let mut engine = target();
        seed(&mut engine, &[row![5, "keep"]]);

        let bytes = changeset(vec![
            RowChange::Insert { new: row![1, "ann"] },
            RowChange::Insert { new: row![5, "clash"] },
            RowChange::Insert { new: row![6, "never"] },
        ]);
        let mut options = ApplyOptions::new().resolve_all(ConflictResolution::Abort);
        let report = apply(&mut engine, &bytes, &mut options).unwrap();

        assert!(report.aborted);
        assert_eq!(report.applied, 1);
        assert_eq!(contents(&engine, "users"), vec![row![5, "keep"]]);
    }

    #[test]
    fn test_resolver_error_rolls_back() {
        let mut engine = target();
        seed(&mut engine, &[row![5, "keep"]]);

        let bytes = changeset(vec![
            RowChange::Insert { new: row![1, "ann"] },
            RowChange::Insert { new: row![5, "clash"] },
        ]);
        let mut options = ApplyOptions::new().on_conflict(|_| Err("resolver exploded".into()));
        let err = apply(&mut engine, &bytes, &mut options).unwrap_err();

        assert!(matches!(err, ReplayError::Resolver(ref e) if e.to_string() == "resolver exploded"));
        assert_eq!(contents(&engine, "users"), vec![row![5, "keep"]]);
    }

    #[test]
    fn test_constraint_rejection_becomes_conflict() {
        let mut engine = target();
        let bytes = changeset(vec![RowChange::Insert {
            new: row![1, None::<String>],
        }]);

        let kinds = RefCell::new(Vec::new());
        let mut options = ApplyOptions::new().on_conflict(|e| {
            kinds.borrow_mut().push((e.kind, e.message.is_some()));
            Ok(ConflictResolution::Omit)
        });
        let report = apply(&mut engine, &bytes, &mut options).unwrap();
        drop(options);

        assert_eq!(report.omitted, 1);
        assert_eq!(kinds.into_inner(), vec![(ConflictKind::Constraint, true)]);

        let mut replace = ApplyOptions::new().resolve_all(ConflictResolution::Replace);
        assert!(matches!(
            apply(&mut engine, &bytes, &mut replace),
            Err(ReplayError::InvalidResolution {
                kind: ConflictKind::Constraint,
                ..
            })
        ));
    }

    #[test]
    fn test_filter_consulted_once_per_table() {
        let mut engine = target();
        let other = Arc::new(TableHeader::new("other", vec![true, false]));
        let log = vec![
            ChangeLogEntry::new(users(), RowChange::Insert { new: row![1, "a"] }),
            ChangeLogEntry::new(other.clone(), RowChange::Insert { new: row![1, "x"] }),
            ChangeLogEntry::new(users(), RowChange::Insert { new: row![2, "b"] }),
            ChangeLogEntry::new(other, RowChange::Insert { new: row![2, "y"] }),
        ];
        let bytes = encode_changeset(&log);

        let calls = RefCell::new(Vec::new());
        let mut options = ApplyOptions::new().filter(|t| {
            calls.borrow_mut().push(t.to_string());
            t == "users"
        });
        let report = apply(&mut engine, &bytes, &mut options).unwrap();
        drop(options);

        assert_eq!(calls.into_inner(), vec!["users", "other"]);
        assert_eq!(report.applied, 2);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.skipped_tables, vec!["other"]);
        assert!(contents(&engine, "other").is_empty());
    }

    #[test]
    fn test_missing_and_mismatched_tables_are_skipped() {
        let mut engine = target();
        let missing = Arc::new(TableHeader::new("nowhere", vec![true]));
        let reshaped = Arc::new(TableHeader::new("other", vec![true, false, false]));
        let log = vec![
            ChangeLogEntry::new(missing, RowChange::Insert { new: row![1] }),
            ChangeLogEntry::new(reshaped, RowChange::Insert { new: row![1, 2, 3] }),
            ChangeLogEntry::new(users(), RowChange::Insert { new: row![1, "a"] }),
        ];
        let report = apply(&mut engine, &encode_changeset(&log), &mut ApplyOptions::new()).unwrap();

        assert_eq!(report.skipped, 2);
        assert_eq!(report.applied, 1);
        assert_eq!(report.conflicts, 0);
    }

    #[test]
    fn test_malformed_buffer_changes_nothing() {
        let mut engine = target();
        let mut bytes = changeset(vec![RowChange::Insert { new: row![1, "ann"] }]);
        bytes.truncate(bytes.len() - 2);

        assert!(matches!(
            apply(&mut engine, &bytes, &mut ApplyOptions::new()),
            Err(ReplayError::Codec(CodecError::Truncated { .. }))
        ));
        assert!(contents(&engine, "users").is_empty());
    }
}
