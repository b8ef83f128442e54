//! Capture: the engine wrapper that feeds session logs.
//!
//! Every row write a connection performs, whether from its own mutation
//! methods or from replaying a changeset, goes through [`RecordingStore`].
//! Successful writes are appended to the log of each open session whose
//! scope covers the table. Rejected writes record nothing.

use rowsync_core::{LogMark, Row, RowChange, Value};
use rowsync_store::{Result, RowStore, SqliteEngine, TableInfo, WriteResult};

use crate::session::{SessionArena, SessionId};

/// Wraps the engine with session recording.
pub(crate) struct RecordingStore<'a> {
    engine: &'a mut SqliteEngine,
    sessions: &'a mut SessionArena,
    /// Open savepoints with each session's log position when they began.
    savepoints: Vec<(String, Vec<(SessionId, LogMark)>)>,
}

impl<'a> RecordingStore<'a> {
    pub(crate) fn new(engine: &'a mut SqliteEngine, sessions: &'a mut SessionArena) -> Self {
        Self {
            engine,
            sessions,
            savepoints: Vec::new(),
        }
    }

    fn record(&mut self, observers: &[SessionId], info: &TableInfo, change: RowChange) {
        for &id in observers {
            if let Some(state) = self.sessions.get_mut(id) {
                state.log.record(info.header.clone(), change.clone());
            }
        }
    }

    /// Re-read an inserted row. Falls back to the assigned rowid when the
    /// key as written was NULL.
    fn fetch_inserted(
        &self,
        schema: &str,
        info: &TableInfo,
        row: &[Value],
        rowid: Option<i64>,
    ) -> Result<Option<Row>> {
        if let Some(found) = self.engine.fetch_row(schema, info, &info.key_of(row))? {
            return Ok(Some(found));
        }
        match rowid {
            Some(id) if info.key_len() == 1 => {
                self.engine.fetch_row(schema, info, &[Value::Integer(id)])
            }
            _ => Ok(None),
        }
    }

    fn savepoint_position(&self, name: &str) -> Option<usize> {
        self.savepoints
            .iter()
            .rposition(|(n, _)| n.eq_ignore_ascii_case(name))
    }
}

impl RowStore for RecordingStore<'_> {
    fn table_info(&self, schema: &str, table: &str) -> Result<Option<TableInfo>> {
        self.engine.table_info(schema, table)
    }

    fn fetch_row(&self, schema: &str, info: &TableInfo, key: &[Value]) -> Result<Option<Row>> {
        self.engine.fetch_row(schema, info, key)
    }

    fn scan_rows(&self, schema: &str, info: &TableInfo) -> Result<Vec<Row>> {
        self.engine.scan_rows(schema, info)
    }

    fn insert_row(&mut self, schema: &str, info: &TableInfo, row: &[Value]) -> Result<WriteResult> {
        let observers = self.sessions.observers(schema, info.name());
        let result = self.engine.insert_row(schema, info, row)?;
        if observers.is_empty() {
            return Ok(result);
        }

        if let WriteResult::Written { rowid } = result {
            if let Some(new) = self.fetch_inserted(schema, info, row, rowid)? {
                self.record(&observers, info, RowChange::Insert { new });
            }
        }
        Ok(result)
    }

    fn update_row(
        &mut self,
        schema: &str,
        info: &TableInfo,
        key: &[Value],
        row: &[Value],
    ) -> Result<WriteResult> {
        let observers = self.sessions.observers(schema, info.name());
        if observers.is_empty() {
            return self.engine.update_row(schema, info, key, row);
        }

        let before = self.engine.fetch_row(schema, info, key)?;
        let result = self.engine.update_row(schema, info, key, row)?;
        if let (WriteResult::Written { .. }, Some(old)) = (&result, before) {
            let after = self.engine.fetch_row(schema, info, &info.key_of(row))?;
            // Updates that change nothing are not recorded.
            if let Some(new) = after.filter(|new| *new != old) {
                self.record(&observers, info, RowChange::Update { old, new });
            }
        }
        Ok(result)
    }

    fn delete_row(&mut self, schema: &str, info: &TableInfo, key: &[Value]) -> Result<WriteResult> {
        let observers = self.sessions.observers(schema, info.name());
        if observers.is_empty() {
            return self.engine.delete_row(schema, info, key);
        }

        let before = self.engine.fetch_row(schema, info, key)?;
        let result = self.engine.delete_row(schema, info, key)?;
        if let (WriteResult::Written { .. }, Some(old)) = (&result, before) {
            self.record(&observers, info, RowChange::Delete { old });
        }
        Ok(result)
    }

    fn savepoint(&mut self, name: &str) -> Result<()> {
        self.engine.savepoint(name)?;
        self.savepoints
            .push((name.to_string(), self.sessions.marks()));
        Ok(())
    }

    fn release(&mut self, name: &str) -> Result<()> {
        self.engine.release(name)?;
        if let Some(pos) = self.savepoint_position(name) {
            self.savepoints.truncate(pos);
        }
        Ok(())
    }

    fn rollback_to(&mut self, name: &str) -> Result<()> {
        self.engine.rollback_to(name)?;
        if let Some(pos) = self.savepoint_position(name) {
            let (_, marks) = self.savepoints.swap_remove(pos);
            self.savepoints.truncate(pos);
            self.sessions.discard_since(&marks);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionOptions;
    use rowsync_core::{row, OpKind};

    fn setup() -> (SqliteEngine, SessionArena, TableInfo) {
        let engine = SqliteEngine::open_in_memory().unwrap();
        engine
            .execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)")
            .unwrap();
        let info = engine.table_info("main", "t").unwrap().unwrap();
        (engine, SessionArena::default(), info)
    }

    fn kinds(sessions: &SessionArena, id: SessionId) -> Vec<OpKind> {
        sessions
            .get(id)
            .unwrap()
            .log
            .entries()
            .iter()
            .map(|e| e.kind())
            .collect()
    }

    #[test]
    fn test_records_successful_writes() {
        let (mut engine, mut sessions, info) = setup();
        let (id, _) = sessions.insert(SessionOptions::new());
        let mut store = RecordingStore::new(&mut engine, &mut sessions);

        store.insert_row("main", &info, &row![1, "a"]).unwrap();
        store
            .update_row("main", &info, &row![1], &row![1, "b"])
            .unwrap();
        // No-op update and a missing-row delete leave no trace.
        store
            .update_row("main", &info, &row![1], &row![1, "b"])
            .unwrap();
        store.delete_row("main", &info, &row![42]).unwrap();
        store.delete_row("main", &info, &row![1]).unwrap();
        // Rejected: duplicate key.
        store.insert_row("main", &info, &row![2, "x"]).unwrap();
        let dup = store.insert_row("main", &info, &row![2, "y"]).unwrap();
        assert!(!dup.is_written());
        drop(store);

        assert_eq!(
            kinds(&sessions, id),
            vec![OpKind::Insert, OpKind::Update, OpKind::Delete, OpKind::Insert]
        );
    }

    #[test]
    fn test_rollback_discards_recorded_entries() {
        let (mut engine, mut sessions, info) = setup();
        let (id, _) = sessions.insert(SessionOptions::new());
        let mut store = RecordingStore::new(&mut engine, &mut sessions);

        store.insert_row("main", &info, &row![1, "keep"]).unwrap();
        store.savepoint("sp").unwrap();
        store.insert_row("main", &info, &row![2, "drop"]).unwrap();
        store.rollback_to("sp").unwrap();
        drop(store);

        assert_eq!(kinds(&sessions, id), vec![OpKind::Insert]);
    }

    #[test]
    fn test_unobserved_tables_are_not_fetched() {
        let (mut engine, mut sessions, info) = setup();
        let (id, _) = sessions.insert(SessionOptions::new().table("other"));
        let mut store = RecordingStore::new(&mut engine, &mut sessions);
        store.insert_row("main", &info, &row![1, "a"]).unwrap();
        drop(store);
        assert!(kinds(&sessions, id).is_empty());
    }
}
