//! Connection and session lifecycle: the close cascade, transactions,
//! configuration, and on-disk databases.

use rowsync::{row, ApplyOptions, Connection, ConnectionConfig, Error, SessionOptions, Value};
use rowsync_testkit::{TestFixture, DEFAULT_SCHEMA};

fn open() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.exec(DEFAULT_SCHEMA).unwrap();
    conn
}

#[test]
fn test_sessions_outlive_their_connection() {
    let conn = open();
    let first = conn.create_session(SessionOptions::new()).unwrap();
    let second = conn
        .create_session(SessionOptions::new().table("users"))
        .unwrap();
    conn.insert("users", row![1, "ann", "a@x"]).unwrap();
    assert_eq!(first.len().unwrap(), 1);

    conn.close().unwrap();

    for session in [&first, &second] {
        assert!(!session.is_open());
        assert!(matches!(session.changeset(), Err(Error::SessionNotOpen)));
        assert!(matches!(session.patchset(), Err(Error::SessionNotOpen)));
        assert!(matches!(session.table(), Err(Error::SessionNotOpen)));
        assert!(matches!(session.close(), Err(Error::SessionNotOpen)));
    }
}

#[test]
fn test_dropping_connection_closes_sessions() {
    let conn = open();
    let session = conn.create_session(SessionOptions::new()).unwrap();
    drop(conn);
    assert!(!session.is_open());
    assert!(matches!(session.changeset(), Err(Error::SessionNotOpen)));
}

#[test]
fn test_session_double_close() {
    let conn = open();
    let session = conn.create_session(SessionOptions::new()).unwrap();
    assert_eq!(session.db().unwrap(), "main");
    assert_eq!(session.table().unwrap(), None);

    session.close().unwrap();
    assert!(matches!(session.close(), Err(Error::SessionNotOpen)));
    assert!(matches!(session.is_empty(), Err(Error::SessionNotOpen)));

    // The connection is unaffected.
    conn.insert("users", row![1, "ann", "a@x"]).unwrap();
    conn.close().unwrap();
    assert!(matches!(conn.close(), Err(Error::ConnectionNotOpen)));
}

#[test]
fn test_closed_session_stops_recording() {
    let conn = open();
    let closed = conn.create_session(SessionOptions::new()).unwrap();
    let live = conn.create_session(SessionOptions::new()).unwrap();
    closed.close().unwrap();

    conn.insert("users", row![1, "ann", "a@x"]).unwrap();
    assert_eq!(live.len().unwrap(), 1);

    // A new session may reuse the slot but never sees the old log.
    let fresh = conn.create_session(SessionOptions::new()).unwrap();
    assert_ne!(fresh.id(), closed.id());
    assert!(fresh.is_empty().unwrap());
}

#[test]
fn test_dropped_session_handle_detaches() {
    let conn = open();
    {
        let _scoped = conn.create_session(SessionOptions::new()).unwrap();
    }
    let kept = conn.create_session(SessionOptions::new()).unwrap();
    conn.insert("users", row![1, "ann", "a@x"]).unwrap();
    assert_eq!(kept.len().unwrap(), 1);
}

#[test]
fn test_rollback_discards_recorded_entries() {
    let conn = open();
    let session = conn.create_session(SessionOptions::new()).unwrap();
    conn.insert("users", row![1, "ann", "a@x"]).unwrap();

    conn.begin().unwrap();
    assert!(conn.is_transaction().unwrap());
    conn.insert("users", row![2, "bob", "b@x"]).unwrap();
    conn.delete("users", &row![1]).unwrap();
    assert_eq!(session.len().unwrap(), 3);
    conn.rollback().unwrap();

    assert!(!conn.is_transaction().unwrap());
    assert_eq!(session.len().unwrap(), 1);
    assert_eq!(conn.rows("users").unwrap(), vec![row![1, "ann", "a@x"]]);
}

#[test]
fn test_commit_keeps_recorded_entries() {
    let conn = open();
    let session = conn.create_session(SessionOptions::new()).unwrap();
    conn.begin().unwrap();
    conn.insert("users", row![1, "ann", "a@x"]).unwrap();
    conn.commit().unwrap();
    assert_eq!(session.len().unwrap(), 1);
}

#[test]
fn test_attached_schema_sessions() {
    let conn = open();
    conn.exec(
        "ATTACH DATABASE ':memory:' AS aux;
         CREATE TABLE aux.items (id INTEGER PRIMARY KEY, label TEXT);",
    )
    .unwrap();
    let main = conn.create_session(SessionOptions::new()).unwrap();
    let aux = conn.create_session(SessionOptions::new().db("aux")).unwrap();

    conn.insert("aux.items", row![1, "widget"]).unwrap();
    conn.insert("users", row![1, "ann", "a@x"]).unwrap();

    assert_eq!(aux.db().unwrap(), "aux");
    assert_eq!(aux.len().unwrap(), 1);
    assert_eq!(main.len().unwrap(), 1);
    assert_eq!(conn.get("aux.items", &row![1]).unwrap(), Some(row![1, "widget"]));

    // Replay always writes into the target's main schema.
    let target = Connection::open_in_memory().unwrap();
    target
        .exec("CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT)")
        .unwrap();
    assert!(target
        .apply_changeset(&aux.changeset().unwrap(), ApplyOptions::new())
        .unwrap());
    assert_eq!(target.rows("items").unwrap(), vec![row![1, "widget"]]);
}

#[test]
fn test_file_backed_databases() {
    let dir = tempfile::tempdir().unwrap();
    let source_path = dir.path().join("source.db");
    let target_path = dir.path().join("target.db");

    let changeset = {
        let fixture = TestFixture::open(
            ConnectionConfig::file(&source_path),
            ConnectionConfig::file(&target_path),
            DEFAULT_SCHEMA,
        );
        let session = fixture.record();
        fixture.source.insert("users", row![1, "ann", "a@x"]).unwrap();
        fixture.source.insert("products", row!["p", 1.25, 4]).unwrap();
        session.changeset().unwrap()
    };

    let target = Connection::open(ConnectionConfig::file(&target_path)).unwrap();
    assert_eq!(target.location().unwrap(), target_path.to_string_lossy());
    assert!(target.apply_changeset(&changeset, ApplyOptions::new()).unwrap());
    target.close().unwrap();

    let reopened = Connection::open(ConnectionConfig::file(&target_path).read_only(true)).unwrap();
    assert_eq!(reopened.get("products", &row!["p"]).unwrap(), Some(row!["p", 1.25, 4]));
    assert!(matches!(
        reopened.insert("users", row![2, "bob", "b@x"]),
        Err(Error::Store(_))
    ));
}

#[test]
fn test_config_from_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cfg.db");
    let json = format!(
        r#"{{ "location": {}, "enable_foreign_keys": false, "busy_timeout_ms": 500 }}"#,
        serde_json::to_string(&path.to_string_lossy()).unwrap()
    );
    let config = ConnectionConfig::from_json(&json).unwrap();
    assert!(!config.read_only);

    let conn = Connection::open(config).unwrap();
    conn.exec(
        "CREATE TABLE parent (id INTEGER PRIMARY KEY);
         CREATE TABLE child (id INTEGER PRIMARY KEY, parent INTEGER REFERENCES parent(id));",
    )
    .unwrap();
    // Foreign keys are off, so a dangling reference is accepted.
    conn.insert("child", row![1, 99]).unwrap();

    assert!(matches!(
        ConnectionConfig::from_json(r#"{ "read_only": "yes" }"#),
        Err(Error::Config(_))
    ));
}

#[test]
fn test_foreign_keys_on_by_default() {
    let conn = Connection::open_in_memory().unwrap();
    conn.exec(
        "CREATE TABLE parent (id INTEGER PRIMARY KEY);
         CREATE TABLE child (id INTEGER PRIMARY KEY, parent INTEGER REFERENCES parent(id));",
    )
    .unwrap();
    assert!(matches!(
        conn.insert("child", row![1, 99]),
        Err(Error::Rejected {
            reason: rowsync::Rejection::ForeignKey,
            ..
        })
    ));
}

#[test]
fn test_closed_connection_rejects_everything() {
    let conn = open();
    conn.close().unwrap();
    assert!(!conn.is_open());
    assert!(matches!(
        conn.insert("users", row![1, "ann", "a@x"]),
        Err(Error::ConnectionNotOpen)
    ));
    assert!(matches!(conn.get("users", &row![1]), Err(Error::ConnectionNotOpen)));
    assert!(matches!(conn.begin(), Err(Error::ConnectionNotOpen)));
    assert!(matches!(
        conn.update("users", &row![1], &[("name", Value::Null)]),
        Err(Error::ConnectionNotOpen)
    ));
}
