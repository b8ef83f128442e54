//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: a source and a target database
//! with the same schema, and helpers to move changes between them.

use rowsync::{
    ApplyOptions, ApplyReport, Connection, ConnectionConfig, Row, Session, SessionOptions, Value,
};

/// Schema used by [`TestFixture::new`].
pub const DEFAULT_SCHEMA: &str = "
    CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, email TEXT UNIQUE);
    CREATE TABLE products (sku TEXT PRIMARY KEY, price REAL, stock INTEGER);
    CREATE TABLE notes (body TEXT);
";

/// A source and a target database with identical schemas.
pub struct TestFixture {
    pub source: Connection,
    pub target: Connection,
}

impl TestFixture {
    /// In-memory databases with [`DEFAULT_SCHEMA`].
    pub fn new() -> Self {
        Self::with_schema(DEFAULT_SCHEMA)
    }

    /// In-memory databases with a custom schema.
    pub fn with_schema(schema: &str) -> Self {
        Self::open(ConnectionConfig::in_memory(), ConnectionConfig::in_memory(), schema)
    }

    /// Databases opened from explicit configs, e.g. files in a temp dir.
    pub fn open(source: ConnectionConfig, target: ConnectionConfig, schema: &str) -> Self {
        let source = Connection::open(source).expect("open source");
        let target = Connection::open(target).expect("open target");
        source.exec(schema).expect("source schema");
        target.exec(schema).expect("target schema");
        Self { source, target }
    }

    /// Insert the same rows into both databases.
    ///
    /// Call before creating sessions, or the seed rows get recorded.
    pub fn seed(&self, table: &str, rows: &[Row]) {
        for conn in [&self.source, &self.target] {
            for row in rows {
                conn.insert(table, row.clone()).expect("seed row");
            }
        }
    }

    /// A session on the source recording every table.
    pub fn record(&self) -> Session {
        self.source
            .create_session(SessionOptions::new())
            .expect("create session")
    }

    /// A session on the source recording one table.
    pub fn record_table(&self, table: &str) -> Session {
        self.source
            .create_session(SessionOptions::new().table(table))
            .expect("create session")
    }

    /// Apply a buffer to the target. Returns false on ABORT.
    pub fn sync(&self, changeset: &[u8], options: ApplyOptions<'_>) -> bool {
        self.target
            .apply_changeset(changeset, options)
            .expect("apply changeset")
    }

    /// Apply a buffer to the target and return the full report.
    pub fn sync_with_report(&self, changeset: &[u8], options: ApplyOptions<'_>) -> ApplyReport {
        self.target
            .apply_changeset_with_report(changeset, options)
            .expect("apply changeset")
    }

    /// Whether `table` holds the same rows on both sides.
    pub fn converged(&self, table: &str) -> bool {
        let source = self.source.digest(table).expect("source digest");
        let target = self.target.digest(table).expect("target digest");
        source.is_some() && source == target
    }

    /// Target row by key.
    pub fn target_row(&self, table: &str, key: &[Value]) -> Option<Row> {
        self.target.get(table, key).expect("read target")
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Several in-memory connections sharing one schema.
pub fn replicas(count: usize, schema: &str) -> Vec<Connection> {
    (0..count)
        .map(|_| {
            let conn = Connection::open_in_memory().expect("open replica");
            conn.exec(schema).expect("replica schema");
            conn
        })
        .collect()
}
