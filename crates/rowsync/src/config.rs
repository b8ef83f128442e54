//! Connection and session configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use rowsync_store::MEMORY_LOCATION;

use crate::error::Result;

/// Configuration for opening a [`Connection`](crate::Connection).
///
/// Loadable from JSON; missing fields take their defaults.
///
/// ```
/// use rowsync::ConnectionConfig;
///
/// let config = ConnectionConfig::from_json(r#"{ "location": "app.db", "read_only": true }"#).unwrap();
/// assert!(config.read_only);
/// assert!(config.enable_foreign_keys);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Database file path, or `":memory:"`.
    pub location: String,
    /// Open without write access.
    pub read_only: bool,
    /// Enforce foreign keys.
    pub enable_foreign_keys: bool,
    /// How long to wait on locks held by other connections. 0 disables.
    pub busy_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            location: MEMORY_LOCATION.to_string(),
            read_only: false,
            enable_foreign_keys: true,
            busy_timeout_ms: 0,
        }
    }
}

impl ConnectionConfig {
    /// A private in-memory database.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// A database file.
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            location: path.as_ref().to_string_lossy().into_owned(),
            ..Self::default()
        }
    }

    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.enable_foreign_keys = enabled;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// The busy timeout, if one is set.
    pub fn busy_timeout_duration(&self) -> Option<Duration> {
        (self.busy_timeout_ms > 0).then(|| Duration::from_millis(self.busy_timeout_ms))
    }
}

/// Scope of a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Only record this table. `None` records every table.
    pub table: Option<String>,
    /// Schema to record, `"main"` unless an attached database is wanted.
    pub db: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            table: None,
            db: "main".to_string(),
        }
    }
}

impl SessionOptions {
    /// Record every table in `main`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict recording to one table.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Record a different schema.
    pub fn db(mut self, db: impl Into<String>) -> Self {
        self.db = db.into();
        self
    }

    /// Whether a write to `schema.table` falls in scope.
    ///
    /// Names compare case-insensitively, as the engine does.
    pub fn observes(&self, schema: &str, table: &str) -> bool {
        self.db.eq_ignore_ascii_case(schema)
            && self
                .table
                .as_deref()
                .map_or(true, |t| t.eq_ignore_ascii_case(table))
    }
}
