//! [`SqliteStore`] -- SQLite-backed storage implementation.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{Result, StorageError};
use crate::sqlite::schema;

/// SQLite-backed implementation of the [`Storage`](crate::traits::Storage)
/// trait.
///
/// Wraps a [`rusqlite::Connection`] in a `Mutex`. All public methods acquire
/// the lock, execute SQL, and release it; the mutex is the workspace writer
/// lock.
pub struct SqliteStore {
    pub(crate) conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) a SQLite database at the given path with the
    /// default busy timeout.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_busy_timeout(path, Duration::from_secs(5))
    }

    /// Opens (or creates) a SQLite database with an explicit busy timeout.
    ///
    /// Enables WAL mode and foreign keys, then initialises the schema.
    pub fn open_with_busy_timeout(path: impl AsRef<Path>, busy: Duration) -> Result<Self> {
        let path = path.as_ref();
        info!(?path, "opening SQLite store");

        let conn = Connection::open(path).map_err(|e| {
            StorageError::Connection(format!("failed to open {}: {e}", path.display()))
        })?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.configure_connection(busy)?;
        store.init_schema()?;

        Ok(store)
    }

    /// Opens an in-memory SQLite database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        debug!("opening in-memory SQLite store");
        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::Connection(format!("failed to open in-memory db: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.configure_connection(Duration::from_secs(5))?;
        store.init_schema()?;

        Ok(store)
    }

    /// Sets connection pragmas (WAL mode, foreign keys, busy timeout).
    fn configure_connection(&self, busy: Duration) -> Result<()> {
        let conn = self.lock_conn()?;

        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = {};",
            busy.as_millis()
        ))
        .map_err(|e| StorageError::Connection(format!("failed to set pragmas: {e}")))?;

        Ok(())
    }

    /// Creates all tables and indexes if they do not exist, then runs
    /// migrations.
    fn init_schema(&self) -> Result<()> {
        let conn = self.lock_conn()?;

        // Skip if the schema is already at the current version.
        let version: std::result::Result<i32, _> = conn.query_row(
            "SELECT value FROM config WHERE key = 'schema_version'",
            [],
            |row| {
                let v: String = row.get(0)?;
                Ok(v.parse::<i32>().unwrap_or(0))
            },
        );
        if let Ok(v) = version {
            if v >= schema::CURRENT_SCHEMA_VERSION {
                debug!(version = v, "schema already current, skipping init");
                return Ok(());
            }
        }

        for stmt in schema::SCHEMA_STATEMENTS {
            conn.execute_batch(stmt)
                .map_err(|e| StorageError::Migration {
                    name: "init_schema".into(),
                    reason: format!("{e}\nStatement: {}", truncate(stmt, 120)),
                })?;
        }

        for &(key, value) in schema::DEFAULT_CONFIG {
            conn.execute(
                "INSERT OR IGNORE INTO config (key, value) VALUES (?1, ?2)",
                rusqlite::params![key, value],
            )
            .map_err(|e| StorageError::Migration {
                name: "default_config".into(),
                reason: format!("failed to insert {key}: {e}"),
            })?;
        }

        Self::run_migrations_on_conn(&conn)?;

        conn.execute(
            "INSERT OR REPLACE INTO config (key, value) VALUES ('schema_version', ?1)",
            rusqlite::params![schema::CURRENT_SCHEMA_VERSION.to_string()],
        )
        .map_err(|e| StorageError::Migration {
            name: "schema_version".into(),
            reason: e.to_string(),
        })?;

        info!(
            "schema initialized (version {})",
            schema::CURRENT_SCHEMA_VERSION
        );
        Ok(())
    }

    /// Applies pending migrations tracked via the `metadata` table.
    fn run_migrations_on_conn(conn: &Connection) -> Result<()> {
        for &(name, sql) in schema::MIGRATIONS {
            let key = format!("migration:{name}");
            let already_applied: bool = conn
                .query_row(
                    "SELECT COUNT(*) FROM metadata WHERE key = ?1",
                    rusqlite::params![key],
                    |row| row.get::<_, i32>(0),
                )
                .unwrap_or(0)
                > 0;

            if already_applied {
                debug!(name, "migration already applied, skipping");
                continue;
            }

            debug!(name, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| StorageError::Migration {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;

            conn.execute(
                "INSERT INTO metadata (key, value) VALUES (?1, ?2)",
                rusqlite::params![key, "applied"],
            )
            .map_err(|e| StorageError::Migration {
                name: name.to_string(),
                reason: format!("failed to mark migration: {e}"),
            })?;
        }
        Ok(())
    }

    /// Acquires the connection lock. Helper used by all operation modules.
    pub(crate) fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Connection(format!("mutex poisoned: {e}")))
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

/// Truncates a string for error messages.
fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        format!("{}...", &s[..max])
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock_conn().unwrap();
        let count: i32 = conn
            .query_row("SELECT COUNT(*) FROM config", [], |row| row.get(0))
            .unwrap();
        assert!(count > 0, "default config should be inserted");
    }

    #[test]
    fn schema_version_set() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock_conn().unwrap();
        let version: String = conn
            .query_row(
                "SELECT value FROM config WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(version, schema::CURRENT_SCHEMA_VERSION.to_string());
    }

    #[test]
    fn idempotent_init() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.init_schema().unwrap();
    }

    #[test]
    fn open_on_disk_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("braid.db");
        {
            let store = SqliteStore::open(&db_path).unwrap();
            store.set_config_impl("issue_prefix", "t").unwrap();
        }
        let store = SqliteStore::open(&db_path).unwrap();
        assert_eq!(store.get_config_impl("issue_prefix").unwrap(), "t");
    }
}
