//! Config, metadata, and sequence-counter operations for [`SqliteStore`].

use rusqlite::{Connection, params};
use std::collections::HashMap;

use crate::error::{Result, StorageError};
use crate::sqlite::schema::metadata_keys;
use crate::sqlite::store::SqliteStore;

// ---------------------------------------------------------------------------
// Connection-level helpers (shared with Transaction)
// ---------------------------------------------------------------------------

pub(crate) fn set_config_on_conn(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO config (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

pub(crate) fn get_config_on_conn(conn: &Connection, key: &str) -> Result<String> {
    conn.query_row(
        "SELECT value FROM config WHERE key = ?1",
        params![key],
        |row| row.get::<_, String>(0),
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StorageError::not_found("config", key),
        other => StorageError::from(other),
    })
}

pub(crate) fn set_metadata_on_conn(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

pub(crate) fn get_metadata_on_conn(conn: &Connection, key: &str) -> Result<String> {
    conn.query_row(
        "SELECT value FROM metadata WHERE key = ?1",
        params![key],
        |row| row.get::<_, String>(0),
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StorageError::not_found("metadata", key),
        other => StorageError::from(other),
    })
}

/// Increments and returns the sequential-ID counter.
pub(crate) fn next_sequence_on_conn(conn: &Connection) -> Result<u64> {
    let current: u64 = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            params![metadata_keys::ID_SEQUENCE],
            |row| row.get::<_, String>(0),
        )
        .map(|s| s.parse().unwrap_or(0))
        .unwrap_or(0);
    let next = current + 1;
    set_metadata_on_conn(conn, metadata_keys::ID_SEQUENCE, &next.to_string())?;
    Ok(next)
}

// ---------------------------------------------------------------------------
// SqliteStore methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    /// Sets a configuration key-value pair.
    pub fn set_config_impl(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        set_config_on_conn(&conn, key, value)
    }

    /// Gets a configuration value by key.
    pub fn get_config_impl(&self, key: &str) -> Result<String> {
        let conn = self.lock_conn()?;
        get_config_on_conn(&conn, key)
    }

    /// Returns all configuration key-value pairs.
    pub fn get_all_config_impl(&self) -> Result<HashMap<String, String>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT key, value FROM config ORDER BY key")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut map = HashMap::new();
        for row in rows {
            let (k, v) = row?;
            map.insert(k, v);
        }
        Ok(map)
    }

    /// Sets a metadata key-value pair.
    pub fn set_metadata_impl(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        set_metadata_on_conn(&conn, key, value)
    }

    /// Gets a metadata value by key.
    pub fn get_metadata_impl(&self, key: &str) -> Result<String> {
        let conn = self.lock_conn()?;
        get_metadata_on_conn(&conn, key)
    }

    /// Increments and returns the sequential-ID counter.
    pub fn next_sequence_impl(&self) -> Result<u64> {
        let conn = self.lock_conn()?;
        next_sequence_on_conn(&conn)
    }
}
