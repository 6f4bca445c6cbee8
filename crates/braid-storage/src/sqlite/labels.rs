//! Label CRUD operations for [`SqliteStore`].

use chrono::Utc;
use rusqlite::{Connection, params};

use braid_core::enums::EventType;

use crate::error::{Result, StorageError};
use crate::sqlite::issues::{emit_event, format_datetime, refresh_content_hash};
use crate::sqlite::store::SqliteStore;

// ---------------------------------------------------------------------------
// Connection-level helpers (shared with Transaction)
// ---------------------------------------------------------------------------

pub(crate) fn add_label_on_conn(
    conn: &Connection,
    issue_id: &str,
    label: &str,
    actor: &str,
) -> Result<()> {
    let now_str = format_datetime(&Utc::now());

    let inserted = conn.execute(
        "INSERT OR IGNORE INTO labels (issue_id, label) VALUES (?1, ?2)",
        params![issue_id, label],
    )?;

    // Re-adding an existing label is a silent no-op; no event, no hash churn.
    if inserted == 0 {
        return Ok(());
    }

    emit_event(
        conn,
        issue_id,
        EventType::LabelAdded,
        actor,
        None,
        Some(label),
        &now_str,
    )?;
    refresh_content_hash(conn, issue_id)?;

    Ok(())
}

pub(crate) fn remove_label_on_conn(
    conn: &Connection,
    issue_id: &str,
    label: &str,
    actor: &str,
) -> Result<()> {
    let now_str = format_datetime(&Utc::now());

    let affected = conn.execute(
        "DELETE FROM labels WHERE issue_id = ?1 AND label = ?2",
        params![issue_id, label],
    )?;

    if affected == 0 {
        return Err(StorageError::not_found(
            "label",
            format!("{issue_id}:{label}"),
        ));
    }

    emit_event(
        conn,
        issue_id,
        EventType::LabelRemoved,
        actor,
        Some(label),
        None,
        &now_str,
    )?;
    refresh_content_hash(conn, issue_id)?;

    Ok(())
}

pub(crate) fn get_labels_on_conn(conn: &Connection, issue_id: &str) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT label FROM labels WHERE issue_id = ?1 ORDER BY label")?;
    let rows = stmt.query_map(params![issue_id], |row| row.get::<_, String>(0))?;
    let mut labels = Vec::new();
    for row in rows {
        labels.push(row?);
    }
    Ok(labels)
}

/// Bulk insert without per-label events (used by batch ingest/import).
pub(crate) fn set_labels_on_conn(
    conn: &Connection,
    issue_id: &str,
    labels: &[String],
) -> Result<()> {
    conn.execute("DELETE FROM labels WHERE issue_id = ?1", params![issue_id])?;
    for label in labels {
        conn.execute(
            "INSERT OR IGNORE INTO labels (issue_id, label) VALUES (?1, ?2)",
            params![issue_id, label],
        )?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// SqliteStore methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    /// Adds a label to an issue.
    pub fn add_label_impl(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        add_label_on_conn(&conn, issue_id, label, actor)
    }

    /// Removes a label from an issue.
    pub fn remove_label_impl(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        remove_label_on_conn(&conn, issue_id, label, actor)
    }

    /// Returns all labels for an issue, sorted.
    pub fn get_labels_impl(&self, issue_id: &str) -> Result<Vec<String>> {
        let conn = self.lock_conn()?;
        get_labels_on_conn(&conn, issue_id)
    }
}
