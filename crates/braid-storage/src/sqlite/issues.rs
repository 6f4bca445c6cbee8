//! Issue CRUD operations for [`SqliteStore`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};

use braid_core::content_hash::compute_content_hash;
use braid_core::enums::{EventType, IssueType, Status};
use braid_core::filter::IssueFilter;
use braid_core::issue::Issue;

use crate::error::{Result, StorageError};
use crate::sqlite::dependencies::{
    count_open_blockers, get_dependency_records_on_conn, recompute_dependents_on_conn,
};
use crate::sqlite::labels::get_labels_on_conn;
use crate::sqlite::store::SqliteStore;
use crate::traits::IssueUpdates;

// ---------------------------------------------------------------------------
// Column list (shared between INSERT and SELECT)
// ---------------------------------------------------------------------------

/// All issue columns in a deterministic order for SELECT queries.
pub(crate) const ISSUE_COLUMNS: &str = r#"
    id, content_hash, title, description, design, acceptance_criteria, notes,
    status, priority, issue_type, assignee, estimated_minutes,
    created_at, created_by, updated_at, closed_at, close_reason,
    ephemeral, compaction_level, spec_id, spec_changed_at, extra
"#;

/// Same as [`ISSUE_COLUMNS`] but prefixed with `issues.` for JOIN queries,
/// where `created_at` would otherwise be ambiguous.
pub(crate) const ISSUE_COLUMNS_PREFIXED: &str = r#"
    issues.id, issues.content_hash, issues.title, issues.description, issues.design,
    issues.acceptance_criteria, issues.notes,
    issues.status, issues.priority, issues.issue_type, issues.assignee, issues.estimated_minutes,
    issues.created_at, issues.created_by, issues.updated_at, issues.closed_at, issues.close_reason,
    issues.ephemeral, issues.compaction_level, issues.spec_id, issues.spec_changed_at, issues.extra
"#;

// ---------------------------------------------------------------------------
// Row scanning
// ---------------------------------------------------------------------------

/// Deserialises a row into an [`Issue`]. Column order MUST match
/// [`ISSUE_COLUMNS`].
pub(crate) fn scan_issue(row: &Row<'_>) -> rusqlite::Result<Issue> {
    let extra_str: String = row.get("extra")?;
    let extra: BTreeMap<String, serde_json::Value> =
        serde_json::from_str(&extra_str).unwrap_or_default();

    let closed_at_str: Option<String> = row.get("closed_at")?;
    let spec_changed_at_str: Option<String> = row.get("spec_changed_at")?;

    Ok(Issue {
        id: row.get("id")?,
        content_hash: row.get("content_hash")?,
        title: row.get("title")?,
        description: row.get("description")?,
        design: row.get("design")?,
        acceptance_criteria: row.get("acceptance_criteria")?,
        notes: row.get("notes")?,
        status: Status::from(row.get::<_, String>("status")?),
        priority: row.get("priority")?,
        issue_type: IssueType::from(row.get::<_, String>("issue_type")?),
        assignee: row.get("assignee")?,
        estimated_minutes: row.get("estimated_minutes")?,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
        created_by: row.get("created_by")?,
        updated_at: parse_datetime(&row.get::<_, String>("updated_at")?),
        closed_at: closed_at_str.as_deref().map(parse_datetime),
        close_reason: row.get("close_reason")?,
        ephemeral: row.get::<_, i32>("ephemeral")? != 0,
        compaction_level: row.get("compaction_level")?,
        spec_id: row.get("spec_id")?,
        spec_changed_at: spec_changed_at_str.as_deref().map(parse_datetime),
        extra,
        // Relational fields are attached on demand, not stored inline.
        labels: Vec::new(),
        dependencies: Vec::new(),
    })
}

// ---------------------------------------------------------------------------
// Datetime helpers
// ---------------------------------------------------------------------------

/// Formats a `DateTime<Utc>` as ISO 8601 TEXT for SQLite.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Parses an ISO 8601 TEXT string from SQLite into a `DateTime<Utc>`.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    s.parse::<DateTime<Utc>>().unwrap_or_else(|_| {
        chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ")
            .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ"))
            .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
            .map(|ndt| ndt.and_utc())
            .unwrap_or_else(|_| Utc::now())
    })
}

// ---------------------------------------------------------------------------
// Event emission
// ---------------------------------------------------------------------------

/// Appends an event row to the audit trail.
pub(crate) fn emit_event(
    conn: &Connection,
    issue_id: &str,
    event_type: EventType,
    actor: &str,
    old_value: Option<&str>,
    new_value: Option<&str>,
    created_at: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO events (issue_id, event_type, actor, old_value, new_value, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            issue_id,
            event_type.as_str(),
            actor,
            old_value,
            new_value,
            created_at,
        ],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Insert
// ---------------------------------------------------------------------------

/// Inserts a single issue on the given connection.
///
/// Rejects duplicate IDs and IDs reserved by a tombstone.
pub(crate) fn insert_issue(conn: &Connection, issue: &Issue, actor: &str) -> Result<()> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT status FROM issues WHERE id = ?1",
            params![issue.id],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(StorageError::from(other)),
        })?;
    match existing.as_deref() {
        Some("tombstone") => {
            return Err(StorageError::Tombstoned {
                id: issue.id.clone(),
            });
        }
        Some(_) => {
            return Err(StorageError::DuplicateId {
                id: issue.id.clone(),
            });
        }
        None => {}
    }

    let now = Utc::now();
    let now_str = format_datetime(&now);
    let content_hash = compute_content_hash(issue);
    let extra_str = serde_json::to_string(&issue.extra).unwrap_or_else(|_| "{}".to_owned());

    conn.execute(
        &format!(
            "INSERT INTO issues ({ISSUE_COLUMNS}) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7,
                ?8, ?9, ?10, ?11, ?12,
                ?13, ?14, ?15, ?16, ?17,
                ?18, ?19, ?20, ?21, ?22
            )"
        ),
        params![
            issue.id,                                          // 1
            content_hash,                                      // 2
            issue.title,                                       // 3
            issue.description,                                 // 4
            issue.design,                                      // 5
            issue.acceptance_criteria,                         // 6
            issue.notes,                                       // 7
            issue.status.as_str(),                             // 8
            issue.priority,                                    // 9
            issue.issue_type.as_str(),                         // 10
            issue.assignee,                                    // 11
            issue.estimated_minutes,                           // 12
            format_datetime(&issue.created_at),                // 13
            issue.created_by,                                  // 14
            format_datetime(&issue.updated_at),                // 15
            issue.closed_at.as_ref().map(format_datetime),     // 16
            issue.close_reason,                                // 17
            issue.ephemeral as i32,                            // 18
            issue.compaction_level,                            // 19
            issue.spec_id,                                     // 20
            issue.spec_changed_at.as_ref().map(format_datetime), // 21
            extra_str,                                         // 22
        ],
    )?;

    emit_event(
        conn,
        &issue.id,
        EventType::Created,
        actor,
        None,
        None,
        &now_str,
    )?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Content hash maintenance
// ---------------------------------------------------------------------------

/// Recomputes and stores the content hash of an issue from its current row,
/// labels, and dependency edges.
///
/// Called after any mutation that touches hashed content, so that import's
/// unchanged check stays accurate.
pub(crate) fn refresh_content_hash(conn: &Connection, id: &str) -> Result<()> {
    let mut issue = get_issue_on_conn(conn, id)?;
    issue.labels = get_labels_on_conn(conn, id)?;
    issue.dependencies = get_dependency_records_on_conn(conn, id)?;
    let hash = compute_content_hash(&issue);
    conn.execute(
        "UPDATE issues SET content_hash = ?1 WHERE id = ?2",
        params![hash, id],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// Retrieves a single issue by ID on the given connection.
pub(crate) fn get_issue_on_conn(conn: &Connection, id: &str) -> Result<Issue> {
    let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?1");
    conn.query_row(&sql, params![id], scan_issue)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StorageError::not_found("issue", id),
            other => StorageError::from(other),
        })
}

// ---------------------------------------------------------------------------
// Import upsert
// ---------------------------------------------------------------------------

/// Upserts an issue from a mirror record, preserving its timestamps
/// verbatim. Labels are replaced wholesale. A new row appends a "created"
/// event; a changed row appends a single "imported" event.
pub(crate) fn import_issue_on_conn(conn: &Connection, issue: &Issue, actor: &str) -> Result<()> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT status FROM issues WHERE id = ?1",
            params![issue.id],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(StorageError::from(other)),
        })?;

    match existing.as_deref() {
        Some("tombstone") => {
            return Err(StorageError::Tombstoned {
                id: issue.id.clone(),
            });
        }
        None => {
            insert_issue(conn, issue, actor)?;
            if !issue.labels.is_empty() {
                crate::sqlite::labels::set_labels_on_conn(conn, &issue.id, &issue.labels)?;
            }
            refresh_content_hash(conn, &issue.id)?;
            return Ok(());
        }
        Some(_) => {}
    }

    let extra_str = serde_json::to_string(&issue.extra).unwrap_or_else(|_| "{}".to_owned());
    conn.execute(
        "UPDATE issues SET
            title = ?1, description = ?2, design = ?3, acceptance_criteria = ?4,
            notes = ?5, status = ?6, priority = ?7, issue_type = ?8, assignee = ?9,
            estimated_minutes = ?10, created_at = ?11, created_by = ?12,
            updated_at = ?13, closed_at = ?14, close_reason = ?15,
            compaction_level = ?16, spec_id = ?17, spec_changed_at = ?18, extra = ?19
         WHERE id = ?20",
        params![
            issue.title,
            issue.description,
            issue.design,
            issue.acceptance_criteria,
            issue.notes,
            issue.status.as_str(),
            issue.priority,
            issue.issue_type.as_str(),
            issue.assignee,
            issue.estimated_minutes,
            format_datetime(&issue.created_at),
            issue.created_by,
            format_datetime(&issue.updated_at),
            issue.closed_at.as_ref().map(format_datetime),
            issue.close_reason,
            issue.compaction_level,
            issue.spec_id,
            issue.spec_changed_at.as_ref().map(format_datetime),
            extra_str,
            issue.id,
        ],
    )?;

    crate::sqlite::labels::set_labels_on_conn(conn, &issue.id, &issue.labels)?;

    emit_event(
        conn,
        &issue.id,
        EventType::Imported,
        actor,
        None,
        None,
        &format_datetime(&Utc::now()),
    )?;

    refresh_content_hash(conn, &issue.id)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Update
// ---------------------------------------------------------------------------

/// Applies partial updates, emitting one event per changed field.
///
/// Status changes get `status_changed` (or `closed` / `reopened`) events;
/// every other changed field gets an `updated` event whose old/new values are
/// `field=value` pairs.
pub(crate) fn update_issue_on_conn(
    conn: &Connection,
    id: &str,
    updates: &IssueUpdates,
    actor: &str,
) -> Result<()> {
    if updates.is_empty() {
        return Ok(());
    }

    let current = get_issue_on_conn(conn, id)?;
    let now = Utc::now();
    let now_str = format_datetime(&now);

    let mut set_clauses: Vec<String> = Vec::new();
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
    // Deferred so a failed UPDATE appends nothing.
    let mut pending_events: Vec<(EventType, Option<String>, Option<String>)> = Vec::new();

    macro_rules! text_field {
        ($field:ident, $col:expr) => {
            if let Some(ref val) = updates.$field {
                if *val != current.$field {
                    set_clauses.push(format!("{} = ?", $col));
                    param_values.push(Box::new(val.clone()));
                    pending_events.push((
                        EventType::Updated,
                        Some(format!("{}={}", $col, current.$field)),
                        Some(format!("{}={}", $col, val)),
                    ));
                }
            }
        };
    }

    text_field!(title, "title");
    text_field!(description, "description");
    text_field!(design, "design");
    text_field!(acceptance_criteria, "acceptance_criteria");
    text_field!(notes, "notes");
    text_field!(assignee, "assignee");
    text_field!(spec_id, "spec_id");
    text_field!(close_reason, "close_reason");

    if let Some(priority) = updates.priority {
        if priority != current.priority {
            set_clauses.push("priority = ?".to_owned());
            param_values.push(Box::new(priority));
            pending_events.push((
                EventType::Updated,
                Some(format!("priority={}", current.priority)),
                Some(format!("priority={priority}")),
            ));
        }
    }
    if let Some(ref issue_type) = updates.issue_type {
        if *issue_type != current.issue_type {
            set_clauses.push("issue_type = ?".to_owned());
            param_values.push(Box::new(issue_type.as_str().to_owned()));
            pending_events.push((
                EventType::Updated,
                Some(format!("issue_type={}", current.issue_type)),
                Some(format!("issue_type={issue_type}")),
            ));
        }
    }
    if let Some(ephemeral) = updates.ephemeral {
        if ephemeral != current.ephemeral {
            set_clauses.push("ephemeral = ?".to_owned());
            param_values.push(Box::new(ephemeral as i32));
            pending_events.push((
                EventType::Updated,
                Some(format!("ephemeral={}", current.ephemeral)),
                Some(format!("ephemeral={ephemeral}")),
            ));
        }
    }
    if let Some(compaction_level) = updates.compaction_level {
        if compaction_level != current.compaction_level {
            set_clauses.push("compaction_level = ?".to_owned());
            param_values.push(Box::new(compaction_level));
            pending_events.push((
                EventType::Updated,
                Some(format!("compaction_level={}", current.compaction_level)),
                Some(format!("compaction_level={compaction_level}")),
            ));
        }
    }
    if let Some(ref est) = updates.estimated_minutes {
        if *est != current.estimated_minutes {
            set_clauses.push("estimated_minutes = ?".to_owned());
            param_values.push(Box::new(*est));
            pending_events.push((
                EventType::Updated,
                Some(format!("estimated_minutes={:?}", current.estimated_minutes)),
                Some(format!("estimated_minutes={est:?}")),
            ));
        }
    }
    if let Some(ref sca) = updates.spec_changed_at {
        if *sca != current.spec_changed_at {
            set_clauses.push("spec_changed_at = ?".to_owned());
            param_values.push(Box::new(sca.as_ref().map(format_datetime)));
            pending_events.push((
                EventType::Updated,
                Some("spec_changed_at".to_owned()),
                sca.as_ref().map(|t| t.to_rfc3339()),
            ));
        }
    }

    // Status is special: it drives closed_at and the blocked invariant.
    let mut closedness_changed = false;
    if let Some(ref status) = updates.status {
        if *status != current.status {
            if *status == Status::Blocked && count_open_blockers(conn, id)? == 0 {
                return Err(StorageError::validation(
                    format!("{id} has no unclosed blocking dependency"),
                    "status_blocked_requires_blocker",
                ));
            }

            set_clauses.push("status = ?".to_owned());
            param_values.push(Box::new(status.as_str().to_owned()));

            let was_closed = !current.status.is_unclosed();
            let is_closed = !status.is_unclosed();
            if is_closed && !was_closed {
                set_clauses.push("closed_at = ?".to_owned());
                param_values.push(Box::new(now_str.clone()));
                pending_events.push((
                    EventType::Closed,
                    Some(current.status.as_str().to_owned()),
                    Some(status.as_str().to_owned()),
                ));
                closedness_changed = true;
            } else if !is_closed && was_closed {
                set_clauses.push("closed_at = NULL".to_owned());
                set_clauses.push("close_reason = ''".to_owned());
                pending_events.push((
                    EventType::Reopened,
                    Some(current.status.as_str().to_owned()),
                    Some(status.as_str().to_owned()),
                ));
                closedness_changed = true;
            } else {
                pending_events.push((
                    EventType::StatusChanged,
                    Some(current.status.as_str().to_owned()),
                    Some(status.as_str().to_owned()),
                ));
            }
        }
    }

    if set_clauses.is_empty() {
        return Ok(()); // Every requested field already has that value.
    }

    set_clauses.push("updated_at = ?".to_owned());
    param_values.push(Box::new(now_str.clone()));

    let sql = format!("UPDATE issues SET {} WHERE id = ?", set_clauses.join(", "));
    param_values.push(Box::new(id.to_owned()));

    let param_refs: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();

    let affected = conn.execute(&sql, param_refs.as_slice())?;
    if affected == 0 {
        return Err(StorageError::not_found("issue", id));
    }

    for (event_type, old, new) in pending_events {
        emit_event(
            conn,
            id,
            event_type,
            actor,
            old.as_deref(),
            new.as_deref(),
            &now_str,
        )?;
    }

    refresh_content_hash(conn, id)?;

    if closedness_changed {
        recompute_dependents_on_conn(conn, id, actor)?;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Close / delete / rename
// ---------------------------------------------------------------------------

/// Closes an issue on the given connection and relaxes its dependents.
pub(crate) fn close_issue_on_conn(
    conn: &Connection,
    id: &str,
    reason: &str,
    actor: &str,
) -> Result<()> {
    let now = Utc::now();
    let now_str = format_datetime(&now);

    let affected = conn.execute(
        "UPDATE issues SET status = 'closed', closed_at = ?1, close_reason = ?2,
         updated_at = ?1 WHERE id = ?3 AND status != 'tombstone'",
        params![now_str, reason, id],
    )?;
    if affected == 0 {
        return Err(StorageError::not_found("issue", id));
    }

    emit_event(
        conn,
        id,
        EventType::Closed,
        actor,
        None,
        Some(reason),
        &now_str,
    )?;

    refresh_content_hash(conn, id)?;
    recompute_dependents_on_conn(conn, id, actor)?;

    Ok(())
}

/// Tombstones an issue: the row survives with status=tombstone and cleared
/// content so the ID stays reserved against import resurrection.
pub(crate) fn delete_issue_on_conn(conn: &Connection, id: &str, actor: &str) -> Result<()> {
    let current = get_issue_on_conn(conn, id)?;
    if current.is_tombstone() {
        return Ok(()); // Deleting a tombstone is a no-op.
    }

    let now = Utc::now();
    let now_str = format_datetime(&now);

    conn.execute(
        "UPDATE issues SET status = 'tombstone', description = '', design = '',
         acceptance_criteria = '', notes = '', assignee = '', close_reason = '',
         closed_at = NULL, extra = '{}', updated_at = ?1 WHERE id = ?2",
        params![now_str, id],
    )?;

    // A tombstone neither blocks nor is blocked.
    conn.execute("DELETE FROM dependencies WHERE issue_id = ?1", params![id])?;
    conn.execute(
        "DELETE FROM dependencies WHERE depends_on_id = ?1",
        params![id],
    )?;
    conn.execute("DELETE FROM labels WHERE issue_id = ?1", params![id])?;

    emit_event(
        conn,
        id,
        EventType::Deleted,
        actor,
        Some(current.status.as_str()),
        Some("tombstone"),
        &now_str,
    )?;

    refresh_content_hash(conn, id)?;
    recompute_dependents_on_conn(conn, id, actor)?;

    Ok(())
}

/// Rewrites an issue ID everywhere it appears.
pub(crate) fn update_issue_id_on_conn(
    conn: &Connection,
    old_id: &str,
    new_id: &str,
    actor: &str,
) -> Result<()> {
    // Refuse to collide with an existing row.
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM issues WHERE id = ?1)",
        params![new_id],
        |row| row.get(0),
    )?;
    if exists {
        return Err(StorageError::DuplicateId {
            id: new_id.to_owned(),
        });
    }

    let now = Utc::now();
    let now_str = format_datetime(&now);

    let affected = conn.execute(
        "UPDATE issues SET id = ?1, updated_at = ?2 WHERE id = ?3",
        params![new_id, now_str, old_id],
    )?;
    if affected == 0 {
        return Err(StorageError::not_found("issue", old_id));
    }

    conn.execute(
        "UPDATE dependencies SET issue_id = ?1 WHERE issue_id = ?2",
        params![new_id, old_id],
    )?;
    conn.execute(
        "UPDATE dependencies SET depends_on_id = ?1 WHERE depends_on_id = ?2",
        params![new_id, old_id],
    )?;
    conn.execute(
        "UPDATE labels SET issue_id = ?1 WHERE issue_id = ?2",
        params![new_id, old_id],
    )?;
    conn.execute(
        "UPDATE comments SET issue_id = ?1 WHERE issue_id = ?2",
        params![new_id, old_id],
    )?;
    conn.execute(
        "UPDATE events SET issue_id = ?1 WHERE issue_id = ?2",
        params![new_id, old_id],
    )?;

    emit_event(
        conn,
        new_id,
        EventType::Updated,
        actor,
        Some(&format!("id={old_id}")),
        Some(&format!("id={new_id}")),
        &now_str,
    )?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// Searches issues on the given connection.
pub(crate) fn search_issues_on_conn(
    conn: &Connection,
    query: &str,
    filter: &IssueFilter,
) -> Result<Vec<Issue>> {
    let mut where_clauses: Vec<String> = Vec::new();
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
    let mut param_idx = 1;

    // Text search across title, description, notes.
    if !query.is_empty() {
        where_clauses.push(format!(
            "(title LIKE ?{pi} OR description LIKE ?{pi} OR notes LIKE ?{pi})",
            pi = param_idx
        ));
        param_values.push(Box::new(format!("%{query}%")));
        param_idx += 1;
    }

    if let Some(ref status) = filter.status {
        where_clauses.push(format!("status = ?{param_idx}"));
        param_values.push(Box::new(status.as_str().to_owned()));
        param_idx += 1;
    } else {
        // Tombstones only show up when asked for explicitly.
        where_clauses.push("status != 'tombstone'".to_owned());
    }
    if let Some(priority) = filter.priority {
        where_clauses.push(format!("priority = ?{param_idx}"));
        param_values.push(Box::new(priority));
        param_idx += 1;
    }
    if let Some(ref issue_type) = filter.issue_type {
        where_clauses.push(format!("issue_type = ?{param_idx}"));
        param_values.push(Box::new(issue_type.as_str().to_owned()));
        param_idx += 1;
    }
    if let Some(ref assignee) = filter.assignee {
        where_clauses.push(format!("assignee = ?{param_idx}"));
        param_values.push(Box::new(assignee.clone()));
        param_idx += 1;
    }
    if let Some(ref title_contains) = filter.title_contains {
        where_clauses.push(format!("title LIKE ?{param_idx}"));
        param_values.push(Box::new(format!("%{title_contains}%")));
        param_idx += 1;
    }
    if let Some(ref desc_contains) = filter.description_contains {
        where_clauses.push(format!("description LIKE ?{param_idx}"));
        param_values.push(Box::new(format!("%{desc_contains}%")));
        param_idx += 1;
    }
    if let Some(ref created_after) = filter.created_after {
        where_clauses.push(format!("created_at >= ?{param_idx}"));
        param_values.push(Box::new(format_datetime(created_after)));
        param_idx += 1;
    }
    if let Some(ref created_before) = filter.created_before {
        where_clauses.push(format!("created_at <= ?{param_idx}"));
        param_values.push(Box::new(format_datetime(created_before)));
        param_idx += 1;
    }
    if let Some(ref updated_after) = filter.updated_after {
        where_clauses.push(format!("updated_at >= ?{param_idx}"));
        param_values.push(Box::new(format_datetime(updated_after)));
        param_idx += 1;
    }
    if let Some(ref updated_before) = filter.updated_before {
        where_clauses.push(format!("updated_at <= ?{param_idx}"));
        param_values.push(Box::new(format_datetime(updated_before)));
        param_idx += 1;
    }
    if filter.no_assignee {
        where_clauses.push("(assignee IS NULL OR assignee = '')".to_owned());
    }
    if let Some(ephemeral) = filter.ephemeral {
        where_clauses.push(format!("ephemeral = ?{param_idx}"));
        param_values.push(Box::new(ephemeral as i32));
        param_idx += 1;
    }
    for status in &filter.exclude_status {
        where_clauses.push(format!("status != ?{param_idx}"));
        param_values.push(Box::new(status.as_str().to_owned()));
        param_idx += 1;
    }
    if !filter.ids.is_empty() {
        let placeholders: Vec<String> = filter
            .ids
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", param_idx + i))
            .collect();
        where_clauses.push(format!("id IN ({})", placeholders.join(",")));
        for id in &filter.ids {
            param_values.push(Box::new(id.clone()));
        }
        param_idx += filter.ids.len();
    }

    // Labels AND.
    for label in &filter.labels {
        where_clauses.push(format!(
            "EXISTS (SELECT 1 FROM labels WHERE labels.issue_id = issues.id AND labels.label = ?{param_idx})"
        ));
        param_values.push(Box::new(label.clone()));
        param_idx += 1;
    }

    // Labels OR.
    if !filter.labels_any.is_empty() {
        let placeholders: Vec<String> = filter
            .labels_any
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", param_idx + i))
            .collect();
        where_clauses.push(format!(
            "EXISTS (SELECT 1 FROM labels WHERE labels.issue_id = issues.id AND labels.label IN ({}))",
            placeholders.join(",")
        ));
        for label in &filter.labels_any {
            param_values.push(Box::new(label.clone()));
        }
        param_idx += filter.labels_any.len();
    }

    let where_sql = if where_clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", where_clauses.join(" AND "))
    };

    let limit_sql = filter
        .limit
        .map(|l| format!(" LIMIT {l}"))
        .unwrap_or_default();

    let sql = format!(
        "SELECT {ISSUE_COLUMNS} FROM issues {where_sql} ORDER BY created_at DESC, id ASC{limit_sql}"
    );

    let param_refs: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), scan_issue)?;

    let mut issues = Vec::new();
    for row in rows {
        issues.push(row?);
    }

    let _ = param_idx;
    Ok(issues)
}

// ---------------------------------------------------------------------------
// SqliteStore issue methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    /// Creates a single issue.
    pub fn create_issue_impl(&self, issue: &Issue, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        insert_issue(&conn, issue, actor)
    }

    /// Retrieves an issue by ID.
    pub fn get_issue_impl(&self, id: &str) -> Result<Issue> {
        let conn = self.lock_conn()?;
        get_issue_on_conn(&conn, id)
    }

    /// Retrieves multiple issues by their IDs.
    pub fn get_issues_by_ids_impl(&self, ids: &[String]) -> Result<Vec<Issue>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock_conn()?;
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id IN ({placeholders})");
        let mut stmt = conn.prepare(&sql)?;
        let params = rusqlite::params_from_iter(ids.iter());
        let rows = stmt.query_map(params, scan_issue)?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row?);
        }
        Ok(issues)
    }

    /// Applies partial updates to an issue.
    pub fn update_issue_impl(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        update_issue_on_conn(&conn, id, updates, actor)
    }

    /// Closes an issue.
    pub fn close_issue_impl(&self, id: &str, reason: &str, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        close_issue_on_conn(&conn, id, reason, actor)
    }

    /// Tombstones an issue.
    pub fn delete_issue_impl(&self, id: &str, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        delete_issue_on_conn(&conn, id, actor)
    }

    /// Rewrites an issue ID.
    pub fn update_issue_id_impl(&self, old_id: &str, new_id: &str, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        update_issue_id_on_conn(&conn, old_id, new_id, actor)
    }

    /// Searches issues by text query and filter.
    pub fn search_issues_impl(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>> {
        let conn = self.lock_conn()?;
        search_issues_on_conn(&conn, query, filter)
    }
}
