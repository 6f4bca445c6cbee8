//! Complex queries for [`SqliteStore`]: ready work, blocked issues,
//! statistics, audit reads, and batch ingest.

use rusqlite::params;
use tracing::warn;

use braid_core::comment::Event;
use braid_core::enums::{DependencyType, EventType};
use braid_core::filter::WorkFilter;
use braid_core::issue::Issue;

use crate::error::{Result, StorageError};
use crate::sqlite::dependencies::add_dependency_on_conn;
use crate::sqlite::issues::{
    ISSUE_COLUMNS, insert_issue, parse_datetime, refresh_content_hash, scan_issue,
};
use crate::sqlite::labels::set_labels_on_conn;
use crate::sqlite::store::SqliteStore;
use crate::traits::{BatchOptions, BatchResult, BlockedIssue, OrphanMode, Statistics};

/// Statuses that still gate readiness; mirrors the dependency module.
const UNCLOSED_SQL: &str = "'open', 'in_progress', 'blocked', 'deferred', 'pinned', 'hooked'";

impl SqliteStore {
    /// Returns issues that are ready to work on.
    ///
    /// Ready means: status open or in_progress, no unclosed blocking
    /// dependee, and not ephemeral (unless asked for). Stable order:
    /// (priority asc, created_at asc, id asc).
    pub fn get_ready_work_impl(&self, filter: &WorkFilter) -> Result<Vec<Issue>> {
        let conn = self.lock_conn()?;

        let mut where_clauses: Vec<String> =
            vec!["i.status IN ('open', 'in_progress')".to_owned()];
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut param_idx = 1;

        where_clauses.push(format!(
            "NOT EXISTS (
                SELECT 1 FROM dependencies d
                INNER JOIN issues blocker ON blocker.id = d.depends_on_id
                WHERE d.issue_id = i.id
                  AND d.type IN ({})
                  AND blocker.status IN ({UNCLOSED_SQL})
            )",
            DependencyType::blocking_sql_list()
        ));

        if !filter.include_ephemeral {
            where_clauses.push("i.ephemeral = 0".to_owned());
        }

        if let Some(ref issue_type) = filter.issue_type {
            where_clauses.push(format!("i.issue_type = ?{param_idx}"));
            param_values.push(Box::new(issue_type.as_str().to_owned()));
            param_idx += 1;
        }
        if let Some(priority) = filter.priority {
            where_clauses.push(format!("i.priority = ?{param_idx}"));
            param_values.push(Box::new(priority));
            param_idx += 1;
        }
        if let Some(ref assignee) = filter.assignee {
            where_clauses.push(format!("i.assignee = ?{param_idx}"));
            param_values.push(Box::new(assignee.clone()));
            param_idx += 1;
        }
        if filter.unassigned {
            where_clauses.push("(i.assignee IS NULL OR i.assignee = '')".to_owned());
        }
        for label in &filter.labels {
            where_clauses.push(format!(
                "EXISTS (SELECT 1 FROM labels WHERE labels.issue_id = i.id AND labels.label = ?{param_idx})"
            ));
            param_values.push(Box::new(label.clone()));
            param_idx += 1;
        }

        let where_sql = where_clauses.join(" AND ");

        let order_sql = match filter.sort_policy {
            braid_core::enums::SortPolicy::Oldest => "i.created_at ASC, i.id ASC",
            _ => "i.priority ASC, i.created_at ASC, i.id ASC",
        };

        let limit_sql = filter
            .limit
            .map(|l| format!(" LIMIT {l}"))
            .unwrap_or_default();

        let sql = format!(
            "SELECT {ISSUE_COLUMNS} FROM issues i WHERE {where_sql} ORDER BY {order_sql}{limit_sql}"
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

    /// Returns unclosed issues with at least one unclosed blocking dependee,
    /// each with its sorted blocker list.
    pub fn get_blocked_issues_impl(&self, filter: &WorkFilter) -> Result<Vec<BlockedIssue>> {
        let conn = self.lock_conn()?;

        let mut where_clauses: Vec<String> =
            vec![format!("i.status IN ({UNCLOSED_SQL})")];
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut param_idx = 1;

        where_clauses.push(format!(
            "EXISTS (
                SELECT 1 FROM dependencies d
                INNER JOIN issues blocker ON blocker.id = d.depends_on_id
                WHERE d.issue_id = i.id
                  AND d.type IN ({})
                  AND blocker.status IN ({UNCLOSED_SQL})
            )",
            DependencyType::blocking_sql_list()
        ));

        if !filter.include_ephemeral {
            where_clauses.push("i.ephemeral = 0".to_owned());
        }
        if let Some(ref assignee) = filter.assignee {
            where_clauses.push(format!("i.assignee = ?{param_idx}"));
            param_values.push(Box::new(assignee.clone()));
            param_idx += 1;
        }
        if let Some(priority) = filter.priority {
            where_clauses.push(format!("i.priority = ?{param_idx}"));
            param_values.push(Box::new(priority));
            param_idx += 1;
        }

        let where_sql = where_clauses.join(" AND ");
        let limit_sql = filter
            .limit
            .map(|l| format!(" LIMIT {l}"))
            .unwrap_or_default();

        let sql = format!(
            "SELECT {ISSUE_COLUMNS} FROM issues i WHERE {where_sql}
             ORDER BY i.priority ASC, i.created_at ASC, i.id ASC{limit_sql}"
        );

        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();

        let issues: Vec<Issue> = {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(param_refs.as_slice(), scan_issue)?;
            rows.collect::<std::result::Result<_, _>>()?
        };

        let blocker_sql = format!(
            "SELECT d.depends_on_id FROM dependencies d
             INNER JOIN issues blocker ON blocker.id = d.depends_on_id
             WHERE d.issue_id = ?1
               AND d.type IN ({})
               AND blocker.status IN ({UNCLOSED_SQL})
             ORDER BY d.depends_on_id",
            DependencyType::blocking_sql_list()
        );

        let mut result = Vec::with_capacity(issues.len());
        for issue in issues {
            let mut stmt = conn.prepare_cached(&blocker_sql)?;
            let blocked_by: Vec<String> = stmt
                .query_map(params![issue.id], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<_, _>>()?;
            result.push(BlockedIssue { issue, blocked_by });
        }

        let _ = param_idx;
        Ok(result)
    }

    /// Returns aggregate statistics.
    pub fn get_statistics_impl(&self) -> Result<Statistics> {
        let conn = self.lock_conn()?;
        let mut stats = Statistics::default();

        let count_where = |clause: &str| -> Result<i64> {
            Ok(conn.query_row(
                &format!("SELECT COUNT(*) FROM issues {clause}"),
                [],
                |row| row.get(0),
            )?)
        };

        stats.total_issues = count_where("WHERE status != 'tombstone'")?;
        stats.open_issues = count_where("WHERE status = 'open'")?;
        stats.in_progress_issues = count_where("WHERE status = 'in_progress'")?;
        stats.blocked_issues = count_where("WHERE status = 'blocked'")?;
        stats.closed_issues = count_where("WHERE status = 'closed'")?;
        stats.deferred_issues = count_where("WHERE status = 'deferred'")?;
        stats.tombstones = count_where("WHERE status = 'tombstone'")?;

        {
            let mut stmt = conn.prepare(
                "SELECT issue_type, COUNT(*) FROM issues WHERE status != 'tombstone'
                 GROUP BY issue_type ORDER BY COUNT(*) DESC, issue_type",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                stats.by_type.push(row?);
            }
        }

        {
            let mut stmt = conn.prepare(
                "SELECT priority, COUNT(*) FROM issues WHERE status != 'tombstone'
                 GROUP BY priority ORDER BY priority ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, i32>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                stats.by_priority.push(row?);
            }
        }

        {
            let mut stmt = conn.prepare(
                "SELECT COALESCE(NULLIF(assignee, ''), '(unassigned)'), COUNT(*)
                 FROM issues
                 WHERE status NOT IN ('closed', 'tombstone')
                 GROUP BY assignee
                 ORDER BY COUNT(*) DESC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                stats.by_assignee.push(row?);
            }
        }

        Ok(stats)
    }

    /// Returns recent events for an issue, newest first.
    pub fn get_events_impl(&self, issue_id: &str, limit: i32) -> Result<Vec<Event>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, issue_id, event_type, actor, old_value, new_value, created_at
             FROM events WHERE issue_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![issue_id, limit], scan_event)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// Returns all events with id > `since_id`, in commit order.
    pub fn get_all_events_since_impl(&self, since_id: i64) -> Result<Vec<Event>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, issue_id, event_type, actor, old_value, new_value, created_at
             FROM events WHERE id > ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![since_id], scan_event)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// Creates multiple issues with embedded labels and dependency edges in a
    /// single transaction.
    ///
    /// Edges whose target is absent from both the store and the batch are
    /// handled per [`OrphanMode`]: dropped (Allow/Warn) or fatal (Fail).
    pub fn create_issues_impl(
        &self,
        issues: &[Issue],
        actor: &str,
        options: BatchOptions,
    ) -> Result<BatchResult> {
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StorageError::Transaction(format!("failed to begin: {e}")))?;

        let mut result = BatchResult::default();

        // Issues first, so edges between batch members resolve.
        for issue in issues {
            insert_issue(&tx, issue, actor)?;
            if !issue.labels.is_empty() {
                set_labels_on_conn(&tx, &issue.id, &issue.labels)?;
            }
            result.created += 1;
        }

        for issue in issues {
            for dep in &issue.dependencies {
                let mut dep = dep.clone();
                if dep.issue_id.is_empty() {
                    dep.issue_id = issue.id.clone();
                }
                let target_exists: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM issues WHERE id = ?1 AND status != 'tombstone')",
                    params![dep.depends_on_id],
                    |row| row.get(0),
                )?;
                if !target_exists {
                    match options.orphan_mode {
                        OrphanMode::Fail => {
                            return Err(StorageError::not_found("issue", &dep.depends_on_id));
                        }
                        OrphanMode::Allow | OrphanMode::Warn => {
                            warn!(
                                issue = %dep.issue_id,
                                target = %dep.depends_on_id,
                                "dropping dependency on missing issue"
                            );
                            result
                                .orphaned_edges
                                .push((dep.issue_id.clone(), dep.depends_on_id.clone()));
                            continue;
                        }
                    }
                }
                add_dependency_on_conn(&tx, &dep, actor)?;
            }
            // Labels and surviving edges are part of the stored hash.
            refresh_content_hash(&tx, &issue.id)?;
        }

        tx.commit()
            .map_err(|e| StorageError::Transaction(format!("failed to commit: {e}")))?;
        Ok(result)
    }
}

fn scan_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get("id")?,
        issue_id: row.get("issue_id")?,
        event_type: EventType::from(row.get::<_, String>("event_type")?),
        actor: row.get("actor")?,
        old_value: row.get("old_value")?,
        new_value: row.get("new_value")?,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
    })
}
