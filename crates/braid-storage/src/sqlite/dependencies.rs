//! Dependency CRUD, cycle rejection, and blocked-status maintenance for
//! [`SqliteStore`].

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Utc;
use rusqlite::{Connection, params};
use tracing::debug;

use braid_core::dependency::Dependency;
use braid_core::enums::{DependencyType, EventType};
use braid_core::issue::Issue;

use crate::error::{Result, StorageError};
use crate::sqlite::issues::{
    ISSUE_COLUMNS_PREFIXED, emit_event, format_datetime, parse_datetime, refresh_content_hash,
    scan_issue,
};
use crate::sqlite::store::SqliteStore;

/// Statuses that still gate readiness. Tombstones never block.
const UNCLOSED_SQL: &str = "'open', 'in_progress', 'blocked', 'deferred', 'pinned', 'hooked'";

// ---------------------------------------------------------------------------
// Connection-level helpers
// ---------------------------------------------------------------------------

/// Inserts a dependency, enforcing referential integrity and acyclicity of
/// the blocking subgraph, then recomputes the dependent's blocked status.
pub(crate) fn add_dependency_on_conn(
    conn: &Connection,
    dep: &Dependency,
    actor: &str,
) -> Result<()> {
    // Both endpoints must exist and not be tombstones.
    require_live_issue(conn, &dep.issue_id)?;
    require_live_issue(conn, &dep.depends_on_id)?;

    if dep.dep_type.affects_readiness() {
        if let Some(path) = find_cycle_path(conn, &dep.issue_id, &dep.depends_on_id)? {
            return Err(StorageError::CycleDetected { path });
        }
    }

    let now = Utc::now();
    let now_str = format_datetime(&now);

    conn.execute(
        "INSERT OR REPLACE INTO dependencies
         (issue_id, depends_on_id, type, created_at, created_by)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            dep.issue_id,
            dep.depends_on_id,
            dep.dep_type.as_str(),
            format_datetime(&dep.created_at),
            dep.created_by,
        ],
    )?;

    emit_event(
        conn,
        &dep.issue_id,
        EventType::DependencyAdded,
        actor,
        None,
        Some(&format!("{} ({})", dep.depends_on_id, dep.dep_type)),
        &now_str,
    )?;

    refresh_content_hash(conn, &dep.issue_id)?;
    if dep.dep_type.affects_readiness() {
        recompute_blocked_status(conn, &dep.issue_id, actor)?;
    }

    Ok(())
}

/// Removes a dependency edge and recomputes the dependent's blocked status.
pub(crate) fn remove_dependency_on_conn(
    conn: &Connection,
    issue_id: &str,
    depends_on_id: &str,
    actor: &str,
) -> Result<()> {
    let now = Utc::now();
    let now_str = format_datetime(&now);

    let affected = conn.execute(
        "DELETE FROM dependencies WHERE issue_id = ?1 AND depends_on_id = ?2",
        params![issue_id, depends_on_id],
    )?;

    if affected == 0 {
        return Err(StorageError::not_found(
            "dependency",
            format!("{issue_id} -> {depends_on_id}"),
        ));
    }

    emit_event(
        conn,
        issue_id,
        EventType::DependencyRemoved,
        actor,
        Some(depends_on_id),
        None,
        &now_str,
    )?;

    refresh_content_hash(conn, issue_id)?;
    recompute_blocked_status(conn, issue_id, actor)?;

    Ok(())
}

/// Returns raw dependency records for an issue.
pub(crate) fn get_dependency_records_on_conn(
    conn: &Connection,
    issue_id: &str,
) -> Result<Vec<Dependency>> {
    let mut stmt = conn.prepare(
        "SELECT issue_id, depends_on_id, type, created_at, created_by
         FROM dependencies WHERE issue_id = ?1 ORDER BY depends_on_id",
    )?;
    let rows = stmt.query_map(params![issue_id], scan_dependency)?;

    let mut deps = Vec::new();
    for row in rows {
        deps.push(row?);
    }
    Ok(deps)
}

/// Returns every dependency record in the store.
pub(crate) fn get_all_dependency_records_on_conn(conn: &Connection) -> Result<Vec<Dependency>> {
    let mut stmt = conn.prepare(
        "SELECT issue_id, depends_on_id, type, created_at, created_by
         FROM dependencies ORDER BY issue_id, depends_on_id",
    )?;
    let rows = stmt.query_map([], scan_dependency)?;

    let mut deps = Vec::new();
    for row in rows {
        deps.push(row?);
    }
    Ok(deps)
}

fn scan_dependency(row: &rusqlite::Row<'_>) -> rusqlite::Result<Dependency> {
    Ok(Dependency {
        issue_id: row.get("issue_id")?,
        depends_on_id: row.get("depends_on_id")?,
        dep_type: DependencyType::from(row.get::<_, String>("type")?),
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
        created_by: row.get("created_by")?,
    })
}

fn require_live_issue(conn: &Connection, id: &str) -> Result<()> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM issues WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(StorageError::from(other)),
        })?;
    match status.as_deref() {
        None => Err(StorageError::not_found("issue", id)),
        Some("tombstone") => Err(StorageError::not_found("issue", id)),
        Some(_) => Ok(()),
    }
}

/// Replaces an issue's outgoing edges with the given set, without events.
///
/// Blocking edges that would close a cycle are dropped and reported as
/// warnings. Used by import, where the mirror is authoritative and
/// per-edge audit entries would fabricate history.
pub(crate) fn import_dependencies_on_conn(
    conn: &Connection,
    issue_id: &str,
    deps: &[Dependency],
) -> Result<Vec<String>> {
    conn.execute(
        "DELETE FROM dependencies WHERE issue_id = ?1",
        params![issue_id],
    )?;

    let mut warnings = Vec::new();
    for dep in deps {
        let mut dep = dep.clone();
        if dep.issue_id.is_empty() {
            dep.issue_id = issue_id.to_owned();
        }
        if dep.dep_type.affects_readiness() {
            if let Some(path) = find_cycle_path(conn, &dep.issue_id, &dep.depends_on_id)? {
                warnings.push(format!(
                    "cycle: dropped edge {} -> {} ({})",
                    dep.issue_id,
                    dep.depends_on_id,
                    path.join(" -> ")
                ));
                continue;
            }
        }
        conn.execute(
            "INSERT OR REPLACE INTO dependencies
             (issue_id, depends_on_id, type, created_at, created_by)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                dep.issue_id,
                dep.depends_on_id,
                dep.dep_type.as_str(),
                format_datetime(&dep.created_at),
                dep.created_by,
            ],
        )?;
    }

    refresh_content_hash(conn, issue_id)?;
    Ok(warnings)
}

// ---------------------------------------------------------------------------
// Cycle detection
// ---------------------------------------------------------------------------

/// Finds the cycle that adding `issue_id -> depends_on_id` would close.
///
/// BFS from the prospective dependee through outgoing blocking edges with
/// predecessor tracking; if `issue_id` is reachable the new edge closes a
/// loop, and the returned path follows dependency direction:
/// `[issue_id, depends_on_id, ..., issue_id]`.
fn find_cycle_path(
    conn: &Connection,
    issue_id: &str,
    depends_on_id: &str,
) -> Result<Option<Vec<String>>> {
    if issue_id == depends_on_id {
        return Ok(Some(vec![issue_id.to_owned(), issue_id.to_owned()]));
    }

    let mut predecessor: HashMap<String, String> = HashMap::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    visited.insert(depends_on_id.to_owned());
    queue.push_back(depends_on_id.to_owned());

    let sql = format!(
        "SELECT depends_on_id FROM dependencies
         WHERE issue_id = ?1 AND type IN ({})",
        DependencyType::blocking_sql_list()
    );

    while let Some(current) = queue.pop_front() {
        if current == issue_id {
            // Walk predecessors back to the dependee, reverse, and lead with
            // the new edge.
            let mut chain = vec![issue_id.to_owned()];
            let mut node = issue_id.to_owned();
            while let Some(prev) = predecessor.get(&node).cloned() {
                chain.push(prev.clone());
                node = prev;
            }
            chain.reverse();

            let mut path = Vec::with_capacity(chain.len() + 1);
            path.push(issue_id.to_owned());
            path.extend(chain);
            return Ok(Some(path));
        }

        let mut stmt = conn.prepare_cached(&sql)?;
        let nexts: Vec<String> = stmt
            .query_map(params![current], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<_, _>>()?;

        for next in nexts {
            if visited.insert(next.clone()) {
                predecessor.insert(next.clone(), current.clone());
                queue.push_back(next);
            }
        }
    }

    Ok(None)
}

// ---------------------------------------------------------------------------
// Blocked-status maintenance
// ---------------------------------------------------------------------------

/// Number of unclosed blocking dependees of an issue.
pub(crate) fn count_open_blockers(conn: &Connection, issue_id: &str) -> Result<i64> {
    let sql = format!(
        "SELECT COUNT(*) FROM dependencies d
         INNER JOIN issues blocker ON blocker.id = d.depends_on_id
         WHERE d.issue_id = ?1
           AND d.type IN ({})
           AND blocker.status IN ({UNCLOSED_SQL})",
        DependencyType::blocking_sql_list()
    );
    Ok(conn.query_row(&sql, params![issue_id], |row| row.get(0))?)
}

/// Re-establishes the blocked-status invariant for one issue: open or
/// in_progress with an unclosed blocking dependee becomes blocked; blocked
/// with none becomes open. Transitions append `status_changed` events.
pub(crate) fn recompute_blocked_status(
    conn: &Connection,
    issue_id: &str,
    actor: &str,
) -> Result<()> {
    let status: String = match conn.query_row(
        "SELECT status FROM issues WHERE id = ?1",
        params![issue_id],
        |row| row.get(0),
    ) {
        Ok(s) => s,
        Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let blockers = count_open_blockers(conn, issue_id)?;
    let new_status = match (status.as_str(), blockers > 0) {
        ("open" | "in_progress", true) => Some("blocked"),
        ("blocked", false) => Some("open"),
        _ => None,
    };

    if let Some(new_status) = new_status {
        debug!(issue_id, from = %status, to = %new_status, "blocked status recomputed");
        let now_str = format_datetime(&Utc::now());
        conn.execute(
            "UPDATE issues SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![new_status, now_str, issue_id],
        )?;
        emit_event(
            conn,
            issue_id,
            EventType::StatusChanged,
            actor,
            Some(&status),
            Some(new_status),
            &now_str,
        )?;
        refresh_content_hash(conn, issue_id)?;
    }

    Ok(())
}

/// Recomputes blocked status for every issue that depends (blocking) on the
/// given one. Called after closures, reopens, and tombstoning.
pub(crate) fn recompute_dependents_on_conn(
    conn: &Connection,
    issue_id: &str,
    actor: &str,
) -> Result<()> {
    let sql = format!(
        "SELECT issue_id FROM dependencies
         WHERE depends_on_id = ?1 AND type IN ({})",
        DependencyType::blocking_sql_list()
    );
    let dependents: Vec<String> = {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![issue_id], |row| row.get::<_, String>(0))?;
        rows.collect::<std::result::Result<_, _>>()?
    };

    for dependent in dependents {
        recompute_blocked_status(conn, &dependent, actor)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// SqliteStore methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    /// Adds a dependency edge.
    pub fn add_dependency_impl(&self, dep: &Dependency, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        add_dependency_on_conn(&conn, dep, actor)
    }

    /// Removes a dependency edge.
    pub fn remove_dependency_impl(
        &self,
        issue_id: &str,
        depends_on_id: &str,
        actor: &str,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        remove_dependency_on_conn(&conn, issue_id, depends_on_id, actor)
    }

    /// Returns issues that the given issue depends on.
    pub fn get_dependencies_impl(&self, issue_id: &str) -> Result<Vec<Issue>> {
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {ISSUE_COLUMNS_PREFIXED} FROM issues
             INNER JOIN dependencies d ON issues.id = d.depends_on_id
             WHERE d.issue_id = ?1
             ORDER BY issues.id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![issue_id], scan_issue)?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row?);
        }
        Ok(issues)
    }

    /// Returns issues that depend on the given issue.
    pub fn get_dependents_impl(&self, issue_id: &str) -> Result<Vec<Issue>> {
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {ISSUE_COLUMNS_PREFIXED} FROM issues
             INNER JOIN dependencies d ON issues.id = d.issue_id
             WHERE d.depends_on_id = ?1
             ORDER BY issues.id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![issue_id], scan_issue)?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row?);
        }
        Ok(issues)
    }

    /// Returns raw dependency records for one issue.
    pub fn get_dependency_records_impl(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        let conn = self.lock_conn()?;
        get_dependency_records_on_conn(&conn, issue_id)
    }

    /// Returns every dependency record in the store.
    pub fn get_all_dependency_records_impl(&self) -> Result<Vec<Dependency>> {
        let conn = self.lock_conn()?;
        get_all_dependency_records_on_conn(&conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_core::enums::Status;
    use braid_core::issue::IssueBuilder;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn create(store: &SqliteStore, id: &str) {
        let issue = IssueBuilder::new(format!("issue {id}")).id(id).build();
        store.create_issue_impl(&issue, "alice").unwrap();
    }

    fn dep(issue_id: &str, depends_on_id: &str) -> Dependency {
        Dependency {
            issue_id: issue_id.into(),
            depends_on_id: depends_on_id.into(),
            dep_type: DependencyType::Blocks,
            created_at: Utc::now(),
            created_by: "alice".into(),
        }
    }

    #[test]
    fn add_and_get_dependency() {
        let store = test_store();
        create(&store, "br-p1");
        create(&store, "br-c1");

        store.add_dependency_impl(&dep("br-c1", "br-p1"), "alice").unwrap();

        let deps = store.get_dependencies_impl("br-c1").unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].id, "br-p1");

        let dependents = store.get_dependents_impl("br-p1").unwrap();
        assert_eq!(dependents.len(), 1);
        assert_eq!(dependents[0].id, "br-c1");
    }

    #[test]
    fn dangling_reference_rejected() {
        let store = test_store();
        create(&store, "br-a");
        let err = store
            .add_dependency_impl(&dep("br-a", "br-ghost"), "alice")
            .unwrap_err();
        assert!(err.is_not_found());

        let err = store
            .add_dependency_impl(&dep("br-ghost", "br-a"), "alice")
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn blocking_edge_flips_dependent_to_blocked() {
        let store = test_store();
        create(&store, "br-b1");
        create(&store, "br-b2");

        store.add_dependency_impl(&dep("br-b2", "br-b1"), "alice").unwrap();
        assert_eq!(
            store.get_issue_impl("br-b2").unwrap().status,
            Status::Blocked
        );

        // Removing the edge unblocks.
        store
            .remove_dependency_impl("br-b2", "br-b1", "alice")
            .unwrap();
        assert_eq!(store.get_issue_impl("br-b2").unwrap().status, Status::Open);
    }

    #[test]
    fn closing_blocker_unblocks_dependent() {
        let store = test_store();
        create(&store, "br-k1");
        create(&store, "br-k2");
        store.add_dependency_impl(&dep("br-k2", "br-k1"), "alice").unwrap();
        assert_eq!(store.get_issue_impl("br-k2").unwrap().status, Status::Blocked);

        store.close_issue_impl("br-k1", "done", "alice").unwrap();
        assert_eq!(store.get_issue_impl("br-k2").unwrap().status, Status::Open);
    }

    #[test]
    fn non_blocking_edge_leaves_status_alone() {
        let store = test_store();
        create(&store, "br-r1");
        create(&store, "br-r2");
        let related = Dependency {
            dep_type: DependencyType::Related,
            ..dep("br-r2", "br-r1")
        };
        store.add_dependency_impl(&related, "alice").unwrap();
        assert_eq!(store.get_issue_impl("br-r2").unwrap().status, Status::Open);
    }

    #[test]
    fn cycle_rejected_with_path_and_no_mutation() {
        let store = test_store();
        create(&store, "x-1");
        create(&store, "x-2");
        create(&store, "x-3");

        store.add_dependency_impl(&dep("x-2", "x-1"), "alice").unwrap();
        store.add_dependency_impl(&dep("x-3", "x-2"), "alice").unwrap();

        let events_before: i64 = {
            let conn = store.lock_conn().unwrap();
            conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))
                .unwrap()
        };

        let err = store.add_dependency_impl(&dep("x-1", "x-3"), "alice").unwrap_err();
        match err {
            StorageError::CycleDetected { path } => {
                assert_eq!(path, vec!["x-1", "x-3", "x-2", "x-1"]);
            }
            other => panic!("expected cycle, got {:?}", other),
        }

        // No edge, no event.
        assert!(store.get_dependency_records_impl("x-1").unwrap().is_empty());
        let events_after: i64 = {
            let conn = store.lock_conn().unwrap();
            conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))
                .unwrap()
        };
        assert_eq!(events_before, events_after);
    }

    #[test]
    fn self_dependency_rejected() {
        let store = test_store();
        create(&store, "br-self");
        let err = store
            .add_dependency_impl(&dep("br-self", "br-self"), "alice")
            .unwrap_err();
        assert!(matches!(err, StorageError::CycleDetected { .. }));
    }

    #[test]
    fn all_dependency_records() {
        let store = test_store();
        create(&store, "br-m1");
        create(&store, "br-m2");
        create(&store, "br-m3");
        store.add_dependency_impl(&dep("br-m2", "br-m1"), "alice").unwrap();
        store.add_dependency_impl(&dep("br-m3", "br-m1"), "alice").unwrap();

        let all = store.get_all_dependency_records_impl().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].issue_id, "br-m2");
        assert_eq!(all[1].issue_id, "br-m3");
    }
}
