//! Storage and Transaction traits -- the public API for issue persistence.
//!
//! Consumers depend on these traits rather than on concrete implementations
//! so that backends (SQLite, in-memory) can be substituted per workspace.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use braid_core::comment::{Comment, Event};
use braid_core::dependency::Dependency;
use braid_core::enums::{IssueType, Status};
use braid_core::filter::{IssueFilter, WorkFilter};
use braid_core::issue::Issue;

use crate::error::Result;

// ---------------------------------------------------------------------------
// View / helper types
// ---------------------------------------------------------------------------

/// Typed partial-update struct for issues.
///
/// Only `Some` fields are applied; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct IssueUpdates {
    pub title: Option<String>,
    pub description: Option<String>,
    pub design: Option<String>,
    pub acceptance_criteria: Option<String>,
    pub notes: Option<String>,
    pub status: Option<Status>,
    pub priority: Option<i32>,
    pub issue_type: Option<IssueType>,
    pub assignee: Option<String>,
    pub spec_id: Option<String>,
    pub close_reason: Option<String>,
    pub ephemeral: Option<bool>,
    /// Outer `Some` means "update"; inner `Option` is the new value.
    pub estimated_minutes: Option<Option<i32>>,
    pub compaction_level: Option<i32>,
    pub spec_changed_at: Option<Option<DateTime<Utc>>>,
}

impl IssueUpdates {
    /// Returns `true` when no field is set.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.design.is_none()
            && self.acceptance_criteria.is_none()
            && self.notes.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.issue_type.is_none()
            && self.assignee.is_none()
            && self.spec_id.is_none()
            && self.close_reason.is_none()
            && self.ephemeral.is_none()
            && self.estimated_minutes.is_none()
            && self.compaction_level.is_none()
            && self.spec_changed_at.is_none()
    }
}

/// How batch ingest treats dependency edges whose target does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrphanMode {
    /// Drop the dangling edge, keep the issue, log a warning.
    Allow,
    /// Keep the issue, drop the edge, record it in the result.
    #[default]
    Warn,
    /// Abort the whole batch.
    Fail,
}

/// Options for [`Storage::create_issues`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
    pub orphan_mode: OrphanMode,
}

/// Outcome of a batch ingest.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub created: usize,
    /// Edges dropped because their target did not exist.
    pub orphaned_edges: Vec<(String, String)>,
}

/// An issue that is blocked, along with its open blockers.
#[derive(Debug, Clone)]
pub struct BlockedIssue {
    /// The blocked issue.
    pub issue: Issue,
    /// IDs of the unclosed blocking dependees, sorted ascending.
    pub blocked_by: Vec<String>,
}

/// Aggregate statistics about the issue store.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    pub total_issues: i64,
    pub open_issues: i64,
    pub in_progress_issues: i64,
    pub blocked_issues: i64,
    pub closed_issues: i64,
    pub deferred_issues: i64,
    pub tombstones: i64,

    /// Breakdown by issue type: `(type_name, count)`.
    pub by_type: Vec<(String, i64)>,
    /// Breakdown by priority: `(priority, count)`.
    pub by_priority: Vec<(i32, i64)>,
    /// Breakdown by assignee: `(assignee, count)`.
    pub by_assignee: Vec<(String, i64)>,
}

// ---------------------------------------------------------------------------
// Storage trait
// ---------------------------------------------------------------------------

/// Primary storage interface for issue persistence.
///
/// Readers may run in parallel; writers serialize per workspace. Writes are
/// durable before they return.
pub trait Storage: Send + Sync {
    // -- Issue CRUD ----------------------------------------------------------

    /// Creates a new issue and appends a "created" event. The caller supplies
    /// a minted, prefix-valid ID.
    fn create_issue(&self, issue: &Issue, actor: &str) -> Result<()>;

    /// Creates multiple issues (with embedded labels and dependency edges) in
    /// a single transaction.
    fn create_issues(
        &self,
        issues: &[Issue],
        actor: &str,
        options: BatchOptions,
    ) -> Result<BatchResult>;

    /// Retrieves an issue by its ID.
    fn get_issue(&self, id: &str) -> Result<Issue>;

    /// Retrieves multiple issues by their IDs.
    fn get_issues_by_ids(&self, ids: &[String]) -> Result<Vec<Issue>>;

    /// Applies partial updates, appending one event per changed field.
    fn update_issue(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()>;

    /// Closes an issue (status=closed, closed_at=now), appends a "closed"
    /// event, and recomputes dependents' blocked status.
    fn close_issue(&self, id: &str, reason: &str, actor: &str) -> Result<()>;

    /// Tombstones an issue: the ID stays reserved so an import cannot
    /// resurrect it. Appends a "deleted" event.
    fn delete_issue(&self, id: &str, actor: &str) -> Result<()>;

    /// Rewrites an issue's ID in place (issues, edges, labels, comments,
    /// events). Used by external prefix-rename tooling.
    fn update_issue_id(&self, old_id: &str, new_id: &str, actor: &str) -> Result<()>;

    /// Searches issues by text query and optional filter.
    fn search_issues(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>>;

    // -- Dependencies --------------------------------------------------------

    /// Adds a dependency edge. Enforces referential integrity and rejects
    /// blocking edges that would close a cycle, reporting the path.
    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()>;

    /// Removes a dependency edge.
    fn remove_dependency(&self, issue_id: &str, depends_on_id: &str, actor: &str) -> Result<()>;

    /// Returns the issues that the given issue depends on.
    fn get_dependencies(&self, issue_id: &str) -> Result<Vec<Issue>>;

    /// Returns the issues that depend on the given issue.
    fn get_dependents(&self, issue_id: &str) -> Result<Vec<Issue>>;

    /// Returns raw dependency records for one issue.
    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>>;

    /// Returns every dependency record in the store.
    fn get_all_dependency_records(&self) -> Result<Vec<Dependency>>;

    // -- Labels --------------------------------------------------------------

    /// Adds a label to an issue.
    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;

    /// Removes a label from an issue.
    fn remove_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;

    /// Returns all labels for an issue.
    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>>;

    // -- Work queries --------------------------------------------------------

    /// Returns issues ready to work on, ordered (priority asc, created_at
    /// asc, id asc).
    fn get_ready_work(&self, filter: &WorkFilter) -> Result<Vec<Issue>>;

    /// Returns unclosed issues with at least one unclosed blocking dependee.
    fn get_blocked_issues(&self, filter: &WorkFilter) -> Result<Vec<BlockedIssue>>;

    // -- Comments and events -------------------------------------------------

    /// Adds a comment and returns it.
    fn add_comment(&self, issue_id: &str, author: &str, text: &str) -> Result<Comment>;

    /// Returns all comments for an issue.
    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>>;

    /// Returns recent events for an issue, newest first.
    fn get_events(&self, issue_id: &str, limit: i32) -> Result<Vec<Event>>;

    /// Returns all events with id > `since_id`, in commit order.
    fn get_all_events_since(&self, since_id: i64) -> Result<Vec<Event>>;

    // -- Statistics ----------------------------------------------------------

    /// Returns aggregate statistics about the issue store.
    fn get_statistics(&self) -> Result<Statistics>;

    // -- Configuration and metadata ------------------------------------------

    /// Sets a workspace configuration key-value pair.
    fn set_config(&self, key: &str, value: &str) -> Result<()>;

    /// Gets a configuration value by key.
    fn get_config(&self, key: &str) -> Result<String>;

    /// Returns all configuration key-value pairs.
    fn get_all_config(&self) -> Result<HashMap<String, String>>;

    /// Sets a metadata key-value pair (sync bookkeeping).
    fn set_metadata(&self, key: &str, value: &str) -> Result<()>;

    /// Gets a metadata value by key.
    fn get_metadata(&self, key: &str) -> Result<String>;

    /// Increments and returns the sequential-ID counter.
    fn next_sequence(&self) -> Result<u64>;

    // -- Transactions --------------------------------------------------------

    /// Executes a closure within a transaction: commit on `Ok`, roll back on
    /// `Err` (no events are appended for a rolled-back transaction).
    fn run_in_transaction(&self, f: &dyn Fn(&dyn Transaction) -> Result<()>) -> Result<()>;

    // -- Lifecycle -----------------------------------------------------------

    /// Closes the store and releases resources.
    fn close(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Transaction trait
// ---------------------------------------------------------------------------

/// Subset of [`Storage`] available inside a transaction.
///
/// All operations share one connection and commit or roll back atomically.
pub trait Transaction {
    fn create_issue(&self, issue: &Issue, actor: &str) -> Result<()>;
    fn update_issue(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()>;
    fn close_issue(&self, id: &str, reason: &str, actor: &str) -> Result<()>;
    fn delete_issue(&self, id: &str, actor: &str) -> Result<()>;
    fn get_issue(&self, id: &str) -> Result<Issue>;
    fn search_issues(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>>;

    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()>;
    fn remove_dependency(&self, issue_id: &str, depends_on_id: &str, actor: &str) -> Result<()>;
    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>>;

    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;
    fn remove_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;
    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>>;

    fn set_config(&self, key: &str, value: &str) -> Result<()>;
    fn get_config(&self, key: &str) -> Result<String>;
    fn set_metadata(&self, key: &str, value: &str) -> Result<()>;
    fn get_metadata(&self, key: &str) -> Result<String>;

    fn add_comment(&self, issue_id: &str, author: &str, text: &str) -> Result<Comment>;
    fn import_comment(
        &self,
        issue_id: &str,
        author: &str,
        text: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Comment>;
    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>>;

    // -- Import upserts ------------------------------------------------------

    /// Upserts an issue from a mirror record, preserving its timestamps
    /// verbatim. A new row appends a "created" event; a changed row appends a
    /// single "imported" event. Labels are replaced wholesale; dependency
    /// edges are reconciled separately via [`Transaction::import_dependencies`].
    fn import_issue(&self, issue: &Issue, actor: &str) -> Result<()>;

    /// Replaces an issue's outgoing dependency edges with the given set,
    /// without events. Blocking edges that would close a cycle are dropped;
    /// each drop is reported in the returned warnings.
    fn import_dependencies(&self, issue_id: &str, deps: &[Dependency]) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn updates_is_empty() {
        assert!(IssueUpdates::default().is_empty());
        let u = IssueUpdates {
            title: Some("x".into()),
            ..Default::default()
        };
        assert!(!u.is_empty());
    }

    #[test]
    fn orphan_mode_default_is_warn() {
        assert_eq!(OrphanMode::default(), OrphanMode::Warn);
    }
}
