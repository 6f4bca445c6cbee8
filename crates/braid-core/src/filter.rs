//! Filter types for querying issues.

use chrono::{DateTime, Utc};

use crate::enums::{IssueType, SortPolicy, Status};

/// Filter for issue list/search queries.
#[derive(Debug, Clone, Default)]
pub struct IssueFilter {
    pub status: Option<Status>,
    pub priority: Option<i32>,
    pub issue_type: Option<IssueType>,
    pub assignee: Option<String>,

    /// AND semantics: issue must have ALL these labels.
    pub labels: Vec<String>,
    /// OR semantics: issue must have AT LEAST ONE of these labels.
    pub labels_any: Vec<String>,

    /// Filter by specific issue IDs.
    pub ids: Vec<String>,

    pub title_contains: Option<String>,
    pub description_contains: Option<String>,

    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub updated_after: Option<DateTime<Utc>>,
    pub updated_before: Option<DateTime<Utc>>,

    pub no_assignee: bool,

    /// Filter by ephemeral flag (None = any).
    pub ephemeral: Option<bool>,

    /// Exclude issues with these statuses.
    pub exclude_status: Vec<Status>,

    pub limit: Option<i32>,
}

/// Filter for ready/blocked work queries.
#[derive(Debug, Clone, Default)]
pub struct WorkFilter {
    pub issue_type: Option<IssueType>,
    pub priority: Option<i32>,
    pub assignee: Option<String>,
    /// Filter for issues with no assignee.
    pub unassigned: bool,

    /// AND semantics: issue must have ALL these labels.
    pub labels: Vec<String>,

    /// If true, include ephemeral issues.
    pub include_ephemeral: bool,

    pub limit: Option<i32>,
    pub sort_policy: SortPolicy,
}
