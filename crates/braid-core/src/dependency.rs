//! Dependency edges -- directed relationships between issues.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::DependencyType;

/// A directed edge from a dependent issue to the issue it depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// The dependent issue (the edge source).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub issue_id: String,

    /// The dependee (the edge target).
    pub depends_on_id: String,

    /// Dependency type (serialized as "type" in the mirror).
    #[serde(rename = "type", default)]
    pub dep_type: DependencyType,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_by: String,
}

impl Dependency {
    /// Constructs a blocking edge `issue_id -> depends_on_id`.
    pub fn blocks(issue_id: impl Into<String>, depends_on_id: impl Into<String>) -> Self {
        Self::typed(issue_id, depends_on_id, DependencyType::Blocks)
    }

    /// Constructs an edge of the given type.
    pub fn typed(
        issue_id: impl Into<String>,
        depends_on_id: impl Into<String>,
        dep_type: DependencyType,
    ) -> Self {
        Self {
            issue_id: issue_id.into(),
            depends_on_id: depends_on_id.into(),
            dep_type,
            created_at: Utc::now(),
            created_by: String::new(),
        }
    }
}

/// Counts of incoming and outgoing edges for one issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyCounts {
    /// Number of issues this issue depends on.
    pub dependency_count: i32,
    /// Number of issues that depend on this issue.
    pub dependent_count: i32,
}
