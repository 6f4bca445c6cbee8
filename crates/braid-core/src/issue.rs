//! Issue struct -- the central domain model for the braid system.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dependency::Dependency;
use crate::enums::{IssueType, Status};

fn is_false(b: &bool) -> bool {
    !b
}

fn is_zero_i32(v: &i32) -> bool {
    *v == 0
}

fn is_empty_vec<T>(v: &Vec<T>) -> bool {
    v.is_empty()
}

/// Represents a trackable work item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    // ===== Identification =====
    #[serde(default)]
    pub id: String,

    /// Internal: SHA256 of canonical content -- never written to the mirror.
    #[serde(skip)]
    pub content_hash: String,

    // ===== Content =====
    #[serde(default)]
    pub title: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub design: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub acceptance_criteria: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub spec_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_changed_at: Option<DateTime<Utc>>,

    // ===== Status & workflow =====
    #[serde(default)]
    pub status: Status,

    /// Priority 0-4; 0 is highest. Always serialized: 0 is a valid value.
    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub issue_type: IssueType,

    // ===== Assignment =====
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub assignee: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_minutes: Option<i32>,

    // ===== Timestamps =====
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_by: String,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub close_reason: String,

    // ===== Local-only state =====
    /// Ephemeral issues never appear in the text mirror.
    #[serde(default, skip_serializing_if = "is_false")]
    pub ephemeral: bool,

    #[serde(default, skip_serializing_if = "is_zero_i32")]
    pub compaction_level: i32,

    // ===== Relational data (populated for export/import) =====
    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub labels: Vec<String>,

    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub dependencies: Vec<Dependency>,

    // ===== Round-trip preservation =====
    /// Fields this version does not understand. Preserved verbatim so that a
    /// mirror written by a newer version survives an export from this one.
    /// An empty map flattens to nothing.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for Issue {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            content_hash: String::new(),
            title: String::new(),
            description: String::new(),
            design: String::new(),
            acceptance_criteria: String::new(),
            notes: String::new(),
            spec_id: String::new(),
            spec_changed_at: None,
            status: Status::Open,
            priority: 2,
            issue_type: IssueType::Task,
            assignee: String::new(),
            estimated_minutes: None,
            created_at: now,
            created_by: String::new(),
            updated_at: now,
            closed_at: None,
            close_reason: String::new(),
            ephemeral: false,
            compaction_level: 0,
            labels: Vec::new(),
            dependencies: Vec::new(),
            extra: BTreeMap::new(),
        }
    }
}

impl Issue {
    /// Applies defaults for fields omitted during mirror import.
    pub fn set_defaults(&mut self) {
        if self.status.as_str().is_empty() {
            self.status = Status::Open;
        }
        if self.issue_type.as_str().is_empty() {
            self.issue_type = IssueType::Task;
        }
    }

    /// Returns `true` if this issue marks a deleted ID.
    pub fn is_tombstone(&self) -> bool {
        self.status == Status::Tombstone
    }
}

/// Builder for constructing an [`Issue`] with a fluent API.
pub struct IssueBuilder {
    issue: Issue,
}

impl IssueBuilder {
    /// Creates a new builder with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        let mut issue = Issue::default();
        issue.title = title.into();
        Self { issue }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.issue.id = id.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.issue.description = description.into();
        self
    }

    pub fn design(mut self, design: impl Into<String>) -> Self {
        self.issue.design = design.into();
        self
    }

    pub fn acceptance_criteria(mut self, ac: impl Into<String>) -> Self {
        self.issue.acceptance_criteria = ac.into();
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.issue.notes = notes.into();
        self
    }

    pub fn spec_id(mut self, spec_id: impl Into<String>) -> Self {
        self.issue.spec_id = spec_id.into();
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.issue.status = status;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.issue.priority = priority;
        self
    }

    pub fn issue_type(mut self, issue_type: IssueType) -> Self {
        self.issue.issue_type = issue_type;
        self
    }

    pub fn assignee(mut self, assignee: impl Into<String>) -> Self {
        self.issue.assignee = assignee.into();
        self
    }

    pub fn estimated_minutes(mut self, minutes: i32) -> Self {
        self.issue.estimated_minutes = Some(minutes);
        self
    }

    pub fn created_at(mut self, t: DateTime<Utc>) -> Self {
        self.issue.created_at = t;
        self
    }

    pub fn created_by(mut self, by: impl Into<String>) -> Self {
        self.issue.created_by = by.into();
        self
    }

    pub fn updated_at(mut self, t: DateTime<Utc>) -> Self {
        self.issue.updated_at = t;
        self
    }

    pub fn closed_at(mut self, t: DateTime<Utc>) -> Self {
        self.issue.closed_at = Some(t);
        self
    }

    pub fn close_reason(mut self, reason: impl Into<String>) -> Self {
        self.issue.close_reason = reason.into();
        self
    }

    pub fn ephemeral(mut self, ephemeral: bool) -> Self {
        self.issue.ephemeral = ephemeral;
        self
    }

    pub fn labels(mut self, labels: Vec<String>) -> Self {
        self.issue.labels = labels;
        self
    }

    /// Consumes the builder and returns the constructed [`Issue`].
    pub fn build(self) -> Issue {
        self.issue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_issue() {
        let issue = Issue::default();
        assert_eq!(issue.status, Status::Open);
        assert_eq!(issue.issue_type, IssueType::Task);
        assert_eq!(issue.priority, 2);
        assert!(!issue.ephemeral);
    }

    #[test]
    fn builder_basic() {
        let issue = IssueBuilder::new("Fix the bug")
            .priority(1)
            .status(Status::InProgress)
            .issue_type(IssueType::Bug)
            .assignee("alice")
            .build();

        assert_eq!(issue.title, "Fix the bug");
        assert_eq!(issue.priority, 1);
        assert_eq!(issue.status, Status::InProgress);
        assert_eq!(issue.issue_type, IssueType::Bug);
        assert_eq!(issue.assignee, "alice");
    }

    #[test]
    fn issue_serde_roundtrip() {
        let issue = IssueBuilder::new("Test issue")
            .id("br-abc123")
            .priority(1)
            .description("A test description")
            .build();

        let json = serde_json::to_string(&issue).unwrap();
        let back: Issue = serde_json::from_str(&json).unwrap();

        assert_eq!(back.title, "Test issue");
        assert_eq!(back.id, "br-abc123");
        assert_eq!(back.priority, 1);
        assert_eq!(back.description, "A test description");
    }

    #[test]
    fn unknown_fields_preserved() {
        let json = r#"{"id":"br-1","title":"hello","status":"open","priority":2,"issue_type":"task","created_at":"2024-01-01T00:00:00Z","updated_at":"2024-01-01T00:00:00Z","quality_score":0.9,"rig":"west"}"#;
        let issue: Issue = serde_json::from_str(json).unwrap();
        assert_eq!(issue.extra.len(), 2);
        assert!(issue.extra.contains_key("quality_score"));

        let out = serde_json::to_string(&issue).unwrap();
        assert!(out.contains("\"quality_score\":0.9"));
        assert!(out.contains("\"rig\":\"west\""));
    }

    #[test]
    fn ephemeral_not_serialized_when_false() {
        let issue = IssueBuilder::new("t").id("br-1").build();
        let json = serde_json::to_string(&issue).unwrap();
        assert!(!json.contains("ephemeral"));
    }

    #[test]
    fn tombstone_detection() {
        let mut issue = IssueBuilder::new("gone").build();
        assert!(!issue.is_tombstone());
        issue.status = Status::Tombstone;
        assert!(issue.is_tombstone());
    }
}
