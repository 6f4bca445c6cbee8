//! Issue and prefix validation rules.
//!
//! Every error carries a stable machine-readable reason code via
//! [`ValidationError::reason`]; the display string is for humans only.

use crate::enums::Status;
use crate::issue::Issue;

/// Maximum issue prefix length.
pub const MAX_PREFIX_LEN: usize = 8;

/// Maximum issue title length, counted after trimming.
pub const MAX_TITLE_LEN: usize = 500;

/// Error type for validation failures.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("title is required")]
    TitleRequired,

    #[error("title must be {MAX_TITLE_LEN} characters or less (got {0})")]
    TitleTooLong(usize),

    #[error("priority must be between 0 and 4 (got {0})")]
    InvalidPriority(i32),

    #[error("unknown status: {0}")]
    UnknownStatus(String),

    #[error("unknown issue type: {0}")]
    UnknownType(String),

    #[error("unknown dependency type: {0}")]
    UnknownDependencyType(String),

    #[error("invalid issue prefix: {0:?}")]
    InvalidPrefix(String),

    #[error("issue id {id:?} does not carry prefix {prefix:?}")]
    PrefixMismatch { id: String, prefix: String },

    #[error("estimated_minutes cannot be negative")]
    NegativeEstimate,

    #[error("closed issues must have a closed_at timestamp")]
    ClosedWithoutTimestamp,

    #[error("non-closed issues cannot have a closed_at timestamp")]
    NotClosedWithTimestamp,
}

impl ValidationError {
    /// Stable machine-readable reason code.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::TitleRequired => "missing_title",
            Self::TitleTooLong(_) => "title_too_long",
            Self::InvalidPriority(_) => "invalid_priority",
            Self::UnknownStatus(_) => "unknown_status",
            Self::UnknownType(_) => "unknown_type",
            Self::UnknownDependencyType(_) => "unknown_dependency_type",
            Self::InvalidPrefix(_) => "invalid_prefix",
            Self::PrefixMismatch { .. } => "prefix_mismatch",
            Self::NegativeEstimate => "negative_estimate",
            Self::ClosedWithoutTimestamp => "closed_without_timestamp",
            Self::NotClosedWithTimestamp => "not_closed_with_timestamp",
        }
    }
}

/// Validates a workspace issue prefix.
///
/// A prefix is 1..=8 characters of lowercase ASCII alphanumerics and
/// hyphens, and may not start or end with a hyphen.
pub fn validate_prefix(prefix: &str) -> Result<(), ValidationError> {
    let valid = !prefix.is_empty()
        && prefix.len() <= MAX_PREFIX_LEN
        && prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !prefix.starts_with('-')
        && !prefix.ends_with('-');

    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidPrefix(prefix.to_owned()))
    }
}

/// Checks that an issue ID carries the workspace prefix.
///
/// The prefix of an ID is everything before the last hyphen, so hierarchical
/// prefixes ("team-api") work without special casing.
pub fn validate_id_prefix(id: &str, prefix: &str) -> Result<(), ValidationError> {
    match id.rsplit_once('-') {
        Some((head, suffix)) if head == prefix && !suffix.is_empty() => Ok(()),
        _ => Err(ValidationError::PrefixMismatch {
            id: id.to_owned(),
            prefix: prefix.to_owned(),
        }),
    }
}

/// Validates an issue using built-in rules only.
pub fn validate(issue: &Issue) -> Result<(), ValidationError> {
    validate_with_custom(issue, &[], &[])
}

/// Validates an issue, allowing the given custom statuses and types.
pub fn validate_with_custom(
    issue: &Issue,
    custom_statuses: &[&str],
    custom_types: &[&str],
) -> Result<(), ValidationError> {
    let title = issue.title.trim();
    if title.is_empty() {
        return Err(ValidationError::TitleRequired);
    }
    if title.len() > MAX_TITLE_LEN {
        return Err(ValidationError::TitleTooLong(title.len()));
    }
    if issue.priority < 0 || issue.priority > 4 {
        return Err(ValidationError::InvalidPriority(issue.priority));
    }
    if !issue.status.is_known_or(custom_statuses) {
        return Err(ValidationError::UnknownStatus(
            issue.status.as_str().to_owned(),
        ));
    }
    if !issue.issue_type.is_known_or(custom_types) {
        return Err(ValidationError::UnknownType(
            issue.issue_type.as_str().to_owned(),
        ));
    }
    if let Some(est) = issue.estimated_minutes {
        if est < 0 {
            return Err(ValidationError::NegativeEstimate);
        }
    }
    if issue.status == Status::Closed && issue.closed_at.is_none() {
        return Err(ValidationError::ClosedWithoutTimestamp);
    }
    if issue.status != Status::Closed
        && issue.status != Status::Tombstone
        && issue.closed_at.is_some()
    {
        return Err(ValidationError::NotClosedWithTimestamp);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::IssueType;
    use crate::issue::IssueBuilder;

    #[test]
    fn valid_issue_passes() {
        let issue = IssueBuilder::new("Valid issue").priority(2).build();
        assert!(validate(&issue).is_ok());
    }

    #[test]
    fn empty_title_fails() {
        let issue = IssueBuilder::new("").build();
        match validate(&issue) {
            Err(e @ ValidationError::TitleRequired) => assert_eq!(e.reason(), "missing_title"),
            other => panic!("expected TitleRequired, got {:?}", other),
        }
    }

    #[test]
    fn whitespace_title_fails() {
        let issue = IssueBuilder::new("   ").build();
        assert!(matches!(validate(&issue), Err(ValidationError::TitleRequired)));
    }

    #[test]
    fn long_title_fails() {
        let title = "x".repeat(MAX_TITLE_LEN + 1);
        let issue = IssueBuilder::new(title).build();
        match validate(&issue) {
            Err(ValidationError::TitleTooLong(n)) => assert_eq!(n, MAX_TITLE_LEN + 1),
            other => panic!("expected TitleTooLong, got {:?}", other),
        }
    }

    #[test]
    fn invalid_priority_fails() {
        let issue = IssueBuilder::new("Test").priority(5).build();
        assert!(matches!(
            validate(&issue),
            Err(ValidationError::InvalidPriority(5))
        ));
        let issue = IssueBuilder::new("Test").priority(-1).build();
        assert!(matches!(
            validate(&issue),
            Err(ValidationError::InvalidPriority(-1))
        ));
    }

    #[test]
    fn custom_status_rejected_without_allowlist() {
        let issue = IssueBuilder::new("Test")
            .status(Status::Custom("triage".into()))
            .build();
        assert!(matches!(
            validate(&issue),
            Err(ValidationError::UnknownStatus(_))
        ));
        assert!(validate_with_custom(&issue, &["triage"], &[]).is_ok());
    }

    #[test]
    fn custom_type_rejected_without_allowlist() {
        let issue = IssueBuilder::new("Test")
            .issue_type(IssueType::Custom("spike".into()))
            .build();
        assert!(matches!(
            validate(&issue),
            Err(ValidationError::UnknownType(_))
        ));
        assert!(validate_with_custom(&issue, &[], &["spike"]).is_ok());
    }

    #[test]
    fn closed_timestamp_invariant() {
        let issue = IssueBuilder::new("Test").status(Status::Closed).build();
        assert!(matches!(
            validate(&issue),
            Err(ValidationError::ClosedWithoutTimestamp)
        ));

        let issue = IssueBuilder::new("Test")
            .status(Status::Closed)
            .closed_at(chrono::Utc::now())
            .build();
        assert!(validate(&issue).is_ok());

        let issue = IssueBuilder::new("Test")
            .status(Status::Open)
            .closed_at(chrono::Utc::now())
            .build();
        assert!(matches!(
            validate(&issue),
            Err(ValidationError::NotClosedWithTimestamp)
        ));
    }

    #[test]
    fn negative_estimate_fails() {
        let mut issue = IssueBuilder::new("Test").build();
        issue.estimated_minutes = Some(-5);
        assert!(matches!(
            validate(&issue),
            Err(ValidationError::NegativeEstimate)
        ));
    }

    #[test]
    fn prefix_rules() {
        assert!(validate_prefix("br").is_ok());
        assert!(validate_prefix("proj-api").is_ok());
        assert!(validate_prefix("a1").is_ok());
        assert!(validate_prefix("").is_err());
        assert!(validate_prefix("toolongpre").is_err());
        assert!(validate_prefix("UPPER").is_err());
        assert!(validate_prefix("-lead").is_err());
        assert!(validate_prefix("trail-").is_err());
        assert!(validate_prefix("has space").is_err());
    }

    #[test]
    fn id_prefix_check() {
        assert!(validate_id_prefix("br-abc", "br").is_ok());
        assert!(validate_id_prefix("proj-api-7", "proj-api").is_ok());
        assert!(validate_id_prefix("other-abc", "br").is_err());
        assert!(validate_id_prefix("br-", "br").is_err());
        assert!(validate_id_prefix("noprefix", "br").is_err());
    }

    #[test]
    fn reason_codes_are_stable() {
        assert_eq!(
            ValidationError::InvalidPrefix("X".into()).reason(),
            "invalid_prefix"
        );
        assert_eq!(
            ValidationError::UnknownStatus("x".into()).reason(),
            "unknown_status"
        );
    }
}
