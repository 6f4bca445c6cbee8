//! Deterministic content hashing for issues.
//!
//! Produces a SHA-256 hex digest over the substantive fields (excluding ID,
//! timestamps, and compaction metadata) so that identical content produces
//! identical hashes across all clones. The import path compares these hashes
//! to decide create/update/unchanged.

use sha2::{Digest, Sha256};

use crate::issue::Issue;

/// Separator byte written between fields.
const SEP: u8 = 0;

/// Computes a deterministic content hash for an issue.
///
/// Labels and dependency edges are included in sorted order so attachment
/// order cannot change the hash. Unknown passthrough fields are included by
/// key so foreign data survives the unchanged check.
pub fn compute_content_hash(issue: &Issue) -> String {
    let mut h = Sha256::new();

    write_str(&mut h, &issue.title);
    write_str(&mut h, &issue.description);
    write_str(&mut h, &issue.design);
    write_str(&mut h, &issue.acceptance_criteria);
    write_str(&mut h, &issue.notes);
    write_str(&mut h, &issue.spec_id);
    write_str(&mut h, issue.status.as_str());
    write_int(&mut h, issue.priority);
    write_str(&mut h, issue.issue_type.as_str());
    write_str(&mut h, &issue.assignee);
    write_str(&mut h, &issue.created_by);
    write_str(&mut h, &issue.close_reason);
    write_int(&mut h, issue.estimated_minutes.unwrap_or(-1));

    let mut labels: Vec<&str> = issue.labels.iter().map(String::as_str).collect();
    labels.sort_unstable();
    for label in labels {
        write_str(&mut h, label);
    }

    let mut edges: Vec<(String, &str)> = issue
        .dependencies
        .iter()
        .map(|d| (d.depends_on_id.clone(), d.dep_type.as_str()))
        .collect();
    edges.sort();
    for (target, dep_type) in edges {
        write_str(&mut h, &target);
        write_str(&mut h, dep_type);
    }

    // extra is a BTreeMap, so iteration order is already canonical.
    for (key, value) in &issue.extra {
        write_str(&mut h, key);
        write_str(&mut h, &value.to_string());
    }

    format!("{:x}", h.finalize())
}

fn write_str(h: &mut Sha256, s: &str) {
    h.update(s.as_bytes());
    h.update([SEP]);
}

fn write_int(h: &mut Sha256, n: i32) {
    h.update(n.to_string().as_bytes());
    h.update([SEP]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::Dependency;
    use crate::issue::IssueBuilder;

    #[test]
    fn content_hash_deterministic() {
        let issue = IssueBuilder::new("Test issue")
            .description("A description")
            .priority(2)
            .build();

        let hash1 = compute_content_hash(&issue);
        let hash2 = compute_content_hash(&issue);
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn content_hash_differs_on_change() {
        let issue1 = IssueBuilder::new("Title A").build();
        let issue2 = IssueBuilder::new("Title B").build();
        assert_ne!(compute_content_hash(&issue1), compute_content_hash(&issue2));
    }

    #[test]
    fn content_hash_ignores_id_and_timestamps() {
        let mut issue1 = IssueBuilder::new("Same content").build();
        let mut issue2 = IssueBuilder::new("Same content").build();

        issue1.id = "br-aaa".into();
        issue2.id = "br-bbb".into();
        issue1.created_at = chrono::Utc::now();
        issue2.created_at = chrono::DateTime::parse_from_rfc3339("2020-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);

        assert_eq!(compute_content_hash(&issue1), compute_content_hash(&issue2));
    }

    #[test]
    fn label_order_does_not_matter() {
        let issue1 = IssueBuilder::new("t")
            .labels(vec!["a".into(), "b".into()])
            .build();
        let issue2 = IssueBuilder::new("t")
            .labels(vec!["b".into(), "a".into()])
            .build();
        assert_eq!(compute_content_hash(&issue1), compute_content_hash(&issue2));
    }

    #[test]
    fn dependency_edges_change_hash() {
        let mut issue1 = IssueBuilder::new("t").build();
        let issue2 = IssueBuilder::new("t").build();
        issue1.dependencies.push(Dependency::blocks("", "br-x"));
        assert_ne!(compute_content_hash(&issue1), compute_content_hash(&issue2));
    }
}
