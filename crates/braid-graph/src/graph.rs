//! Blocking-subgraph adjacency index: cycle paths, ready and blocked sets.

use std::collections::{HashMap, HashSet, VecDeque};

use braid_core::dependency::Dependency;
use braid_core::issue::Issue;

/// An adjacency index over the blocking edges of a set of issues.
///
/// Edges run dependent -> dependee. Non-blocking dependency types are
/// excluded at construction; every caller therefore shares one definition of
/// "blocking" via `DependencyType::affects_readiness`.
#[derive(Debug, Default)]
pub struct GraphSnapshot {
    /// issue id -> ids it depends on (blocking only).
    depends_on: HashMap<String, Vec<String>>,
    /// issue id -> ids that depend on it (blocking only).
    dependents: HashMap<String, Vec<String>>,
    /// ids with an unclosed status, for readiness checks.
    unclosed: HashSet<String>,
    /// ids eligible for the ready set (open or in_progress, not ephemeral-excluded).
    workable: HashSet<String>,
}

/// A blocked issue with its open blockers, sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedEntry {
    pub id: String,
    pub blocked_by: Vec<String>,
}

impl GraphSnapshot {
    /// Builds the index from issue and dependency records.
    ///
    /// Edges that reference ids outside `issues` are kept; readiness treats
    /// an unknown dependee as closed (it cannot block what we cannot see).
    pub fn new<'a>(
        issues: impl IntoIterator<Item = &'a Issue>,
        deps: impl IntoIterator<Item = &'a Dependency>,
    ) -> Self {
        let mut snapshot = Self::default();
        for issue in issues {
            snapshot
                .depends_on
                .entry(issue.id.clone())
                .or_default();
            snapshot.dependents.entry(issue.id.clone()).or_default();
            if issue.status.is_unclosed() {
                snapshot.unclosed.insert(issue.id.clone());
            }
            if issue.status.is_workable() {
                snapshot.workable.insert(issue.id.clone());
            }
        }
        for dep in deps {
            if !dep.dep_type.affects_readiness() {
                continue;
            }
            snapshot
                .depends_on
                .entry(dep.issue_id.clone())
                .or_default()
                .push(dep.depends_on_id.clone());
            snapshot
                .dependents
                .entry(dep.depends_on_id.clone())
                .or_default()
                .push(dep.issue_id.clone());
        }
        snapshot
    }

    /// Returns the cycle that adding `issue_id -> depends_on_id` would close,
    /// or `None` if the edge is safe.
    ///
    /// BFS from the prospective dependee with predecessor tracking; when
    /// `issue_id` is reached, the walk back through predecessors yields the
    /// offending path `[issue_id, depends_on_id, ..., issue_id]`.
    pub fn find_cycle_path(&self, issue_id: &str, depends_on_id: &str) -> Option<Vec<String>> {
        if issue_id == depends_on_id {
            return Some(vec![issue_id.to_owned(), issue_id.to_owned()]);
        }

        let mut predecessor: HashMap<&str, &str> = HashMap::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(depends_on_id);

        while let Some(current) = queue.pop_front() {
            if current == issue_id {
                // Walk predecessors back to the prospective dependee, then
                // reverse so the path follows dependency direction:
                // issue_id -> depends_on_id -> ... -> issue_id.
                let mut chain = vec![issue_id.to_owned()];
                let mut node = issue_id;
                while let Some(prev) = predecessor.get(node).copied() {
                    chain.push(prev.to_owned());
                    node = prev;
                }
                chain.reverse();

                let mut path = Vec::with_capacity(chain.len() + 1);
                path.push(issue_id.to_owned());
                path.extend(chain);
                return Some(path);
            }
            if let Some(nexts) = self.depends_on.get(current) {
                for next in nexts {
                    if next != depends_on_id && !predecessor.contains_key(next.as_str()) {
                        predecessor.insert(next, current);
                        queue.push_back(next);
                    }
                }
            }
        }

        None
    }

    /// Open blockers of one issue, sorted ascending.
    pub fn open_blockers(&self, issue_id: &str) -> Vec<String> {
        let mut blockers: Vec<String> = self
            .depends_on
            .get(issue_id)
            .map(|deps| {
                deps.iter()
                    .filter(|d| self.unclosed.contains(d.as_str()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        blockers.sort();
        blockers.dedup();
        blockers
    }

    /// IDs that are ready: workable status and no open blockers.
    ///
    /// Order is left to the caller (the store sorts by priority/created_at).
    pub fn ready_ids(&self) -> Vec<String> {
        let mut ready: Vec<String> = self
            .workable
            .iter()
            .filter(|id| self.open_blockers(id).is_empty())
            .cloned()
            .collect();
        ready.sort();
        ready
    }

    /// Unclosed issues with at least one open blocker, each with its sorted
    /// blocker list, ordered by id.
    pub fn blocked(&self) -> Vec<BlockedEntry> {
        let mut blocked: Vec<BlockedEntry> = self
            .unclosed
            .iter()
            .filter_map(|id| {
                let blockers = self.open_blockers(id);
                if blockers.is_empty() {
                    None
                } else {
                    Some(BlockedEntry {
                        id: id.clone(),
                        blocked_by: blockers,
                    })
                }
            })
            .collect();
        blocked.sort_by(|a, b| a.id.cmp(&b.id));
        blocked
    }

    /// IDs that depend (blocking) on the given issue.
    pub fn dependents_of(&self, issue_id: &str) -> Vec<String> {
        let mut out = self
            .dependents
            .get(issue_id)
            .cloned()
            .unwrap_or_default();
        out.sort();
        out.dedup();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_core::enums::{DependencyType, Status};
    use braid_core::issue::IssueBuilder;

    fn issue(id: &str, status: Status) -> Issue {
        let mut i = IssueBuilder::new(format!("issue {id}")).id(id).build();
        i.status = status.clone();
        if status == Status::Closed {
            i.closed_at = Some(chrono::Utc::now());
        }
        i
    }

    #[test]
    fn cycle_path_shape() {
        // x-2 depends on x-1, x-3 depends on x-2; adding x-1 -> x-3 closes
        // the loop and the path names every participant, ends where it began.
        let issues = vec![
            issue("x-1", Status::Open),
            issue("x-2", Status::Open),
            issue("x-3", Status::Open),
        ];
        let deps = vec![
            Dependency::blocks("x-2", "x-1"),
            Dependency::blocks("x-3", "x-2"),
        ];
        let graph = GraphSnapshot::new(issues.iter(), deps.iter());

        let path = graph.find_cycle_path("x-1", "x-3").unwrap();
        assert_eq!(path, vec!["x-1", "x-3", "x-2", "x-1"]);
    }

    #[test]
    fn no_cycle_for_safe_edge() {
        let issues = vec![issue("a-1", Status::Open), issue("a-2", Status::Open)];
        let deps: Vec<Dependency> = Vec::new();
        let graph = GraphSnapshot::new(issues.iter(), deps.iter());
        assert!(graph.find_cycle_path("a-2", "a-1").is_none());
    }

    #[test]
    fn self_edge_is_a_cycle() {
        let issues = vec![issue("a-1", Status::Open)];
        let deps: Vec<Dependency> = Vec::new();
        let graph = GraphSnapshot::new(issues.iter(), deps.iter());
        assert_eq!(
            graph.find_cycle_path("a-1", "a-1").unwrap(),
            vec!["a-1", "a-1"]
        );
    }

    #[test]
    fn non_blocking_edges_do_not_cycle() {
        let issues = vec![issue("a-1", Status::Open), issue("a-2", Status::Open)];
        let deps = vec![Dependency::typed("a-1", "a-2", DependencyType::Related)];
        let graph = GraphSnapshot::new(issues.iter(), deps.iter());
        // related a-1 -> a-2 does not make a-2 -> a-1 a blocking cycle.
        assert!(graph.find_cycle_path("a-2", "a-1").is_none());
    }

    #[test]
    fn ready_and_blocked_sets() {
        let issues = vec![
            issue("b-1", Status::Open),
            issue("b-2", Status::Open),
            issue("b-3", Status::Closed),
            issue("b-4", Status::InProgress),
        ];
        let deps = vec![
            Dependency::blocks("b-2", "b-1"),
            Dependency::blocks("b-4", "b-3"),
        ];
        let graph = GraphSnapshot::new(issues.iter(), deps.iter());

        // b-1 has no blockers; b-4's blocker is closed; b-2 is blocked.
        assert_eq!(graph.ready_ids(), vec!["b-1", "b-4"]);

        let blocked = graph.blocked();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].id, "b-2");
        assert_eq!(blocked[0].blocked_by, vec!["b-1"]);
    }

    #[test]
    fn unknown_dependee_does_not_block() {
        let issues = vec![issue("c-1", Status::Open)];
        let deps = vec![Dependency::blocks("c-1", "ext-99")];
        let graph = GraphSnapshot::new(issues.iter(), deps.iter());
        assert_eq!(graph.ready_ids(), vec!["c-1"]);
    }

    #[test]
    fn dependents_listing() {
        let issues = vec![
            issue("d-1", Status::Open),
            issue("d-2", Status::Open),
            issue("d-3", Status::Open),
        ];
        let deps = vec![
            Dependency::blocks("d-2", "d-1"),
            Dependency::blocks("d-3", "d-1"),
        ];
        let graph = GraphSnapshot::new(issues.iter(), deps.iter());
        assert_eq!(graph.dependents_of("d-1"), vec!["d-2", "d-3"]);
    }
}
