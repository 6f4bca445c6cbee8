//! Wave decomposition of an epic's children (swarm analysis).
//!
//! Given the blocking edges among an epic's children, Kahn's algorithm
//! yields "waves": sets of issues that can be worked in parallel. Wave 0 is
//! everything with no in-wave blockers; each subsequent wave unlocks when
//! the previous one completes.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use braid_core::issue::Issue;

/// A wave of issues that can be worked on in parallel.
#[derive(Debug, Clone, Serialize)]
pub struct Wave {
    pub wave: usize,
    pub issues: Vec<WaveIssue>,
}

/// An issue within a wave.
#[derive(Debug, Clone, Serialize)]
pub struct WaveIssue {
    pub id: String,
    pub title: String,
    pub priority: i32,
    pub status: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<String>,
}

/// Result of analyzing an epic's dependency structure.
#[derive(Debug, Clone, Serialize)]
pub struct WaveAnalysis {
    pub epic_id: String,
    pub total_issues: usize,
    pub closed_issues: usize,
    pub waves: Vec<Wave>,
    pub max_parallelism: usize,
    pub estimated_sessions: usize,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl WaveAnalysis {
    /// Returns `true` when the epic has no structural errors.
    pub fn is_parallelizable(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Analyzes the blocking structure among an epic's children.
///
/// `blocking_edges` are `(blocker_id, blocked_id)` pairs already restricted
/// to readiness-affecting types. Edges that name ids outside `children`
/// produce warnings, never errors.
pub fn analyze_waves(
    epic_id: &str,
    children: &[Issue],
    blocking_edges: &[(String, String)],
) -> WaveAnalysis {
    if children.is_empty() {
        return WaveAnalysis {
            epic_id: epic_id.to_owned(),
            total_issues: 0,
            closed_issues: 0,
            waves: Vec::new(),
            max_parallelism: 0,
            estimated_sessions: 0,
            warnings: vec!["epic has no children".to_owned()],
            errors: Vec::new(),
        };
    }

    let child_set: HashSet<&str> = children.iter().map(|c| c.id.as_str()).collect();
    let child_map: HashMap<&str, &Issue> =
        children.iter().map(|c| (c.id.as_str(), c)).collect();

    let mut warnings = Vec::new();

    // Split edges into in-scope and external.
    let mut edges: Vec<(&str, &str)> = Vec::new();
    for (blocker, blocked) in blocking_edges {
        if child_set.contains(blocker.as_str()) && child_set.contains(blocked.as_str()) {
            edges.push((blocker.as_str(), blocked.as_str()));
        } else {
            warnings.push(format!(
                "edge {blocker} -> {blocked} references an issue outside the epic"
            ));
        }
    }

    // Adjacency for structural checks: blocked -> blockers, blocker -> blocked.
    let mut needs: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut unlocks: HashMap<&str, Vec<&str>> = HashMap::new();
    for c in children {
        needs.entry(c.id.as_str()).or_default();
        unlocks.entry(c.id.as_str()).or_default();
    }
    for (blocker, blocked) in &edges {
        needs.entry(blocked).or_default().push(blocker);
        unlocks.entry(blocker).or_default().push(blocked);
    }

    // Structural heuristics: titles that suggest a miswired graph.
    for c in children {
        let lower = c.title.to_lowercase();
        let has_needs = needs.get(c.id.as_str()).is_some_and(|d| !d.is_empty());
        let has_unlocks = unlocks.get(c.id.as_str()).is_some_and(|d| !d.is_empty());

        if !has_unlocks
            && (lower.contains("foundation")
                || lower.contains("setup")
                || lower.contains("base")
                || lower.contains("core"))
        {
            warnings.push(format!(
                "{} ({}) has no dependents -- should other issues depend on it?",
                c.id, c.title
            ));
        }
        if !has_needs
            && (lower.contains("integration") || lower.contains("final") || lower.contains("test"))
        {
            warnings.push(format!(
                "{} ({}) has no dependencies -- should it depend on implementation?",
                c.id, c.title
            ));
        }
    }

    // Disconnected nodes (no edges at all) are worth flagging once the epic
    // has any internal structure.
    if !edges.is_empty() {
        let mut isolated: Vec<&str> = children
            .iter()
            .map(|c| c.id.as_str())
            .filter(|id| {
                needs.get(*id).is_none_or(|d| d.is_empty())
                    && unlocks.get(*id).is_none_or(|d| d.is_empty())
            })
            .collect();
        isolated.sort_unstable();
        if !isolated.is_empty() {
            warnings.push(format!(
                "issues not connected to the rest of the epic: {}",
                isolated.join(", ")
            ));
        }
    }

    // Kahn's algorithm.
    let (wave_ids, cycle_residue) = compute_waves(&child_set, &edges);

    let mut errors = Vec::new();
    if !cycle_residue.is_empty() {
        errors.push(format!(
            "dependency cycle among: {}",
            cycle_residue.join(", ")
        ));
    }

    let mut waves = Vec::new();
    let mut max_parallelism = 0usize;
    for (wave_idx, ids) in wave_ids.iter().enumerate() {
        max_parallelism = max_parallelism.max(ids.len());
        let issues = ids
            .iter()
            .filter_map(|id| child_map.get(id.as_str()))
            .map(|c| {
                let mut wave_needs: Vec<String> = needs
                    .get(c.id.as_str())
                    .map(|d| d.iter().map(|s| (*s).to_owned()).collect())
                    .unwrap_or_default();
                wave_needs.sort();
                WaveIssue {
                    id: c.id.clone(),
                    title: c.title.clone(),
                    priority: c.priority,
                    status: c.status.as_str().to_owned(),
                    needs: wave_needs,
                }
            })
            .collect();
        waves.push(Wave {
            wave: wave_idx,
            issues,
        });
    }

    let closed_issues = children
        .iter()
        .filter(|c| !c.status.is_unclosed())
        .count();

    WaveAnalysis {
        epic_id: epic_id.to_owned(),
        total_issues: children.len(),
        closed_issues,
        waves,
        max_parallelism,
        estimated_sessions: children.len(),
        warnings,
        errors,
    }
}

/// Peels waves off the graph with Kahn's algorithm.
///
/// Returns the waves (each sorted by id ascending for determinism) and any
/// residue that never reached in-degree zero -- those nodes sit on a cycle.
fn compute_waves(
    nodes: &HashSet<&str>,
    edges: &[(&str, &str)],
) -> (Vec<Vec<String>>, Vec<String>) {
    let mut in_degree: HashMap<&str, usize> = nodes.iter().map(|id| (*id, 0)).collect();
    let mut adj: HashMap<&str, Vec<&str>> = HashMap::new();

    for (blocker, blocked) in edges {
        *in_degree.entry(blocked).or_insert(0) += 1;
        adj.entry(blocker).or_default().push(blocked);
    }

    let mut waves = Vec::new();
    let mut remaining = in_degree;

    loop {
        let mut wave: Vec<String> = remaining
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| (*id).to_owned())
            .collect();
        if wave.is_empty() {
            break;
        }
        wave.sort();

        for id in &wave {
            remaining.remove(id.as_str());
            if let Some(next) = adj.get(id.as_str()) {
                for n in next {
                    if let Some(deg) = remaining.get_mut(n) {
                        *deg = deg.saturating_sub(1);
                    }
                }
            }
        }
        waves.push(wave);
    }

    let mut residue: Vec<String> = remaining.keys().map(|id| (*id).to_owned()).collect();
    residue.sort();
    (waves, residue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_core::enums::Status;
    use braid_core::issue::IssueBuilder;

    fn child(id: &str, title: &str) -> Issue {
        IssueBuilder::new(title).id(id).priority(2).build()
    }

    fn edges(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(a, b)| ((*a).to_owned(), (*b).to_owned()))
            .collect()
    }

    #[test]
    fn three_wave_decomposition() {
        let children = vec![
            child("c-1", "parser"),
            child("c-2", "lexer"),
            child("c-3", "typechecker"),
            child("c-4", "interpreter"),
            child("c-5", "compiler"),
        ];
        // c-3 needs c-1 and c-2; c-4 and c-5 need c-3.
        let deps = edges(&[
            ("c-1", "c-3"),
            ("c-2", "c-3"),
            ("c-3", "c-4"),
            ("c-3", "c-5"),
        ]);

        let analysis = analyze_waves("ep-1", &children, &deps);
        assert!(analysis.errors.is_empty());
        assert_eq!(analysis.waves.len(), 3);
        assert_eq!(analysis.max_parallelism, 2);
        assert_eq!(analysis.estimated_sessions, 5);

        let ids: Vec<Vec<&str>> = analysis
            .waves
            .iter()
            .map(|w| w.issues.iter().map(|i| i.id.as_str()).collect())
            .collect();
        assert_eq!(ids[0], vec!["c-1", "c-2"]);
        assert_eq!(ids[1], vec!["c-3"]);
        assert_eq!(ids[2], vec!["c-4", "c-5"]);
        assert!(analysis.is_parallelizable());
    }

    #[test]
    fn waves_record_needs() {
        let children = vec![child("c-1", "one"), child("c-2", "two")];
        let deps = edges(&[("c-1", "c-2")]);
        let analysis = analyze_waves("ep-1", &children, &deps);
        assert_eq!(analysis.waves[1].issues[0].needs, vec!["c-1"]);
    }

    #[test]
    fn cycle_reported_as_error() {
        let children = vec![child("c-1", "one"), child("c-2", "two"), child("c-3", "three")];
        let deps = edges(&[("c-1", "c-2"), ("c-2", "c-1")]);
        let analysis = analyze_waves("ep-1", &children, &deps);
        assert_eq!(analysis.errors.len(), 1);
        assert!(analysis.errors[0].contains("c-1"));
        assert!(analysis.errors[0].contains("c-2"));
        assert!(!analysis.is_parallelizable());
        // c-3 is unaffected and still waves out.
        assert_eq!(analysis.waves.len(), 1);
        assert_eq!(analysis.waves[0].issues[0].id, "c-3");
    }

    #[test]
    fn external_edge_is_a_warning() {
        let children = vec![child("c-1", "one")];
        let deps = edges(&[("other-9", "c-1")]);
        let analysis = analyze_waves("ep-1", &children, &deps);
        assert!(analysis.errors.is_empty());
        assert!(
            analysis
                .warnings
                .iter()
                .any(|w| w.contains("outside the epic"))
        );
        // The external edge does not gate the child.
        assert_eq!(analysis.waves.len(), 1);
    }

    #[test]
    fn foundation_without_dependents_warns() {
        let children = vec![child("c-1", "Foundation layer"), child("c-2", "feature")];
        let deps = edges(&[]);
        let analysis = analyze_waves("ep-1", &children, &deps);
        assert!(
            analysis
                .warnings
                .iter()
                .any(|w| w.contains("no dependents"))
        );
    }

    #[test]
    fn disconnected_nodes_warn() {
        let children = vec![child("c-1", "one"), child("c-2", "two"), child("c-3", "loner")];
        let deps = edges(&[("c-1", "c-2")]);
        let analysis = analyze_waves("ep-1", &children, &deps);
        assert!(
            analysis
                .warnings
                .iter()
                .any(|w| w.contains("not connected") && w.contains("c-3"))
        );
    }

    #[test]
    fn empty_epic() {
        let analysis = analyze_waves("ep-1", &[], &[]);
        assert_eq!(analysis.total_issues, 0);
        assert_eq!(analysis.warnings, vec!["epic has no children"]);
        assert!(analysis.errors.is_empty());
    }

    #[test]
    fn closed_children_counted() {
        let mut closed = child("c-1", "done");
        closed.status = Status::Closed;
        closed.closed_at = Some(chrono::Utc::now());
        let children = vec![closed, child("c-2", "open")];
        let analysis = analyze_waves("ep-1", &children, &[]);
        assert_eq!(analysis.closed_issues, 1);
    }
}
