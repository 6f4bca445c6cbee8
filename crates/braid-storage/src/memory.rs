//! In-memory storage backend.
//!
//! Holds everything in maps behind a `Mutex`, implementing the same
//! [`Storage`] trait as the SQLite backend. Used for `no_db` workspaces
//! (where the text mirror is the only durable artifact, loaded at open and
//! written back at exit) and for tests that want a store without a
//! filesystem.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use braid_core::comment::{Comment, Event};
use braid_core::content_hash::compute_content_hash;
use braid_core::dependency::Dependency;
use braid_core::enums::{EventType, Status};
use braid_core::filter::{IssueFilter, WorkFilter};
use braid_core::issue::Issue;
use braid_graph::GraphSnapshot;

use crate::error::{Result, StorageError};
use crate::traits::{
    BatchOptions, BatchResult, BlockedIssue, IssueUpdates, OrphanMode, Statistics, Storage,
    Transaction,
};

/// In-memory implementation of [`Storage`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default, Clone)]
struct MemoryInner {
    issues: BTreeMap<String, Issue>,
    deps: Vec<Dependency>,
    labels: BTreeMap<String, BTreeSet<String>>,
    comments: Vec<Comment>,
    events: Vec<Event>,
    config: HashMap<String, String>,
    metadata: HashMap<String, String>,
    next_comment_id: i64,
    next_event_id: i64,
}

impl MemoryStore {
    /// Creates an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated from decoded mirror records.
    ///
    /// Embedded labels and dependency edges are installed; edges whose
    /// target is missing are dropped silently (the mirror is the only
    /// authority in no_db mode, so there is nothing to reconcile against).
    pub fn from_issues(issues: Vec<Issue>) -> Self {
        let mut inner = MemoryInner::default();
        for issue in &issues {
            let mut stored = issue.clone();
            stored.content_hash = compute_content_hash(issue);
            if !issue.labels.is_empty() {
                inner
                    .labels
                    .insert(issue.id.clone(), issue.labels.iter().cloned().collect());
            }
            stored.labels = Vec::new();
            stored.dependencies = Vec::new();
            inner.issues.insert(issue.id.clone(), stored);
        }
        for issue in &issues {
            for dep in &issue.dependencies {
                let mut dep = dep.clone();
                if dep.issue_id.is_empty() {
                    dep.issue_id = issue.id.clone();
                }
                if inner.issues.contains_key(&dep.depends_on_id) {
                    inner.deps.push(dep);
                }
            }
        }
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Returns every non-tombstone issue with labels and edges attached,
    /// ready for mirror export.
    pub fn snapshot_issues(&self) -> Result<Vec<Issue>> {
        let inner = self.lock()?;
        Ok(inner
            .issues
            .values()
            .map(|issue| inner.attach_relations(issue.clone()))
            .collect())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|e| StorageError::Connection(format!("mutex poisoned: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Core operations on the inner state
// ---------------------------------------------------------------------------

impl MemoryInner {
    fn attach_relations(&self, mut issue: Issue) -> Issue {
        issue.labels = self
            .labels
            .get(&issue.id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        issue.dependencies = self
            .deps
            .iter()
            .filter(|d| d.issue_id == issue.id)
            .cloned()
            .collect();
        issue
            .dependencies
            .sort_by(|a, b| a.depends_on_id.cmp(&b.depends_on_id));
        issue
    }

    fn emit(
        &mut self,
        issue_id: &str,
        event_type: EventType,
        actor: &str,
        old_value: Option<String>,
        new_value: Option<String>,
    ) {
        self.next_event_id += 1;
        self.events.push(Event {
            id: self.next_event_id,
            issue_id: issue_id.to_owned(),
            event_type,
            actor: actor.to_owned(),
            old_value,
            new_value,
            created_at: Utc::now(),
        });
    }

    fn refresh_hash(&mut self, id: &str) {
        if let Some(issue) = self.issues.get(id).cloned() {
            let attached = self.attach_relations(issue);
            let hash = compute_content_hash(&attached);
            if let Some(stored) = self.issues.get_mut(id) {
                stored.content_hash = hash;
            }
        }
    }

    fn graph(&self) -> GraphSnapshot {
        GraphSnapshot::new(self.issues.values(), self.deps.iter())
    }

    fn require_live(&self, id: &str) -> Result<()> {
        match self.issues.get(id) {
            None => Err(StorageError::not_found("issue", id)),
            Some(issue) if issue.is_tombstone() => Err(StorageError::not_found("issue", id)),
            Some(_) => Ok(()),
        }
    }

    fn create_issue(&mut self, issue: &Issue, actor: &str) -> Result<()> {
        match self.issues.get(&issue.id) {
            Some(existing) if existing.is_tombstone() => {
                return Err(StorageError::Tombstoned {
                    id: issue.id.clone(),
                });
            }
            Some(_) => {
                return Err(StorageError::DuplicateId {
                    id: issue.id.clone(),
                });
            }
            None => {}
        }

        let mut stored = issue.clone();
        stored.content_hash = compute_content_hash(issue);
        if !issue.labels.is_empty() {
            self.labels
                .insert(issue.id.clone(), issue.labels.iter().cloned().collect());
        }
        stored.labels = Vec::new();
        stored.dependencies = Vec::new();
        self.issues.insert(issue.id.clone(), stored);
        self.emit(&issue.id, EventType::Created, actor, None, None);
        self.refresh_hash(&issue.id);
        Ok(())
    }

    fn open_blocker_count(&self, id: &str) -> usize {
        self.graph().open_blockers(id).len()
    }

    fn update_issue(&mut self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let current = self
            .issues
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("issue", id))?;

        let mut next = current.clone();
        let mut events: Vec<(EventType, Option<String>, Option<String>)> = Vec::new();

        macro_rules! text_field {
            ($field:ident) => {
                if let Some(ref val) = updates.$field {
                    if *val != current.$field {
                        events.push((
                            EventType::Updated,
                            Some(format!("{}={}", stringify!($field), current.$field)),
                            Some(format!("{}={}", stringify!($field), val)),
                        ));
                        next.$field = val.clone();
                    }
                }
            };
        }

        text_field!(title);
        text_field!(description);
        text_field!(design);
        text_field!(acceptance_criteria);
        text_field!(notes);
        text_field!(assignee);
        text_field!(spec_id);
        text_field!(close_reason);

        if let Some(priority) = updates.priority {
            if priority != current.priority {
                events.push((
                    EventType::Updated,
                    Some(format!("priority={}", current.priority)),
                    Some(format!("priority={priority}")),
                ));
                next.priority = priority;
            }
        }
        if let Some(ref issue_type) = updates.issue_type {
            if *issue_type != current.issue_type {
                events.push((
                    EventType::Updated,
                    Some(format!("issue_type={}", current.issue_type)),
                    Some(format!("issue_type={issue_type}")),
                ));
                next.issue_type = issue_type.clone();
            }
        }
        if let Some(ephemeral) = updates.ephemeral {
            if ephemeral != current.ephemeral {
                events.push((
                    EventType::Updated,
                    Some(format!("ephemeral={}", current.ephemeral)),
                    Some(format!("ephemeral={ephemeral}")),
                ));
                next.ephemeral = ephemeral;
            }
        }
        if let Some(compaction_level) = updates.compaction_level {
            if compaction_level != current.compaction_level {
                events.push((
                    EventType::Updated,
                    Some(format!("compaction_level={}", current.compaction_level)),
                    Some(format!("compaction_level={compaction_level}")),
                ));
                next.compaction_level = compaction_level;
            }
        }
        if let Some(ref est) = updates.estimated_minutes {
            if *est != current.estimated_minutes {
                events.push((
                    EventType::Updated,
                    Some(format!("estimated_minutes={:?}", current.estimated_minutes)),
                    Some(format!("estimated_minutes={est:?}")),
                ));
                next.estimated_minutes = *est;
            }
        }
        if let Some(ref sca) = updates.spec_changed_at {
            if *sca != current.spec_changed_at {
                events.push((
                    EventType::Updated,
                    Some("spec_changed_at".to_owned()),
                    sca.as_ref().map(|t| t.to_rfc3339()),
                ));
                next.spec_changed_at = *sca;
            }
        }

        let mut closedness_changed = false;
        if let Some(ref status) = updates.status {
            if *status != current.status {
                if *status == Status::Blocked && self.open_blocker_count(id) == 0 {
                    return Err(StorageError::validation(
                        format!("{id} has no unclosed blocking dependency"),
                        "status_blocked_requires_blocker",
                    ));
                }
                let was_closed = !current.status.is_unclosed();
                let is_closed = !status.is_unclosed();
                if is_closed && !was_closed {
                    next.closed_at = Some(Utc::now());
                    events.push((
                        EventType::Closed,
                        Some(current.status.as_str().to_owned()),
                        Some(status.as_str().to_owned()),
                    ));
                    closedness_changed = true;
                } else if !is_closed && was_closed {
                    next.closed_at = None;
                    next.close_reason = String::new();
                    events.push((
                        EventType::Reopened,
                        Some(current.status.as_str().to_owned()),
                        Some(status.as_str().to_owned()),
                    ));
                    closedness_changed = true;
                } else {
                    events.push((
                        EventType::StatusChanged,
                        Some(current.status.as_str().to_owned()),
                        Some(status.as_str().to_owned()),
                    ));
                }
                next.status = status.clone();
            }
        }

        if events.is_empty() {
            return Ok(());
        }

        next.updated_at = Utc::now();
        self.issues.insert(id.to_owned(), next);
        for (event_type, old, new) in events {
            self.emit(id, event_type, actor, old, new);
        }
        self.refresh_hash(id);

        if closedness_changed {
            self.recompute_dependents(id, actor);
        }
        Ok(())
    }

    fn close_issue(&mut self, id: &str, reason: &str, actor: &str) -> Result<()> {
        let issue = self
            .issues
            .get_mut(id)
            .ok_or_else(|| StorageError::not_found("issue", id))?;
        if issue.is_tombstone() {
            return Err(StorageError::not_found("issue", id));
        }
        issue.status = Status::Closed;
        issue.closed_at = Some(Utc::now());
        issue.close_reason = reason.to_owned();
        issue.updated_at = Utc::now();
        self.emit(id, EventType::Closed, actor, None, Some(reason.to_owned()));
        self.refresh_hash(id);
        self.recompute_dependents(id, actor);
        Ok(())
    }

    fn delete_issue(&mut self, id: &str, actor: &str) -> Result<()> {
        let current = self
            .issues
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("issue", id))?;
        if current.is_tombstone() {
            return Ok(());
        }

        let old_status = current.status.clone();
        if let Some(issue) = self.issues.get_mut(id) {
            issue.status = Status::Tombstone;
            issue.description = String::new();
            issue.design = String::new();
            issue.acceptance_criteria = String::new();
            issue.notes = String::new();
            issue.assignee = String::new();
            issue.close_reason = String::new();
            issue.closed_at = None;
            issue.extra.clear();
            issue.updated_at = Utc::now();
        }

        self.deps
            .retain(|d| d.issue_id != id && d.depends_on_id != id);
        self.labels.remove(id);

        self.emit(
            id,
            EventType::Deleted,
            actor,
            Some(old_status.as_str().to_owned()),
            Some("tombstone".to_owned()),
        );
        self.refresh_hash(id);
        self.recompute_dependents(id, actor);
        Ok(())
    }

    fn add_dependency(&mut self, dep: &Dependency, actor: &str) -> Result<()> {
        self.require_live(&dep.issue_id)?;
        self.require_live(&dep.depends_on_id)?;

        if dep.dep_type.affects_readiness() {
            if let Some(path) = self
                .graph()
                .find_cycle_path(&dep.issue_id, &dep.depends_on_id)
            {
                return Err(StorageError::CycleDetected { path });
            }
        }

        self.deps
            .retain(|d| !(d.issue_id == dep.issue_id && d.depends_on_id == dep.depends_on_id));
        self.deps.push(dep.clone());

        self.emit(
            &dep.issue_id,
            EventType::DependencyAdded,
            actor,
            None,
            Some(format!("{} ({})", dep.depends_on_id, dep.dep_type)),
        );
        self.refresh_hash(&dep.issue_id);
        if dep.dep_type.affects_readiness() {
            self.recompute_blocked(&dep.issue_id, actor);
        }
        Ok(())
    }

    fn remove_dependency(
        &mut self,
        issue_id: &str,
        depends_on_id: &str,
        actor: &str,
    ) -> Result<()> {
        let before = self.deps.len();
        self.deps
            .retain(|d| !(d.issue_id == issue_id && d.depends_on_id == depends_on_id));
        if self.deps.len() == before {
            return Err(StorageError::not_found(
                "dependency",
                format!("{issue_id} -> {depends_on_id}"),
            ));
        }
        self.emit(
            issue_id,
            EventType::DependencyRemoved,
            actor,
            Some(depends_on_id.to_owned()),
            None,
        );
        self.refresh_hash(issue_id);
        self.recompute_blocked(issue_id, actor);
        Ok(())
    }

    fn recompute_blocked(&mut self, id: &str, actor: &str) {
        let Some(current) = self.issues.get(id).cloned() else {
            return;
        };
        let blockers = self.open_blocker_count(id);
        let new_status = match (&current.status, blockers > 0) {
            (Status::Open | Status::InProgress, true) => Some(Status::Blocked),
            (Status::Blocked, false) => Some(Status::Open),
            _ => None,
        };
        if let Some(new_status) = new_status {
            let old = current.status.as_str().to_owned();
            if let Some(issue) = self.issues.get_mut(id) {
                issue.status = new_status.clone();
                issue.updated_at = Utc::now();
            }
            self.emit(
                id,
                EventType::StatusChanged,
                actor,
                Some(old),
                Some(new_status.as_str().to_owned()),
            );
            self.refresh_hash(id);
        }
    }

    fn recompute_dependents(&mut self, id: &str, actor: &str) {
        let dependents: Vec<String> = self
            .deps
            .iter()
            .filter(|d| d.depends_on_id == id && d.dep_type.affects_readiness())
            .map(|d| d.issue_id.clone())
            .collect();
        for dependent in dependents {
            self.recompute_blocked(&dependent, actor);
        }
    }

    fn add_label(&mut self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        self.require_live(issue_id)?;
        let inserted = self
            .labels
            .entry(issue_id.to_owned())
            .or_default()
            .insert(label.to_owned());
        if inserted {
            self.emit(
                issue_id,
                EventType::LabelAdded,
                actor,
                None,
                Some(label.to_owned()),
            );
            self.refresh_hash(issue_id);
        }
        Ok(())
    }

    fn remove_label(&mut self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        let removed = self
            .labels
            .get_mut(issue_id)
            .is_some_and(|set| set.remove(label));
        if !removed {
            return Err(StorageError::not_found(
                "label",
                format!("{issue_id}:{label}"),
            ));
        }
        self.emit(
            issue_id,
            EventType::LabelRemoved,
            actor,
            Some(label.to_owned()),
            None,
        );
        self.refresh_hash(issue_id);
        Ok(())
    }

    fn add_comment(&mut self, issue_id: &str, author: &str, text: &str) -> Result<Comment> {
        self.require_live(issue_id)?;
        self.next_comment_id += 1;
        let comment = Comment {
            id: self.next_comment_id,
            issue_id: issue_id.to_owned(),
            author: author.to_owned(),
            text: text.to_owned(),
            created_at: Utc::now(),
        };
        self.comments.push(comment.clone());
        self.emit(issue_id, EventType::Commented, author, None, None);
        Ok(comment)
    }

    fn import_comment(
        &mut self,
        issue_id: &str,
        author: &str,
        text: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Comment> {
        self.require_live(issue_id)?;
        self.next_comment_id += 1;
        let comment = Comment {
            id: self.next_comment_id,
            issue_id: issue_id.to_owned(),
            author: author.to_owned(),
            text: text.to_owned(),
            created_at,
        };
        self.comments.push(comment.clone());
        Ok(comment)
    }

    fn import_issue(&mut self, issue: &Issue, actor: &str) -> Result<()> {
        match self.issues.get(&issue.id) {
            Some(existing) if existing.is_tombstone() => {
                return Err(StorageError::Tombstoned {
                    id: issue.id.clone(),
                });
            }
            None => {
                return self.create_issue(issue, actor);
            }
            Some(_) => {}
        }

        let mut stored = issue.clone();
        stored.labels = Vec::new();
        stored.dependencies = Vec::new();
        if issue.labels.is_empty() {
            self.labels.remove(&issue.id);
        } else {
            self.labels
                .insert(issue.id.clone(), issue.labels.iter().cloned().collect());
        }
        self.issues.insert(issue.id.clone(), stored);
        self.emit(&issue.id, EventType::Imported, actor, None, None);
        self.refresh_hash(&issue.id);
        Ok(())
    }

    fn import_dependencies(&mut self, issue_id: &str, deps: &[Dependency]) -> Result<Vec<String>> {
        self.deps.retain(|d| d.issue_id != issue_id);

        let mut warnings = Vec::new();
        for dep in deps {
            let mut dep = dep.clone();
            if dep.issue_id.is_empty() {
                dep.issue_id = issue_id.to_owned();
            }
            if dep.dep_type.affects_readiness() {
                if let Some(path) = self
                    .graph()
                    .find_cycle_path(&dep.issue_id, &dep.depends_on_id)
                {
                    warnings.push(format!(
                        "cycle: dropped edge {} -> {} ({})",
                        dep.issue_id,
                        dep.depends_on_id,
                        path.join(" -> ")
                    ));
                    continue;
                }
            }
            self.deps.push(dep);
        }

        self.refresh_hash(issue_id);
        Ok(warnings)
    }

    fn search(&self, query: &str, filter: &IssueFilter) -> Vec<Issue> {
        let mut results: Vec<Issue> = self
            .issues
            .values()
            .filter(|issue| self.matches(issue, query, filter))
            .map(|issue| self.attach_relations(issue.clone()))
            .collect();
        results.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        if let Some(limit) = filter.limit {
            results.truncate(limit.max(0) as usize);
        }
        results
    }

    fn matches(&self, issue: &Issue, query: &str, filter: &IssueFilter) -> bool {
        if !query.is_empty() {
            let q = query.to_lowercase();
            let hit = issue.title.to_lowercase().contains(&q)
                || issue.description.to_lowercase().contains(&q)
                || issue.notes.to_lowercase().contains(&q);
            if !hit {
                return false;
            }
        }
        match filter.status {
            Some(ref status) => {
                if issue.status != *status {
                    return false;
                }
            }
            None => {
                if issue.is_tombstone() {
                    return false;
                }
            }
        }
        if let Some(priority) = filter.priority {
            if issue.priority != priority {
                return false;
            }
        }
        if let Some(ref issue_type) = filter.issue_type {
            if issue.issue_type != *issue_type {
                return false;
            }
        }
        if let Some(ref assignee) = filter.assignee {
            if issue.assignee != *assignee {
                return false;
            }
        }
        if let Some(ref t) = filter.title_contains {
            if !issue.title.contains(t.as_str()) {
                return false;
            }
        }
        if let Some(ref d) = filter.description_contains {
            if !issue.description.contains(d.as_str()) {
                return false;
            }
        }
        if let Some(after) = filter.created_after {
            if issue.created_at < after {
                return false;
            }
        }
        if let Some(before) = filter.created_before {
            if issue.created_at > before {
                return false;
            }
        }
        if let Some(after) = filter.updated_after {
            if issue.updated_at < after {
                return false;
            }
        }
        if let Some(before) = filter.updated_before {
            if issue.updated_at > before {
                return false;
            }
        }
        if filter.no_assignee && !issue.assignee.is_empty() {
            return false;
        }
        if let Some(ephemeral) = filter.ephemeral {
            if issue.ephemeral != ephemeral {
                return false;
            }
        }
        if filter.exclude_status.contains(&issue.status) {
            return false;
        }
        if !filter.ids.is_empty() && !filter.ids.contains(&issue.id) {
            return false;
        }
        let empty = BTreeSet::new();
        let labels = self.labels.get(&issue.id).unwrap_or(&empty);
        if !filter.labels.iter().all(|l| labels.contains(l)) {
            return false;
        }
        if !filter.labels_any.is_empty() && !filter.labels_any.iter().any(|l| labels.contains(l)) {
            return false;
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Storage implementation
// ---------------------------------------------------------------------------

impl Storage for MemoryStore {
    fn create_issue(&self, issue: &Issue, actor: &str) -> Result<()> {
        self.lock()?.create_issue(issue, actor)
    }

    fn create_issues(
        &self,
        issues: &[Issue],
        actor: &str,
        options: BatchOptions,
    ) -> Result<BatchResult> {
        let mut inner = self.lock()?;
        // Work on a copy so a mid-batch failure changes nothing.
        let mut staged = inner.clone();
        let mut result = BatchResult::default();

        for issue in issues {
            staged.create_issue(issue, actor)?;
            result.created += 1;
        }
        for issue in issues {
            for dep in &issue.dependencies {
                let mut dep = dep.clone();
                if dep.issue_id.is_empty() {
                    dep.issue_id = issue.id.clone();
                }
                let target_live = staged
                    .issues
                    .get(&dep.depends_on_id)
                    .is_some_and(|i| !i.is_tombstone());
                if !target_live {
                    match options.orphan_mode {
                        OrphanMode::Fail => {
                            return Err(StorageError::not_found("issue", &dep.depends_on_id));
                        }
                        OrphanMode::Allow | OrphanMode::Warn => {
                            result
                                .orphaned_edges
                                .push((dep.issue_id.clone(), dep.depends_on_id.clone()));
                            continue;
                        }
                    }
                }
                staged.add_dependency(&dep, actor)?;
            }
        }

        *inner = staged;
        Ok(result)
    }

    fn get_issue(&self, id: &str) -> Result<Issue> {
        let inner = self.lock()?;
        inner
            .issues
            .get(id)
            .map(|issue| inner.attach_relations(issue.clone()))
            .ok_or_else(|| StorageError::not_found("issue", id))
    }

    fn get_issues_by_ids(&self, ids: &[String]) -> Result<Vec<Issue>> {
        let inner = self.lock()?;
        Ok(ids
            .iter()
            .filter_map(|id| inner.issues.get(id))
            .map(|issue| inner.attach_relations(issue.clone()))
            .collect())
    }

    fn update_issue(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()> {
        self.lock()?.update_issue(id, updates, actor)
    }

    fn close_issue(&self, id: &str, reason: &str, actor: &str) -> Result<()> {
        self.lock()?.close_issue(id, reason, actor)
    }

    fn delete_issue(&self, id: &str, actor: &str) -> Result<()> {
        self.lock()?.delete_issue(id, actor)
    }

    fn update_issue_id(&self, old_id: &str, new_id: &str, actor: &str) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.issues.contains_key(new_id) {
            return Err(StorageError::DuplicateId {
                id: new_id.to_owned(),
            });
        }
        let mut issue = inner
            .issues
            .remove(old_id)
            .ok_or_else(|| StorageError::not_found("issue", old_id))?;
        issue.id = new_id.to_owned();
        issue.updated_at = Utc::now();
        inner.issues.insert(new_id.to_owned(), issue);

        for dep in inner.deps.iter_mut() {
            if dep.issue_id == old_id {
                dep.issue_id = new_id.to_owned();
            }
            if dep.depends_on_id == old_id {
                dep.depends_on_id = new_id.to_owned();
            }
        }
        if let Some(labels) = inner.labels.remove(old_id) {
            inner.labels.insert(new_id.to_owned(), labels);
        }
        for comment in inner.comments.iter_mut() {
            if comment.issue_id == old_id {
                comment.issue_id = new_id.to_owned();
            }
        }
        for event in inner.events.iter_mut() {
            if event.issue_id == old_id {
                event.issue_id = new_id.to_owned();
            }
        }
        inner.emit(
            new_id,
            EventType::Updated,
            actor,
            Some(format!("id={old_id}")),
            Some(format!("id={new_id}")),
        );
        Ok(())
    }

    fn search_issues(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>> {
        Ok(self.lock()?.search(query, filter))
    }

    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()> {
        self.lock()?.add_dependency(dep, actor)
    }

    fn remove_dependency(&self, issue_id: &str, depends_on_id: &str, actor: &str) -> Result<()> {
        self.lock()?.remove_dependency(issue_id, depends_on_id, actor)
    }

    fn get_dependencies(&self, issue_id: &str) -> Result<Vec<Issue>> {
        let inner = self.lock()?;
        let mut out: Vec<Issue> = inner
            .deps
            .iter()
            .filter(|d| d.issue_id == issue_id)
            .filter_map(|d| inner.issues.get(&d.depends_on_id))
            .map(|issue| inner.attach_relations(issue.clone()))
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    fn get_dependents(&self, issue_id: &str) -> Result<Vec<Issue>> {
        let inner = self.lock()?;
        let mut out: Vec<Issue> = inner
            .deps
            .iter()
            .filter(|d| d.depends_on_id == issue_id)
            .filter_map(|d| inner.issues.get(&d.issue_id))
            .map(|issue| inner.attach_relations(issue.clone()))
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        let inner = self.lock()?;
        let mut out: Vec<Dependency> = inner
            .deps
            .iter()
            .filter(|d| d.issue_id == issue_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.depends_on_id.cmp(&b.depends_on_id));
        Ok(out)
    }

    fn get_all_dependency_records(&self) -> Result<Vec<Dependency>> {
        let inner = self.lock()?;
        let mut out = inner.deps.clone();
        out.sort_by(|a, b| {
            a.issue_id
                .cmp(&b.issue_id)
                .then_with(|| a.depends_on_id.cmp(&b.depends_on_id))
        });
        Ok(out)
    }

    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        self.lock()?.add_label(issue_id, label, actor)
    }

    fn remove_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        self.lock()?.remove_label(issue_id, label, actor)
    }

    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>> {
        let inner = self.lock()?;
        Ok(inner
            .labels
            .get(issue_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn get_ready_work(&self, filter: &WorkFilter) -> Result<Vec<Issue>> {
        let inner = self.lock()?;
        let graph = inner.graph();
        let ready_ids: BTreeSet<String> = graph.ready_ids().into_iter().collect();

        let mut ready: Vec<Issue> = inner
            .issues
            .values()
            .filter(|issue| ready_ids.contains(&issue.id))
            .filter(|issue| filter.include_ephemeral || !issue.ephemeral)
            .filter(|issue| {
                filter
                    .issue_type
                    .as_ref()
                    .is_none_or(|t| issue.issue_type == *t)
            })
            .filter(|issue| filter.priority.is_none_or(|p| issue.priority == p))
            .filter(|issue| {
                filter
                    .assignee
                    .as_ref()
                    .is_none_or(|a| issue.assignee == *a)
            })
            .filter(|issue| !filter.unassigned || issue.assignee.is_empty())
            .filter(|issue| {
                let empty = BTreeSet::new();
                let labels = inner.labels.get(&issue.id).unwrap_or(&empty);
                filter.labels.iter().all(|l| labels.contains(l))
            })
            .map(|issue| inner.attach_relations(issue.clone()))
            .collect();

        match filter.sort_policy {
            braid_core::enums::SortPolicy::Oldest => {
                ready.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
            }
            _ => {
                ready.sort_by(|a, b| {
                    a.priority
                        .cmp(&b.priority)
                        .then_with(|| a.created_at.cmp(&b.created_at))
                        .then_with(|| a.id.cmp(&b.id))
                });
            }
        }
        if let Some(limit) = filter.limit {
            ready.truncate(limit.max(0) as usize);
        }
        Ok(ready)
    }

    fn get_blocked_issues(&self, filter: &WorkFilter) -> Result<Vec<BlockedIssue>> {
        let inner = self.lock()?;
        let graph = inner.graph();

        let mut result: Vec<BlockedIssue> = graph
            .blocked()
            .into_iter()
            .filter_map(|entry| {
                let issue = inner.issues.get(&entry.id)?;
                if !filter.include_ephemeral && issue.ephemeral {
                    return None;
                }
                if let Some(ref assignee) = filter.assignee {
                    if issue.assignee != *assignee {
                        return None;
                    }
                }
                if let Some(priority) = filter.priority {
                    if issue.priority != priority {
                        return None;
                    }
                }
                Some(BlockedIssue {
                    issue: inner.attach_relations(issue.clone()),
                    blocked_by: entry.blocked_by,
                })
            })
            .collect();

        result.sort_by(|a, b| {
            a.issue
                .priority
                .cmp(&b.issue.priority)
                .then_with(|| a.issue.created_at.cmp(&b.issue.created_at))
                .then_with(|| a.issue.id.cmp(&b.issue.id))
        });
        if let Some(limit) = filter.limit {
            result.truncate(limit.max(0) as usize);
        }
        Ok(result)
    }

    fn add_comment(&self, issue_id: &str, author: &str, text: &str) -> Result<Comment> {
        self.lock()?.add_comment(issue_id, author, text)
    }

    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>> {
        let inner = self.lock()?;
        Ok(inner
            .comments
            .iter()
            .filter(|c| c.issue_id == issue_id)
            .cloned()
            .collect())
    }

    fn get_events(&self, issue_id: &str, limit: i32) -> Result<Vec<Event>> {
        let inner = self.lock()?;
        let mut events: Vec<Event> = inner
            .events
            .iter()
            .filter(|e| e.issue_id == issue_id)
            .cloned()
            .collect();
        events.reverse();
        events.truncate(limit.max(0) as usize);
        Ok(events)
    }

    fn get_all_events_since(&self, since_id: i64) -> Result<Vec<Event>> {
        let inner = self.lock()?;
        Ok(inner
            .events
            .iter()
            .filter(|e| e.id > since_id)
            .cloned()
            .collect())
    }

    fn get_statistics(&self) -> Result<Statistics> {
        let inner = self.lock()?;
        let mut stats = Statistics::default();
        let mut by_type: BTreeMap<String, i64> = BTreeMap::new();
        let mut by_priority: BTreeMap<i32, i64> = BTreeMap::new();
        let mut by_assignee: BTreeMap<String, i64> = BTreeMap::new();

        for issue in inner.issues.values() {
            match issue.status {
                Status::Tombstone => {
                    stats.tombstones += 1;
                    continue;
                }
                Status::Open => stats.open_issues += 1,
                Status::InProgress => stats.in_progress_issues += 1,
                Status::Blocked => stats.blocked_issues += 1,
                Status::Closed => stats.closed_issues += 1,
                Status::Deferred => stats.deferred_issues += 1,
                _ => {}
            }
            stats.total_issues += 1;
            *by_type.entry(issue.issue_type.as_str().to_owned()).or_default() += 1;
            *by_priority.entry(issue.priority).or_default() += 1;
            if issue.status != Status::Closed {
                let assignee = if issue.assignee.is_empty() {
                    "(unassigned)".to_owned()
                } else {
                    issue.assignee.clone()
                };
                *by_assignee.entry(assignee).or_default() += 1;
            }
        }

        stats.by_type = by_type.into_iter().collect();
        stats.by_type.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        stats.by_priority = by_priority.into_iter().collect();
        stats.by_assignee = by_assignee.into_iter().collect();
        stats.by_assignee.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(stats)
    }

    fn set_config(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.config.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn get_config(&self, key: &str) -> Result<String> {
        self.lock()?
            .config
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::not_found("config", key))
    }

    fn get_all_config(&self) -> Result<HashMap<String, String>> {
        Ok(self.lock()?.config.clone())
    }

    fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?
            .metadata
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn get_metadata(&self, key: &str) -> Result<String> {
        self.lock()?
            .metadata
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::not_found("metadata", key))
    }

    fn next_sequence(&self) -> Result<u64> {
        let mut inner = self.lock()?;
        let current: u64 = inner
            .metadata
            .get("id_seq")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let next = current + 1;
        inner.metadata.insert("id_seq".to_owned(), next.to_string());
        Ok(next)
    }

    fn run_in_transaction(&self, f: &dyn Fn(&dyn Transaction) -> Result<()>) -> Result<()> {
        let mut inner = self.lock()?;
        // Clone-and-swap gives rollback for free.
        let staged = MemoryTx {
            inner: RefCell::new(inner.clone()),
        };
        f(&staged)?;
        *inner = staged.inner.into_inner();
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Transaction wrapper
// ---------------------------------------------------------------------------

struct MemoryTx {
    inner: RefCell<MemoryInner>,
}

impl Transaction for MemoryTx {
    fn create_issue(&self, issue: &Issue, actor: &str) -> Result<()> {
        self.inner.borrow_mut().create_issue(issue, actor)
    }

    fn update_issue(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()> {
        self.inner.borrow_mut().update_issue(id, updates, actor)
    }

    fn close_issue(&self, id: &str, reason: &str, actor: &str) -> Result<()> {
        self.inner.borrow_mut().close_issue(id, reason, actor)
    }

    fn delete_issue(&self, id: &str, actor: &str) -> Result<()> {
        self.inner.borrow_mut().delete_issue(id, actor)
    }

    fn get_issue(&self, id: &str) -> Result<Issue> {
        let inner = self.inner.borrow();
        inner
            .issues
            .get(id)
            .map(|issue| inner.attach_relations(issue.clone()))
            .ok_or_else(|| StorageError::not_found("issue", id))
    }

    fn search_issues(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>> {
        Ok(self.inner.borrow().search(query, filter))
    }

    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()> {
        self.inner.borrow_mut().add_dependency(dep, actor)
    }

    fn remove_dependency(&self, issue_id: &str, depends_on_id: &str, actor: &str) -> Result<()> {
        self.inner
            .borrow_mut()
            .remove_dependency(issue_id, depends_on_id, actor)
    }

    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        let inner = self.inner.borrow();
        let mut out: Vec<Dependency> = inner
            .deps
            .iter()
            .filter(|d| d.issue_id == issue_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.depends_on_id.cmp(&b.depends_on_id));
        Ok(out)
    }

    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        self.inner.borrow_mut().add_label(issue_id, label, actor)
    }

    fn remove_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        self.inner.borrow_mut().remove_label(issue_id, label, actor)
    }

    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>> {
        Ok(self
            .inner
            .borrow()
            .labels
            .get(issue_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn set_config(&self, key: &str, value: &str) -> Result<()> {
        self.inner
            .borrow_mut()
            .config
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn get_config(&self, key: &str) -> Result<String> {
        self.inner
            .borrow()
            .config
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::not_found("config", key))
    }

    fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.inner
            .borrow_mut()
            .metadata
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn get_metadata(&self, key: &str) -> Result<String> {
        self.inner
            .borrow()
            .metadata
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::not_found("metadata", key))
    }

    fn add_comment(&self, issue_id: &str, author: &str, text: &str) -> Result<Comment> {
        self.inner.borrow_mut().add_comment(issue_id, author, text)
    }

    fn import_comment(
        &self,
        issue_id: &str,
        author: &str,
        text: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Comment> {
        self.inner
            .borrow_mut()
            .import_comment(issue_id, author, text, created_at)
    }

    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>> {
        Ok(self
            .inner
            .borrow()
            .comments
            .iter()
            .filter(|c| c.issue_id == issue_id)
            .cloned()
            .collect())
    }

    fn import_issue(&self, issue: &Issue, actor: &str) -> Result<()> {
        self.inner.borrow_mut().import_issue(issue, actor)
    }

    fn import_dependencies(&self, issue_id: &str, deps: &[Dependency]) -> Result<Vec<String>> {
        self.inner.borrow_mut().import_dependencies(issue_id, deps)
    }
}
