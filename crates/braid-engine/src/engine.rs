//! The [`Engine`]: every operation a workspace supports, behind one handle.
//!
//! Mutations run a fixed gauntlet -- deadline, readonly, fresh-clone,
//! auto-import, staleness -- then hit the store, mark the workspace dirty
//! for the flush manager, and publish onto the mutation bus. The daemon
//! dispatcher and the direct-mode client both sit directly on this type.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use braid_config::{BraidConfig, WorkspacePaths, config::IdMode};
use braid_core::comment::{Comment, Event};
use braid_core::dependency::Dependency;
use braid_core::enums::{DependencyType, IssueType, Status};
use braid_core::filter::{IssueFilter, WorkFilter};
use braid_core::format;
use braid_core::idgen;
use braid_core::issue::{Issue, IssueBuilder};
use braid_core::validation;
use braid_graph::{WaveAnalysis, analyze_waves};
use braid_storage::sqlite::schema::metadata_keys;
use braid_storage::{
    BlockedIssue, IssueUpdates, MemoryStore, SqliteStore, Statistics, Storage, StorageError,
};
use braid_sync::flush::{FlushManager, FlushStatus};
use braid_sync::{ExportStats, ImportOptions, ImportReport, Staleness};

use crate::bus::{MutationBus, MutationEvent};
use crate::context::{Capabilities, OpContext};
use crate::error::{EngineError, Result};

/// Default busy timeout when the `lock_timeout` capability is unset.
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Parameters for creating an issue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewIssue {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub design: String,
    #[serde(default)]
    pub acceptance_criteria: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub issue_type: Option<String>,
    #[serde(default)]
    pub assignee: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub ephemeral: bool,
    #[serde(default)]
    pub estimated_minutes: Option<i32>,
    /// Explicit ID; minted when absent.
    #[serde(default)]
    pub id: Option<String>,
}

/// The mirror's relationship to the store, as reported by `VcsStatus`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorStatus {
    pub path: String,
    pub exists: bool,
    pub fresh: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Workspace summary returned by the `Status` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSummary {
    pub prefix: Option<String>,
    pub total_issues: i64,
    pub open_issues: i64,
    pub in_progress_issues: i64,
    pub blocked_issues: i64,
    pub closed_issues: i64,
    pub ready_count: usize,
    pub mirror_fresh: bool,
    pub flush_failures: u32,
}

/// How a mutation interacts with the auto-import gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImportGate {
    /// Pull in a newer mirror before mutating.
    AutoImport,
    /// Never auto-import (deletes must not resurrect IDs; imports recurse).
    Skip,
}

/// The operation surface of one workspace.
pub struct Engine {
    paths: WorkspacePaths,
    config: BraidConfig,
    caps: Capabilities,
    store: Arc<dyn Storage>,
    flush: Option<FlushManager>,
    bus: Arc<MutationBus>,
    fresh_clone: Mutex<Option<String>>,
    no_db: bool,
}

impl Engine {
    /// Opens the workspace: store (SQLite or in-memory for `no_db`), flush
    /// manager, mutation bus. Fresh-clone detection runs here; the guide is
    /// surfaced by every subsequent mutation until an import resolves it.
    pub fn open(
        paths: WorkspacePaths,
        config: BraidConfig,
        caps: Capabilities,
    ) -> Result<Self> {
        let no_db = caps.no_db || config.no_db;
        let mirror = paths.mirror_file();

        let store: Arc<dyn Storage> = if no_db {
            debug!("opening mirror-only (no_db) store");
            if mirror.exists() {
                let bytes = std::fs::read(&mirror).map_err(braid_sync::SyncError::Io)?;
                let (issues, warnings) =
                    format::decode_any(&bytes).map_err(braid_sync::SyncError::Format)?;
                for w in &warnings {
                    warn!(line = w.line, "{}", w.message);
                }
                Arc::new(MemoryStore::from_issues(issues))
            } else {
                Arc::new(MemoryStore::new())
            }
        } else {
            let busy = caps.lock_timeout.unwrap_or(DEFAULT_BUSY_TIMEOUT);
            Arc::new(SqliteStore::open_with_busy_timeout(paths.db_file(), busy)?)
        };

        // Adopt the configured prefix on first open.
        if let Some(ref prefix) = config.prefix {
            validation::validate_prefix(prefix)?;
            if store.get_config("issue_prefix").is_err() && !caps.readonly {
                store.set_config("issue_prefix", prefix)?;
            }
        }
        if !caps.readonly {
            store.set_metadata(
                metadata_keys::LAST_BRAID_VERSION,
                env!("CARGO_PKG_VERSION"),
            )?;
        }

        let fresh_clone = if braid_sync::is_fresh_clone(store.as_ref(), &mirror) {
            let guide = braid_sync::fresh_clone_guide(&mirror);
            info!("{guide}");
            Some(guide)
        } else {
            None
        };

        let flush = if caps.no_auto_flush || no_db {
            None
        } else {
            let flush_store = Arc::clone(&store);
            let flush_path = mirror.clone();
            Some(FlushManager::start(
                Duration::from_secs(config.flush_debounce_secs),
                Box::new(move || {
                    braid_sync::export(flush_store.as_ref(), &flush_path)
                        .map(|_| ())
                        .map_err(|e| e.to_string())
                }),
            ))
        };

        Ok(Self {
            paths,
            config,
            caps,
            store,
            flush,
            bus: Arc::new(MutationBus::default()),
            fresh_clone: Mutex::new(fresh_clone),
            no_db,
        })
    }

    /// The workspace's configured issue prefix, if any.
    pub fn prefix(&self) -> Option<String> {
        self.store
            .get_config("issue_prefix")
            .ok()
            .or_else(|| self.config.prefix.clone())
    }

    /// The fresh-clone guide, when this workspace needs a bootstrap import.
    pub fn fresh_clone_guide(&self) -> Option<String> {
        self.fresh_clone.lock().ok().and_then(|g| g.clone())
    }

    /// Observable flush health; `None` when auto-flush is disabled.
    pub fn flush_status(&self) -> Option<FlushStatus> {
        self.flush.as_ref().map(|f| f.status())
    }

    /// Consecutive flush failures that flip health to degraded.
    pub fn flush_failure_threshold(&self) -> u32 {
        self.config.flush_failure_threshold
    }

    /// Direct handle to the store (read paths in the dispatcher).
    pub fn store(&self) -> &dyn Storage {
        self.store.as_ref()
    }

    // -- Mutation gauntlet ---------------------------------------------------

    fn guard_mutation(&self, ctx: &OpContext, gate: ImportGate) -> Result<()> {
        ctx.check_deadline()?;
        if self.caps.readonly {
            return Err(EngineError::Readonly);
        }
        if let Some(guide) = self.fresh_clone_guide() {
            return Err(EngineError::FreshClone { guide });
        }

        let mirror = self.paths.mirror_file();
        if gate == ImportGate::AutoImport && !self.caps.no_auto_import {
            braid_sync::auto_import_if_newer(self.store.as_ref(), &mirror, &ctx.actor)?;
        }
        match braid_sync::staleness_check(self.store.as_ref(), &mirror)? {
            Staleness::Fresh => Ok(()),
            Staleness::Stale { .. } if self.caps.allow_stale => Ok(()),
            Staleness::Stale { reason } => Err(braid_sync::SyncError::Stale { reason }.into()),
        }
    }

    fn mark_dirty(&self) {
        if let Some(ref flush) = self.flush {
            flush.mark_dirty();
        }
        let _ = self.store.set_metadata(
            metadata_keys::LAST_ACTIVITY_AT,
            &chrono::Utc::now().to_rfc3339(),
        );
    }

    fn publish(
        &self,
        entity: &str,
        kind: &str,
        id: &str,
        old: Option<String>,
        new: Option<String>,
    ) {
        self.bus.publish(entity, kind, id, old, new);
    }

    // -- Issue lifecycle -----------------------------------------------------

    /// Creates an issue, minting an ID when none is supplied.
    pub fn create_issue(&self, ctx: &OpContext, params: &NewIssue) -> Result<Issue> {
        self.guard_mutation(ctx, ImportGate::AutoImport)?;

        let prefix = self.prefix().ok_or_else(|| {
            EngineError::Storage(StorageError::NotInitialized {
                reason: "workspace has no issue prefix configured".into(),
            })
        })?;

        let issue_type = params
            .issue_type
            .as_deref()
            .map(|t| IssueType::from(t).normalize())
            .unwrap_or_default();

        let mut builder = IssueBuilder::new(params.title.trim())
            .description(&params.description)
            .design(&params.design)
            .acceptance_criteria(&params.acceptance_criteria)
            .notes(&params.notes)
            .issue_type(issue_type)
            .assignee(&params.assignee)
            .ephemeral(params.ephemeral)
            .created_by(&ctx.actor);
        if let Some(priority) = params.priority {
            builder = builder.priority(priority);
        }
        if let Some(minutes) = params.estimated_minutes {
            builder = builder.estimated_minutes(minutes);
        }
        let mut issue = builder.build();

        let custom_statuses = self.config.custom_status_list();
        let custom_types = self.config.custom_type_list();
        validation::validate_with_custom(
            &issue,
            &custom_statuses.iter().map(String::as_str).collect::<Vec<_>>(),
            &custom_types.iter().map(String::as_str).collect::<Vec<_>>(),
        )?;

        issue.id = match params.id {
            Some(ref explicit) => {
                validation::validate_id_prefix(explicit, &prefix)?;
                explicit.clone()
            }
            None => self.mint_id(&prefix, &issue, &ctx.actor)?,
        };

        self.store.create_issue(&issue, &ctx.actor)?;
        for label in &params.labels {
            self.store.add_label(&issue.id, label, &ctx.actor)?;
        }

        self.publish("issue", "created", &issue.id, None, Some(issue.title.clone()));
        self.mark_dirty();
        self.get_issue(ctx, &issue.id)
    }

    fn mint_id(&self, prefix: &str, issue: &Issue, actor: &str) -> Result<String> {
        match self.config.id_mode {
            IdMode::Sequential => loop {
                let seq = self.store.next_sequence()?;
                let candidate = idgen::generate_sequential_id(prefix, seq);
                match self.store.get_issue(&candidate) {
                    Err(e) if e.is_not_found() => return Ok(candidate),
                    Ok(_) => continue,
                    Err(e) => return Err(e.into()),
                }
            },
            IdMode::Hash => {
                let count = self.store.get_statistics()?.total_issues.max(0) as usize;
                let length = idgen::compute_adaptive_length(
                    count,
                    idgen::adaptive_defaults::MIN_LENGTH,
                    idgen::adaptive_defaults::MAX_LENGTH,
                    idgen::adaptive_defaults::MAX_COLLISION_PROB,
                );
                for nonce in 0..idgen::adaptive_defaults::MAX_NONCES {
                    let candidate = idgen::generate_hash_id(
                        prefix,
                        &issue.title,
                        &issue.description,
                        actor,
                        issue.created_at,
                        length,
                        nonce,
                    );
                    match self.store.get_issue(&candidate) {
                        Err(e) if e.is_not_found() => return Ok(candidate),
                        Ok(_) => continue,
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(EngineError::Internal(
                    "failed to mint a unique issue id".into(),
                ))
            }
        }
    }

    /// Applies a typed partial update.
    pub fn update_issue(
        &self,
        ctx: &OpContext,
        id: &str,
        updates: &IssueUpdates,
    ) -> Result<Issue> {
        self.guard_mutation(ctx, ImportGate::AutoImport)?;
        let before = self.store.get_issue(id)?;
        self.store.update_issue(id, updates, &ctx.actor)?;
        let after = self.store.get_issue(id)?;
        self.publish(
            "issue",
            "updated",
            id,
            Some(before.status.as_str().to_owned()),
            Some(after.status.as_str().to_owned()),
        );
        self.mark_dirty();
        self.get_issue(ctx, id)
    }

    /// Closes an issue, relaxing readiness for its dependents.
    pub fn close_issue(&self, ctx: &OpContext, id: &str, reason: &str) -> Result<Issue> {
        self.guard_mutation(ctx, ImportGate::AutoImport)?;
        let before = self.store.get_issue(id)?;
        self.store.close_issue(id, reason, &ctx.actor)?;
        self.publish(
            "issue",
            "closed",
            id,
            Some(before.status.as_str().to_owned()),
            Some(Status::Closed.as_str().to_owned()),
        );
        self.mark_dirty();
        self.get_issue(ctx, id)
    }

    /// Tombstones an issue. Auto-import is skipped so a newer mirror cannot
    /// resurrect the ID mid-delete.
    pub fn delete_issue(&self, ctx: &OpContext, id: &str) -> Result<()> {
        self.guard_mutation(ctx, ImportGate::Skip)?;
        self.store.delete_issue(id, &ctx.actor)?;
        self.publish("issue", "deleted", id, None, None);
        self.mark_dirty();
        Ok(())
    }

    /// Rewrites an issue ID (prefix-rename support).
    pub fn update_issue_id(&self, ctx: &OpContext, old_id: &str, new_id: &str) -> Result<()> {
        self.guard_mutation(ctx, ImportGate::AutoImport)?;
        self.store.update_issue_id(old_id, new_id, &ctx.actor)?;
        self.publish(
            "issue",
            "renamed",
            new_id,
            Some(old_id.to_owned()),
            Some(new_id.to_owned()),
        );
        self.mark_dirty();
        Ok(())
    }

    // -- Dependencies --------------------------------------------------------

    /// Adds a dependency edge.
    pub fn add_dependency(
        &self,
        ctx: &OpContext,
        issue_id: &str,
        depends_on_id: &str,
        dep_type: DependencyType,
    ) -> Result<()> {
        self.guard_mutation(ctx, ImportGate::AutoImport)?;
        let mut dep = Dependency::typed(issue_id, depends_on_id, dep_type);
        dep.created_by = ctx.actor.clone();
        self.store.add_dependency(&dep, &ctx.actor)?;
        self.publish(
            "dependency",
            "added",
            issue_id,
            None,
            Some(depends_on_id.to_owned()),
        );
        self.mark_dirty();
        Ok(())
    }

    /// Removes a dependency edge.
    pub fn remove_dependency(
        &self,
        ctx: &OpContext,
        issue_id: &str,
        depends_on_id: &str,
    ) -> Result<()> {
        self.guard_mutation(ctx, ImportGate::AutoImport)?;
        self.store
            .remove_dependency(issue_id, depends_on_id, &ctx.actor)?;
        self.publish(
            "dependency",
            "removed",
            issue_id,
            Some(depends_on_id.to_owned()),
            None,
        );
        self.mark_dirty();
        Ok(())
    }

    // -- Labels and comments -------------------------------------------------

    /// Adds a label.
    pub fn add_label(&self, ctx: &OpContext, issue_id: &str, label: &str) -> Result<()> {
        self.guard_mutation(ctx, ImportGate::AutoImport)?;
        self.store.add_label(issue_id, label, &ctx.actor)?;
        self.publish("label", "added", issue_id, None, Some(label.to_owned()));
        self.mark_dirty();
        Ok(())
    }

    /// Removes a label.
    pub fn remove_label(&self, ctx: &OpContext, issue_id: &str, label: &str) -> Result<()> {
        self.guard_mutation(ctx, ImportGate::AutoImport)?;
        self.store.remove_label(issue_id, label, &ctx.actor)?;
        self.publish("label", "removed", issue_id, Some(label.to_owned()), None);
        self.mark_dirty();
        Ok(())
    }

    /// Adds a comment authored by the context's actor.
    pub fn add_comment(&self, ctx: &OpContext, issue_id: &str, text: &str) -> Result<Comment> {
        self.guard_mutation(ctx, ImportGate::AutoImport)?;
        let comment = self.store.add_comment(issue_id, &ctx.actor, text)?;
        self.publish("comment", "added", issue_id, None, None);
        self.mark_dirty();
        Ok(comment)
    }

    // -- Reads ---------------------------------------------------------------

    /// Retrieves one issue with labels and dependency edges attached.
    pub fn get_issue(&self, ctx: &OpContext, id: &str) -> Result<Issue> {
        ctx.check_deadline()?;
        let mut issue = self.store.get_issue(id)?;
        issue.labels = self.store.get_labels(id)?;
        issue.dependencies = self.store.get_dependency_records(id)?;
        Ok(issue)
    }

    /// Lists/searches issues.
    pub fn search_issues(
        &self,
        ctx: &OpContext,
        query: &str,
        filter: &IssueFilter,
    ) -> Result<Vec<Issue>> {
        ctx.check_deadline()?;
        Ok(self.store.search_issues(query, filter)?)
    }

    /// Ready work, deterministically ordered.
    pub fn ready_work(&self, ctx: &OpContext, filter: &WorkFilter) -> Result<Vec<Issue>> {
        ctx.check_deadline()?;
        Ok(self.store.get_ready_work(filter)?)
    }

    /// Blocked work with blocker lists.
    pub fn blocked_issues(&self, ctx: &OpContext, filter: &WorkFilter) -> Result<Vec<BlockedIssue>> {
        ctx.check_deadline()?;
        Ok(self.store.get_blocked_issues(filter)?)
    }

    /// Aggregate statistics.
    pub fn statistics(&self, ctx: &OpContext) -> Result<Statistics> {
        ctx.check_deadline()?;
        Ok(self.store.get_statistics()?)
    }

    /// Comments for one issue.
    pub fn comments(&self, ctx: &OpContext, issue_id: &str) -> Result<Vec<Comment>> {
        ctx.check_deadline()?;
        Ok(self.store.get_comments(issue_id)?)
    }

    /// Audit trail for one issue, newest first.
    pub fn events(&self, ctx: &OpContext, issue_id: &str, limit: i32) -> Result<Vec<Event>> {
        ctx.check_deadline()?;
        Ok(self.store.get_events(issue_id, limit)?)
    }

    /// Workspace summary for the `Status` operation.
    pub fn status_summary(&self, ctx: &OpContext) -> Result<StatusSummary> {
        ctx.check_deadline()?;
        let stats = self.store.get_statistics()?;
        let ready = self.store.get_ready_work(&WorkFilter::default())?;
        let mirror = self.mirror_status(ctx)?;
        Ok(StatusSummary {
            prefix: self.prefix(),
            total_issues: stats.total_issues,
            open_issues: stats.open_issues,
            in_progress_issues: stats.in_progress_issues,
            blocked_issues: stats.blocked_issues,
            closed_issues: stats.closed_issues,
            ready_count: ready.len(),
            mirror_fresh: mirror.fresh,
            flush_failures: self
                .flush_status()
                .map(|s| s.consecutive_failures)
                .unwrap_or(0),
        })
    }

    /// Mirror staleness report (`VcsStatus`).
    pub fn mirror_status(&self, ctx: &OpContext) -> Result<MirrorStatus> {
        ctx.check_deadline()?;
        let path = self.paths.mirror_file();
        let staleness = braid_sync::staleness_check(self.store.as_ref(), &path)?;
        let (fresh, reason) = match staleness {
            Staleness::Fresh => (true, None),
            Staleness::Stale { reason } => (false, Some(reason)),
        };
        Ok(MirrorStatus {
            path: path.display().to_string(),
            exists: path.exists(),
            fresh,
            reason,
        })
    }

    /// Swarm analysis: wave decomposition of an epic's children.
    pub fn swarm_analysis(&self, ctx: &OpContext, epic_id: &str) -> Result<WaveAnalysis> {
        ctx.check_deadline()?;
        let epic = self.store.get_issue(epic_id)?;
        if !matches!(epic.issue_type, IssueType::Epic | IssueType::Molecule) {
            return Err(EngineError::Storage(StorageError::validation(
                format!("{epic_id} is not an epic (type: {})", epic.issue_type),
                "not_an_epic",
            )));
        }

        let all_deps = self.store.get_all_dependency_records()?;
        let mut child_ids: Vec<String> = all_deps
            .iter()
            .filter(|d| d.dep_type == DependencyType::ParentChild && d.depends_on_id == epic_id)
            .map(|d| d.issue_id.clone())
            .collect();
        child_ids.sort();
        child_ids.dedup();

        let mut children = self.store.get_issues_by_ids(&child_ids)?;
        children.sort_by(|a, b| a.id.cmp(&b.id));

        let child_set: HashSet<&str> = children.iter().map(|c| c.id.as_str()).collect();
        let edges: Vec<(String, String)> = all_deps
            .iter()
            .filter(|d| d.dep_type.affects_readiness())
            .filter(|d| d.issue_id != epic_id && d.depends_on_id != epic_id)
            .filter(|d| {
                child_set.contains(d.issue_id.as_str())
                    || child_set.contains(d.depends_on_id.as_str())
            })
            .map(|d| (d.depends_on_id.clone(), d.issue_id.clone()))
            .collect();

        Ok(analyze_waves(epic_id, &children, &edges))
    }

    // -- Mirror sync ---------------------------------------------------------

    /// Explicit export of the mirror.
    pub fn export(&self, ctx: &OpContext) -> Result<ExportStats> {
        ctx.check_deadline()?;
        if self.caps.readonly {
            return Err(EngineError::Readonly);
        }
        Ok(braid_sync::export(
            self.store.as_ref(),
            &self.paths.mirror_file(),
        )?)
    }

    /// Explicit import of the mirror. Resolves a fresh clone: the first
    /// successful import adopts the mirror's prefix and clears the guide.
    pub fn import(&self, ctx: &OpContext, options: &ImportOptions) -> Result<ImportReport> {
        ctx.check_deadline()?;
        if self.caps.readonly {
            return Err(EngineError::Readonly);
        }

        let mirror = self.paths.mirror_file();
        let report = braid_sync::import(self.store.as_ref(), &mirror, &ctx.actor, options)?;

        if self.store.get_config("issue_prefix").is_err() {
            if let Some(prefix) = self.adoptable_prefix()? {
                info!(prefix, "adopting issue prefix from imported mirror");
                self.store.set_config("issue_prefix", &prefix)?;
            }
        }
        if let Ok(mut guide) = self.fresh_clone.lock() {
            *guide = None;
        }

        self.publish("mirror", "imported", &mirror.display().to_string(), None, None);
        Ok(report)
    }

    /// Derives a prefix from config or the imported issue IDs.
    fn adoptable_prefix(&self) -> Result<Option<String>> {
        if let Some(ref prefix) = self.config.prefix {
            return Ok(Some(prefix.clone()));
        }
        let issues = self.store.search_issues("", &IssueFilter::default())?;
        for issue in issues {
            if let Some((head, _)) = issue.id.rsplit_once('-') {
                if validation::validate_prefix(head).is_ok() {
                    return Ok(Some(head.to_owned()));
                }
            }
        }
        Ok(None)
    }

    // -- Mutation stream -----------------------------------------------------

    /// Mutation events newer than the millisecond cursor, in commit order.
    pub fn mutations_since(&self, since_ms: i64) -> Vec<MutationEvent> {
        self.bus.get_mutations(since_ms)
    }

    /// The mutation bus, for subscribers needing sequence cursors.
    pub fn mutation_bus(&self) -> &MutationBus {
        &self.bus
    }

    // -- Lifecycle -----------------------------------------------------------

    /// Drains the flush manager and, in `no_db` mode, writes the mirror
    /// back. Idempotent.
    pub fn shutdown(&self) {
        if let Some(ref flush) = self.flush {
            flush.shutdown();
        }
        if self.no_db && !self.caps.readonly {
            if let Err(e) = braid_sync::export(self.store.as_ref(), &self.paths.mirror_file()) {
                warn!("failed to write mirror back on close: {e}");
            }
        }
        if let Err(e) = self.store.close() {
            warn!("store close reported: {e}");
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("no_db", &self.no_db)
            .field("readonly", &self.caps.readonly)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_config::ensure_braid_dir;

    fn test_engine(dir: &tempfile::TempDir) -> Engine {
        test_engine_with(dir, Capabilities::default(), |_| {})
    }

    fn test_engine_with(
        dir: &tempfile::TempDir,
        caps: Capabilities,
        tweak: impl FnOnce(&mut BraidConfig),
    ) -> Engine {
        let braid_dir = ensure_braid_dir(dir.path()).unwrap();
        let mut config = BraidConfig::default();
        config.prefix = Some("t".into());
        tweak(&mut config);
        // Background flushes would race the mirror edits these tests make.
        let mut caps = caps;
        caps.no_auto_flush = true;
        Engine::open(WorkspacePaths::new(braid_dir), config, caps).unwrap()
    }

    fn ctx() -> OpContext {
        OpContext::new("alice")
    }

    #[test]
    fn create_mints_prefixed_id() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(&dir);

        let issue = engine
            .create_issue(
                &ctx(),
                &NewIssue {
                    title: "First issue".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(issue.id.starts_with("t-"));
        assert_eq!(issue.status, Status::Open);

        let got = engine.get_issue(&ctx(), &issue.id).unwrap();
        assert_eq!(got.title, "First issue");
    }

    #[test]
    fn sequential_id_mode() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine_with(&dir, Capabilities::default(), |c| {
            c.id_mode = IdMode::Sequential;
        });

        let a = engine
            .create_issue(&ctx(), &NewIssue { title: "A".into(), ..Default::default() })
            .unwrap();
        let b = engine
            .create_issue(&ctx(), &NewIssue { title: "B".into(), ..Default::default() })
            .unwrap();
        assert_eq!(a.id, "t-1");
        assert_eq!(b.id, "t-2");
    }

    #[test]
    fn explicit_id_must_match_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(&dir);

        let err = engine
            .create_issue(
                &ctx(),
                &NewIssue {
                    title: "Wrong".into(),
                    id: Some("other-1".into()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn ready_flow_with_dependency_and_close() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine_with(&dir, Capabilities::default(), |c| {
            c.id_mode = IdMode::Sequential;
        });

        engine
            .create_issue(&ctx(), &NewIssue { title: "A".into(), priority: Some(2), ..Default::default() })
            .unwrap();
        engine
            .create_issue(&ctx(), &NewIssue { title: "B".into(), priority: Some(2), ..Default::default() })
            .unwrap();

        engine
            .add_dependency(&ctx(), "t-2", "t-1", DependencyType::Blocks)
            .unwrap();

        let ready: Vec<String> = engine
            .ready_work(&ctx(), &WorkFilter::default())
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ready, vec!["t-1"]);

        engine.close_issue(&ctx(), "t-1", "done").unwrap();
        let ready: Vec<String> = engine
            .ready_work(&ctx(), &WorkFilter::default())
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ready, vec!["t-2"]);
    }

    #[test]
    fn readonly_rejects_mutations() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine_with(
            &dir,
            Capabilities {
                readonly: true,
                ..Default::default()
            },
            |_| {},
        );

        let err = engine
            .create_issue(&ctx(), &NewIssue { title: "Nope".into(), ..Default::default() })
            .unwrap_err();
        assert_eq!(err.kind(), "readonly_mode");
    }

    #[test]
    fn stale_mirror_blocks_mutation_without_allow_stale() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine_with(&dir, Capabilities { no_auto_import: true, ..Default::default() }, |_| {});

        engine
            .create_issue(&ctx(), &NewIssue { title: "Seed".into(), ..Default::default() })
            .unwrap();
        engine.export(&ctx()).unwrap();

        // External edit diverges the mirror.
        let mirror = dir.path().join(".braid/issues.jsonl");
        let text = std::fs::read_to_string(&mirror).unwrap();
        std::fs::write(&mirror, text.replace("Seed", "Edited")).unwrap();

        let err = engine
            .create_issue(&ctx(), &NewIssue { title: "Blocked".into(), ..Default::default() })
            .unwrap_err();
        assert_eq!(err.kind(), "staleness");
    }

    #[test]
    fn auto_import_resolves_staleness() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine_with(&dir, Capabilities::default(), |c| {
            c.id_mode = IdMode::Sequential;
        });

        engine
            .create_issue(&ctx(), &NewIssue { title: "Seed".into(), ..Default::default() })
            .unwrap();
        engine.export(&ctx()).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        let mirror = dir.path().join(".braid/issues.jsonl");
        let text = std::fs::read_to_string(&mirror).unwrap();
        std::fs::write(&mirror, text.replace("Seed", "Edited")).unwrap();

        // The next mutation auto-imports the edit and proceeds.
        engine
            .create_issue(&ctx(), &NewIssue { title: "Next".into(), ..Default::default() })
            .unwrap();
        assert_eq!(engine.get_issue(&ctx(), "t-1").unwrap().title, "Edited");
    }

    #[test]
    fn swarm_analysis_waves() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine_with(&dir, Capabilities::default(), |c| {
            c.id_mode = IdMode::Sequential;
        });

        let epic = engine
            .create_issue(
                &ctx(),
                &NewIssue {
                    title: "Big epic".into(),
                    issue_type: Some("epic".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        for i in 0..5 {
            let child = engine
                .create_issue(&ctx(), &NewIssue { title: format!("child {i}"), ..Default::default() })
                .unwrap();
            engine
                .add_dependency(&ctx(), &child.id, &epic.id, DependencyType::ParentChild)
                .unwrap();
        }
        // children are t-2..t-6; t-4 needs t-2 and t-3; t-5 and t-6 need t-4.
        engine.add_dependency(&ctx(), "t-4", "t-2", DependencyType::Blocks).unwrap();
        engine.add_dependency(&ctx(), "t-4", "t-3", DependencyType::Blocks).unwrap();
        engine.add_dependency(&ctx(), "t-5", "t-4", DependencyType::Blocks).unwrap();
        engine.add_dependency(&ctx(), "t-6", "t-4", DependencyType::Blocks).unwrap();

        let analysis = engine.swarm_analysis(&ctx(), &epic.id).unwrap();
        assert!(analysis.errors.is_empty());
        let waves: Vec<Vec<&str>> = analysis
            .waves
            .iter()
            .map(|w| w.issues.iter().map(|i| i.id.as_str()).collect())
            .collect();
        assert_eq!(waves, vec![vec!["t-2", "t-3"], vec!["t-4"], vec!["t-5", "t-6"]]);
        assert_eq!(analysis.max_parallelism, 2);
        assert_eq!(analysis.estimated_sessions, 5);
    }

    #[test]
    fn swarm_requires_epic_type() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine_with(&dir, Capabilities::default(), |c| {
            c.id_mode = IdMode::Sequential;
        });
        engine
            .create_issue(&ctx(), &NewIssue { title: "Plain task".into(), ..Default::default() })
            .unwrap();
        let err = engine.swarm_analysis(&ctx(), "t-1").unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn mutation_stream_records_commits() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine_with(&dir, Capabilities::default(), |c| {
            c.id_mode = IdMode::Sequential;
        });

        engine
            .create_issue(&ctx(), &NewIssue { title: "A".into(), ..Default::default() })
            .unwrap();
        engine.close_issue(&ctx(), "t-1", "done").unwrap();

        let events = engine.mutations_since(0);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, "created");
        assert_eq!(events[1].kind, "closed");
        assert_eq!(events[1].id, "t-1");
    }

    #[test]
    fn no_db_mode_writes_back_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = dir.path().join(".braid/issues.jsonl");
        {
            let engine = test_engine_with(
                &dir,
                Capabilities {
                    no_db: true,
                    ..Default::default()
                },
                |c| c.id_mode = IdMode::Sequential,
            );
            engine
                .create_issue(&ctx(), &NewIssue { title: "Ephemeral store".into(), ..Default::default() })
                .unwrap();
            engine.shutdown();
        }
        let text = std::fs::read_to_string(&mirror).unwrap();
        assert!(text.contains("Ephemeral store"));

        // Reopening in no_db mode sees the issue again; no database file ever
        // appears.
        let engine = test_engine_with(
            &dir,
            Capabilities {
                no_db: true,
                ..Default::default()
            },
            |c| c.id_mode = IdMode::Sequential,
        );
        assert_eq!(
            engine.get_issue(&ctx(), "t-1").unwrap().title,
            "Ephemeral store"
        );
        assert!(!dir.path().join(".braid/braid.db").exists());
    }

    #[test]
    fn fresh_clone_guide_blocks_mutations_until_import() {
        let dir = tempfile::tempdir().unwrap();
        let braid_dir = ensure_braid_dir(dir.path()).unwrap();
        let mirror = braid_dir.join("issues.jsonl");
        let records: Vec<String> = (0..37)
            .map(|i| format!("{{\"id\":\"t-{i}\",\"title\":\"Issue {i}\"}}"))
            .collect();
        std::fs::write(&mirror, records.join("\n") + "\n").unwrap();

        // No prefix in config: the store cannot know it yet.
        let config = BraidConfig::default();
        let engine = Engine::open(
            WorkspacePaths::new(braid_dir),
            config,
            Capabilities::default(),
        )
        .unwrap();

        let guide = engine.fresh_clone_guide().expect("fresh clone detected");
        assert!(guide.contains("37"));
        assert!(guide.contains("issues.jsonl"));

        let err = engine
            .create_issue(&ctx(), &NewIssue { title: "Too early".into(), ..Default::default() })
            .unwrap_err();
        assert_eq!(err.kind(), "fresh_clone");

        let report = engine.import(&ctx(), &ImportOptions::default()).unwrap();
        assert_eq!(report.created, 37);
        assert!(engine.fresh_clone_guide().is_none());
        assert_eq!(engine.prefix().as_deref(), Some("t"));

        // Mutations flow again.
        engine
            .create_issue(&ctx(), &NewIssue { title: "Now fine".into(), ..Default::default() })
            .unwrap();
    }

    #[test]
    fn deadline_exceeded_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(&dir);
        let expired = OpContext::with_timeout("alice", Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        let err = engine
            .create_issue(&expired, &NewIssue { title: "Late".into(), ..Default::default() })
            .unwrap_err();
        assert_eq!(err.kind(), "deadline_exceeded");
    }
}
