//! Import: merge the text mirror into the store.
//!
//! Every record is classified against the store by content hash -- create,
//! update, unchanged, skip, or delete -- and applied in one transaction.
//! Timestamps travel verbatim, so exporting immediately after an import
//! reproduces the imported bytes.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::info;

use braid_core::content_hash::compute_content_hash;
use braid_core::dependency::Dependency;
use braid_core::format;
use braid_core::issue::Issue;
use braid_core::validation;
use braid_storage::sqlite::schema::metadata_keys;
use braid_storage::{OrphanMode, Storage, StorageError, Transaction};

use crate::error::{Result, SyncError};
use crate::export::hash_bytes;

/// Options controlling an import.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// How dependency edges with missing targets are handled.
    pub orphan_mode: OrphanMode,
    /// Reject the whole import if any record fails validation.
    pub strict: bool,
    /// Never update existing issues; only create missing ones.
    pub skip_update: bool,
    /// Locally-exported IDs to protect: a mirror record older than the
    /// recorded timestamp is skipped instead of applied.
    pub protect_local_export_ids: HashMap<String, DateTime<Utc>>,
}

/// Outcome of one import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub deleted: usize,
    pub collisions: usize,
    pub warnings: Vec<String>,
}

impl ImportReport {
    /// Returns `true` when the import changed nothing.
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.updated == 0 && self.deleted == 0
    }
}

enum Action {
    Create,
    Update { collision: bool },
    Unchanged,
    Skip { warning: Option<String> },
    Delete,
}

/// Imports the mirror at `path` into the store.
pub fn import(
    store: &dyn Storage,
    path: &Path,
    actor: &str,
    options: &ImportOptions,
) -> Result<ImportReport> {
    let bytes = std::fs::read(path)?;
    let (records, decode_warnings) = format::decode_any(&bytes)?;

    if options.strict {
        for record in &records {
            if let Err(e) = validation::validate(record) {
                // Tombstones legitimately carry a closed-like shape.
                if !record.is_tombstone() {
                    return Err(SyncError::StrictValidation {
                        id: record.id.clone(),
                        reason: e.reason().to_owned(),
                    });
                }
            }
        }
    }

    let report = RefCell::new(ImportReport::default());
    report
        .borrow_mut()
        .warnings
        .extend(decode_warnings.iter().map(|w| format!("line {}: {}", w.line, w.message)));

    // IDs arriving in this batch that are live records; edges may point at
    // them even before they are created.
    let batch_live: HashSet<&str> = records
        .iter()
        .filter(|r| !r.is_tombstone())
        .map(|r| r.id.as_str())
        .collect();

    store.run_in_transaction(&|tx| {
        let mut actions: Vec<(usize, Action)> = Vec::with_capacity(records.len());

        for (idx, record) in records.iter().enumerate() {
            let existing = match tx.get_issue(&record.id) {
                Ok(issue) => Some(issue),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e),
            };

            let action = match existing {
                None => Action::Create,
                Some(existing) if existing.is_tombstone() => {
                    if record.is_tombstone() {
                        Action::Unchanged
                    } else {
                        Action::Skip {
                            warning: Some(format!("resurrection_blocked:{}", record.id)),
                        }
                    }
                }
                Some(_) if record.is_tombstone() => Action::Delete,
                Some(existing) => {
                    let record_hash = compute_content_hash(record);
                    if existing.content_hash == record_hash {
                        Action::Unchanged
                    } else if options.skip_update {
                        Action::Skip { warning: None }
                    } else if options
                        .protect_local_export_ids
                        .get(&record.id)
                        .is_some_and(|protected_at| *protected_at > record.updated_at)
                    {
                        Action::Skip {
                            warning: Some(format!("protected_local:{}", record.id)),
                        }
                    } else {
                        Action::Update {
                            collision: existing.created_at != record.created_at,
                        }
                    }
                }
            };
            actions.push((idx, action));
        }

        // Apply issues first so in-batch edges resolve, then reconcile edges.
        let mut touched: Vec<usize> = Vec::new();
        for (idx, action) in &actions {
            let record = &records[*idx];
            let mut r = report.borrow_mut();
            match action {
                Action::Create => {
                    let mut stripped = record.clone();
                    stripped.dependencies = Vec::new();
                    tx.import_issue(&stripped, actor)?;
                    r.created += 1;
                    touched.push(*idx);
                }
                Action::Update { collision } => {
                    let mut stripped = record.clone();
                    stripped.dependencies = Vec::new();
                    tx.import_issue(&stripped, actor)?;
                    r.updated += 1;
                    if *collision {
                        r.collisions += 1;
                    }
                    touched.push(*idx);
                }
                Action::Unchanged => r.unchanged += 1,
                Action::Skip { warning } => {
                    r.skipped += 1;
                    if let Some(w) = warning {
                        r.warnings.push(w.clone());
                    }
                }
                Action::Delete => {
                    tx.delete_issue(&record.id, actor)?;
                    r.deleted += 1;
                }
            }
        }

        for idx in touched {
            let record = &records[idx];
            let mut edges: Vec<Dependency> = Vec::with_capacity(record.dependencies.len());
            for dep in &record.dependencies {
                let target_known = batch_live.contains(dep.depends_on_id.as_str())
                    || matches!(
                        tx.get_issue(&dep.depends_on_id),
                        Ok(ref i) if !i.is_tombstone()
                    );
                if target_known {
                    edges.push(dep.clone());
                    continue;
                }
                match options.orphan_mode {
                    OrphanMode::Fail => {
                        return Err(StorageError::not_found("issue", &dep.depends_on_id));
                    }
                    OrphanMode::Allow | OrphanMode::Warn => {
                        report.borrow_mut().warnings.push(format!(
                            "orphan: dropped edge {} -> {}",
                            record.id, dep.depends_on_id
                        ));
                    }
                }
            }
            let cycle_warnings = tx.import_dependencies(&record.id, &edges)?;
            report.borrow_mut().warnings.extend(cycle_warnings);
        }

        Ok(())
    })?;

    // The store and the file now agree; record the file hash so staleness
    // checks and auto-import treat this mirror as converged.
    store.set_metadata(metadata_keys::TEXT_HASH, &hash_bytes(&bytes))?;
    store.set_metadata(metadata_keys::LAST_EXPORT_AT, &Utc::now().to_rfc3339())?;

    let report = report.into_inner();
    info!(
        path = %path.display(),
        created = report.created,
        updated = report.updated,
        unchanged = report.unchanged,
        skipped = report.skipped,
        deleted = report.deleted,
        collisions = report.collisions,
        "mirror imported"
    );
    Ok(report)
}
