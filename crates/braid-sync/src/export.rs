//! Export: serialize the store into the text mirror.
//!
//! The write is atomic (tmp file, fsync, rename) so a crashed export never
//! leaves a half-written mirror for the VCS to pick up. After a successful
//! write, metadata records the file hash and per-issue content hashes so
//! that staleness checks and auto-import can tell local exports from
//! external edits.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use braid_core::enums::Status;
use braid_core::filter::IssueFilter;
use braid_core::issue::Issue;
use braid_core::jsonl;
use braid_storage::Storage;
use braid_storage::sqlite::schema::metadata_keys;

use crate::error::Result;

/// Outcome of one export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportStats {
    /// Records written to the mirror.
    pub exported: usize,
    /// Ephemeral issues held back.
    pub ephemeral_skipped: usize,
    /// SHA-256 of the written bytes.
    pub text_hash: String,
}

/// Computes the SHA-256 hex digest of mirror bytes.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Collects every exportable issue with labels and edges attached.
///
/// Tombstones are included -- they carry deletions to other clones.
/// Ephemeral issues never leave the store.
pub fn collect_exportable(store: &dyn Storage) -> Result<(Vec<Issue>, usize)> {
    let mut issues = store.search_issues("", &IssueFilter::default())?;
    let tombstones = store.search_issues(
        "",
        &IssueFilter {
            status: Some(Status::Tombstone),
            ..Default::default()
        },
    )?;
    issues.extend(tombstones);

    let mut exportable = Vec::with_capacity(issues.len());
    let mut ephemeral_skipped = 0;
    for mut issue in issues {
        if issue.ephemeral {
            ephemeral_skipped += 1;
            continue;
        }
        issue.labels = store.get_labels(&issue.id)?;
        issue.dependencies = store.get_dependency_records(&issue.id)?;
        exportable.push(issue);
    }
    Ok((exportable, ephemeral_skipped))
}

/// Exports all non-ephemeral issues to the mirror at `path`.
pub fn export(store: &dyn Storage, path: &Path) -> Result<ExportStats> {
    let (issues, ephemeral_skipped) = collect_exportable(store)?;
    let bytes = jsonl::encode(&issues).map_err(braid_core::format::FormatError::from)?;

    write_atomic(path, &bytes)?;

    let text_hash = hash_bytes(&bytes);
    let export_hashes: BTreeMap<&str, &str> = issues
        .iter()
        .map(|i| (i.id.as_str(), i.content_hash.as_str()))
        .collect();

    store.set_metadata(metadata_keys::TEXT_HASH, &text_hash)?;
    store.set_metadata(
        metadata_keys::EXPORT_HASHES,
        &serde_json::to_string(&export_hashes).unwrap_or_else(|_| "{}".to_owned()),
    )?;
    store.set_metadata(metadata_keys::LAST_EXPORT_AT, &Utc::now().to_rfc3339())?;

    info!(
        path = %path.display(),
        exported = issues.len(),
        ephemeral_skipped,
        "mirror exported"
    );

    Ok(ExportStats {
        exported: issues.len(),
        ephemeral_skipped,
        text_hash,
    })
}

/// Writes bytes to `path` atomically: tmp file in the same directory, fsync,
/// rename over the target.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp_path = path.with_extension("jsonl.tmp");
    {
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(bytes)?;
        tmp.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    debug!(path = %path.display(), bytes = bytes.len(), "atomic mirror write");
    Ok(())
}
