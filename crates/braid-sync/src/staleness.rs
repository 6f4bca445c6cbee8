//! Staleness detection, auto-import, and fresh-clone guidance.

use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use braid_core::format;
use braid_storage::Storage;
use braid_storage::sqlite::schema::metadata_keys;

use crate::error::Result;
use crate::export::hash_bytes;
use crate::import::{ImportOptions, ImportReport, import};

/// The relationship between the mirror file and the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staleness {
    /// The mirror matches the last export (or there is nothing to compare).
    Fresh,
    /// The mirror has diverged from the store since the last export.
    Stale {
        /// Why the mirror is considered stale.
        reason: String,
    },
}

impl Staleness {
    /// Returns `true` for the stale variant.
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale { .. })
    }
}

/// Compares the mirror file against the store's export bookkeeping.
///
/// The mirror is stale when it exists, a previous export recorded a hash,
/// and the file's current hash differs -- i.e. someone (a merge, an editor)
/// changed the file behind the store's back. A mirror that has never been
/// exported is fresh by definition; there is no divergence to protect.
pub fn staleness_check(store: &dyn Storage, path: &Path) -> Result<Staleness> {
    if !path.exists() {
        return Ok(Staleness::Fresh);
    }

    let recorded = match store.get_metadata(metadata_keys::TEXT_HASH) {
        Ok(hash) => hash,
        Err(e) if e.is_not_found() => return Ok(Staleness::Fresh),
        Err(e) => return Err(e.into()),
    };

    let bytes = std::fs::read(path)?;
    let current = hash_bytes(&bytes);
    if current == recorded {
        Ok(Staleness::Fresh)
    } else {
        Ok(Staleness::Stale {
            reason: format!(
                "mirror {} changed since the last export",
                path.display()
            ),
        })
    }
}

/// Imports the mirror if it is newer than the store's last export.
///
/// "Newer" means both: the file's mtime postdates the recorded export time,
/// and the file's hash differs from the recorded one. Returns `None` when no
/// import ran.
pub fn auto_import_if_newer(
    store: &dyn Storage,
    path: &Path,
    actor: &str,
) -> Result<Option<ImportReport>> {
    if !path.exists() {
        return Ok(None);
    }

    let recorded_hash = match store.get_metadata(metadata_keys::TEXT_HASH) {
        Ok(hash) => hash,
        // Never exported; nothing to compare, leave explicit import to the
        // caller (fresh-clone flow).
        Err(e) if e.is_not_found() => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let bytes = std::fs::read(path)?;
    if hash_bytes(&bytes) == recorded_hash {
        return Ok(None);
    }

    if let Ok(last_export) = store.get_metadata(metadata_keys::LAST_EXPORT_AT) {
        if let Ok(exported_at) = last_export.parse::<DateTime<Utc>>() {
            let mtime: Option<DateTime<Utc>> = std::fs::metadata(path)
                .and_then(|m| m.modified())
                .ok()
                .map(DateTime::from);
            if let Some(mtime) = mtime {
                if mtime <= exported_at {
                    debug!(
                        path = %path.display(),
                        "mirror hash differs but file predates last export; skipping auto-import"
                    );
                    return Ok(None);
                }
            }
        }
    }

    info!(path = %path.display(), "mirror is newer than the store, auto-importing");
    let report = import(store, path, actor, &ImportOptions::default())?;
    Ok(Some(report))
}

/// Returns `true` when the store looks like a fresh clone: opened cleanly
/// but missing its workspace prefix while a populated mirror sits next to it.
pub fn is_fresh_clone(store: &dyn Storage, mirror_path: &Path) -> bool {
    let has_prefix = store.get_config("issue_prefix").is_ok();
    !has_prefix && mirror_record_count(mirror_path) > 0
}

/// Builds the actionable message shown when a fresh clone is detected.
pub fn fresh_clone_guide(mirror_path: &Path) -> String {
    let count = mirror_record_count(mirror_path);
    format!(
        "found {count} issues in {} but the local store is uninitialized; \
         run an import to populate this clone",
        mirror_path.display()
    )
}

fn mirror_record_count(path: &Path) -> usize {
    std::fs::read(path)
        .map(|bytes| format::count_records(&bytes))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::export;
    use braid_core::issue::IssueBuilder;
    use braid_storage::MemoryStore;

    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        store.set_config("issue_prefix", "t").unwrap();
        let issue = IssueBuilder::new("Seed").id("t-1").build();
        store.create_issue(&issue, "alice").unwrap();
        store
    }

    #[test]
    fn fresh_when_no_mirror() {
        let store = seeded_store();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issues.jsonl");
        assert_eq!(staleness_check(&store, &path).unwrap(), Staleness::Fresh);
    }

    #[test]
    fn fresh_after_export_stale_after_edit() {
        let store = seeded_store();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issues.jsonl");

        export(&store, &path).unwrap();
        assert_eq!(staleness_check(&store, &path).unwrap(), Staleness::Fresh);

        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, text.replace("Seed", "Tampered")).unwrap();
        assert!(staleness_check(&store, &path).unwrap().is_stale());
    }

    #[test]
    fn auto_import_picks_up_external_edit() {
        let store = seeded_store();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issues.jsonl");
        export(&store, &path).unwrap();

        // No changes -> no import.
        assert!(auto_import_if_newer(&store, &path, "alice").unwrap().is_none());

        // The rewrite must land visibly after the export timestamp.
        std::thread::sleep(std::time::Duration::from_millis(20));
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, text.replace("Seed", "Edited")).unwrap();
        let report = auto_import_if_newer(&store, &path, "alice")
            .unwrap()
            .expect("should import");
        assert_eq!(report.updated, 1);
        assert_eq!(store.get_issue("t-1").unwrap().title, "Edited");

        // Converged again.
        export(&store, &path).unwrap();
        assert!(auto_import_if_newer(&store, &path, "alice").unwrap().is_none());
    }

    #[test]
    fn never_exported_store_does_not_auto_import() {
        let store = MemoryStore::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issues.jsonl");
        std::fs::write(&path, "{\"id\":\"t-9\",\"title\":\"From elsewhere\"}\n").unwrap();

        assert!(auto_import_if_newer(&store, &path, "alice").unwrap().is_none());
    }

    #[test]
    fn fresh_clone_detection_and_guide() {
        let store = MemoryStore::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issues.jsonl");

        let records: Vec<String> = (0..37)
            .map(|i| format!("{{\"id\":\"t-{i}\",\"title\":\"Issue {i}\"}}"))
            .collect();
        std::fs::write(&path, records.join("\n") + "\n").unwrap();

        assert!(is_fresh_clone(&store, &path));
        let guide = fresh_clone_guide(&path);
        assert!(guide.contains("37"));
        assert!(guide.contains(path.to_str().unwrap()));

        // Once a prefix exists it is no longer a fresh clone.
        store.set_config("issue_prefix", "t").unwrap();
        assert!(!is_fresh_clone(&store, &path));
    }
}
