//! End-to-end mirror flows against the SQLite backend: two stores
//! collaborating through one text file, the way two clones collaborate
//! through version control.

use braid_core::dependency::Dependency;
use braid_core::enums::Status;
use braid_core::issue::IssueBuilder;
use braid_storage::{SqliteStore, Storage};
use braid_sync::{ImportOptions, export, import, staleness_check};

fn store_at(dir: &tempfile::TempDir, name: &str) -> SqliteStore {
    SqliteStore::open(dir.path().join(name)).unwrap()
}

fn seed(store: &dyn Storage) {
    store.set_config("issue_prefix", "t").unwrap();
    let a = IssueBuilder::new("Design the schema").id("t-1").priority(1).build();
    let b = IssueBuilder::new("Implement the parser").id("t-2").priority(2).build();
    let c = IssueBuilder::new("Write the docs").id("t-3").priority(3).build();
    store.create_issue(&a, "alice").unwrap();
    store.create_issue(&b, "alice").unwrap();
    store.create_issue(&c, "alice").unwrap();
    store.add_label("t-1", "backend", "alice").unwrap();
    store
        .add_dependency(&Dependency::blocks("t-2", "t-1"), "alice")
        .unwrap();
}

#[test]
fn export_import_between_two_stores() {
    let dir = tempfile::tempdir().unwrap();
    let mirror = dir.path().join("issues.jsonl");

    let origin = store_at(&dir, "origin.db");
    seed(&origin);
    export(&origin, &mirror).unwrap();

    // A second clone imports the same mirror.
    let clone = store_at(&dir, "clone.db");
    let report = import(&clone, &mirror, "bob", &ImportOptions::default()).unwrap();
    assert_eq!(report.created, 3);
    assert_eq!(report.unchanged, 0);

    // Logical contents carried over: labels, edges, blocked status.
    assert_eq!(clone.get_labels("t-1").unwrap(), vec!["backend"]);
    assert_eq!(clone.get_dependency_records("t-2").unwrap().len(), 1);
    assert_eq!(clone.get_issue("t-2").unwrap().status, Status::Blocked);

    // Both stores now re-export byte-identical mirrors.
    let origin_bytes = std::fs::read(&mirror).unwrap();
    let clone_mirror = dir.path().join("clone.jsonl");
    export(&clone, &clone_mirror).unwrap();
    assert_eq!(std::fs::read(&clone_mirror).unwrap(), origin_bytes);
}

#[test]
fn sqlite_export_import_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let mirror = dir.path().join("issues.jsonl");

    let store = store_at(&dir, "braid.db");
    seed(&store);
    export(&store, &mirror).unwrap();

    let events_before = store.get_all_events_since(0).unwrap().len();
    let report = import(&store, &mirror, "alice", &ImportOptions::default()).unwrap();
    assert!(report.is_noop());
    assert_eq!(report.unchanged, 3);
    assert_eq!(store.get_all_events_since(0).unwrap().len(), events_before);

    // Importing the identical file again changes nothing either.
    let report = import(&store, &mirror, "alice", &ImportOptions::default()).unwrap();
    assert!(report.is_noop());
}

#[test]
fn external_edit_roundtrip_is_byte_exact() {
    let dir = tempfile::tempdir().unwrap();
    let mirror = dir.path().join("issues.jsonl");

    let store = store_at(&dir, "braid.db");
    seed(&store);
    export(&store, &mirror).unwrap();
    assert!(!staleness_check(&store, &mirror).unwrap().is_stale());

    // A collaborator edits a title in the text file.
    let text = std::fs::read_to_string(&mirror).unwrap();
    std::fs::write(
        &mirror,
        text.replace("Write the docs", "Write the manual"),
    )
    .unwrap();
    assert!(staleness_check(&store, &mirror).unwrap().is_stale());

    let events_before = store.get_all_events_since(0).unwrap().len();
    let report = import(&store, &mirror, "alice", &ImportOptions::default()).unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(report.unchanged, 2);
    assert_eq!(store.get_all_events_since(0).unwrap().len(), events_before + 1);
    assert_eq!(store.get_issue("t-3").unwrap().title, "Write the manual");
    assert!(!staleness_check(&store, &mirror).unwrap().is_stale());

    // Re-export reproduces the edited file byte for byte.
    let edited = std::fs::read(&mirror).unwrap();
    export(&store, &mirror).unwrap();
    assert_eq!(std::fs::read(&mirror).unwrap(), edited);
}

#[test]
fn deletion_propagates_between_stores() {
    let dir = tempfile::tempdir().unwrap();
    let mirror = dir.path().join("issues.jsonl");

    let origin = store_at(&dir, "origin.db");
    seed(&origin);
    export(&origin, &mirror).unwrap();

    let clone = store_at(&dir, "clone.db");
    import(&clone, &mirror, "bob", &ImportOptions::default()).unwrap();

    // Origin deletes t-3 and republishes the mirror.
    origin.delete_issue("t-3", "alice").unwrap();
    export(&origin, &mirror).unwrap();

    let report = import(&clone, &mirror, "bob", &ImportOptions::default()).unwrap();
    assert_eq!(report.deleted, 1);
    assert!(clone.get_issue("t-3").unwrap().is_tombstone());

    // The clone can never accidentally resurrect it.
    let revived = IssueBuilder::new("Write the docs").id("t-3").build();
    assert!(clone.create_issue(&revived, "bob").is_err());
}

#[test]
fn closing_in_one_store_unblocks_in_the_other() {
    let dir = tempfile::tempdir().unwrap();
    let mirror = dir.path().join("issues.jsonl");

    let origin = store_at(&dir, "origin.db");
    seed(&origin);
    export(&origin, &mirror).unwrap();

    let clone = store_at(&dir, "clone.db");
    import(&clone, &mirror, "bob", &ImportOptions::default()).unwrap();

    origin.close_issue("t-1", "shipped", "alice").unwrap();
    export(&origin, &mirror).unwrap();

    import(&clone, &mirror, "bob", &ImportOptions::default()).unwrap();
    assert_eq!(clone.get_issue("t-1").unwrap().status, Status::Closed);
    // The mirror carried the recomputed dependent status too.
    assert_eq!(clone.get_issue("t-2").unwrap().status, Status::Open);

    let ready: Vec<String> = clone
        .get_ready_work(&braid_core::filter::WorkFilter::default())
        .unwrap()
        .into_iter()
        .map(|i| i.id)
        .collect();
    assert!(ready.contains(&"t-2".to_owned()));
}
