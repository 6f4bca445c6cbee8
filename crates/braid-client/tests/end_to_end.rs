//! End-to-end flows across the socket: a real server thread, the selector,
//! and the workspace handle in both modes.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::json;

use braid_client::{FallbackReason, SelectorOptions, WorkspaceHandle};
use braid_config::{BraidConfig, WorkspacePaths, ensure_braid_dir};
use braid_daemon::Server;
use braid_engine::{Capabilities, Engine};

fn workspace(dir: &tempfile::TempDir) -> (WorkspacePaths, BraidConfig) {
    let braid_dir = ensure_braid_dir(dir.path()).unwrap();
    let mut config = BraidConfig::default();
    config.prefix = Some("t".into());
    config.id_mode = braid_config::config::IdMode::Sequential;
    (WorkspacePaths::new(braid_dir), config)
}

fn start_server(
    paths: &WorkspacePaths,
    config: &BraidConfig,
) -> (Arc<std::sync::atomic::AtomicBool>, std::thread::JoinHandle<()>) {
    let engine =
        Engine::open(paths.clone(), config.clone(), Capabilities::default()).unwrap();
    let server =
        Server::new(paths.clone(), Arc::new(engine)).with_grace(Duration::from_secs(1));
    let flag = server.shutdown_flag();
    let handle = std::thread::spawn(move || server.run().unwrap());

    let socket = paths.socket_file();
    for _ in 0..100 {
        if socket.exists() {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    (flag, handle)
}

#[test]
fn daemon_mode_via_selector() {
    let dir = tempfile::tempdir().unwrap();
    let (paths, config) = workspace(&dir);
    let (flag, server) = start_server(&paths, &config);

    let handle = WorkspaceHandle::open(
        &paths,
        config.clone(),
        Capabilities::default(),
        &SelectorOptions::default(),
    )
    .unwrap();

    assert!(handle.is_daemon());
    assert_eq!(handle.fallback_reason(), FallbackReason::None);

    let issue = handle
        .create_issue(json!({"title": "Daemon-side issue", "actor": "alice"}))
        .unwrap();
    assert_eq!(issue.id, "t-1");

    let listed = handle.list().unwrap();
    assert_eq!(listed.len(), 1);

    flag.store(true, Ordering::SeqCst);
    server.join().unwrap();
}

#[test]
fn direct_mode_gives_identical_results_when_daemon_missing() {
    let dir = tempfile::tempdir().unwrap();
    let (paths, config) = workspace(&dir);

    // No daemon, auto-start disabled: the selector records the reason and
    // the operation completes against the direct store anyway.
    let handle = WorkspaceHandle::open(
        &paths,
        config.clone(),
        Capabilities::default(),
        &SelectorOptions {
            auto_start: false,
            ..Default::default()
        },
    )
    .unwrap();

    assert!(!handle.is_daemon());
    assert_eq!(handle.fallback_reason(), FallbackReason::AutoStartDisabled);

    let issue = handle
        .create_issue(json!({"title": "Direct-side issue", "actor": "alice"}))
        .unwrap();
    assert_eq!(issue.id, "t-1");

    let shown = handle.show("t-1").unwrap();
    assert_eq!(shown.title, "Direct-side issue");
}

#[test]
fn same_flow_both_modes_observably_identical() {
    // Run one scripted flow twice -- once over the socket, once direct --
    // and compare the observable outcomes.
    fn run_flow(handle: &WorkspaceHandle) -> (Vec<String>, Vec<String>, String) {
        handle
            .create_issue(json!({"title": "A", "actor": "alice"}))
            .unwrap();
        handle
            .create_issue(json!({"title": "B", "actor": "alice"}))
            .unwrap();
        handle.add_dependency("t-2", "t-1", "blocks", "alice").unwrap();

        let ready_before: Vec<String> =
            handle.ready().unwrap().into_iter().map(|i| i.id).collect();
        handle.close("t-1", "done", "alice").unwrap();
        let ready_after: Vec<String> =
            handle.ready().unwrap().into_iter().map(|i| i.id).collect();

        let err = handle
            .add_dependency("t-1", "t-2", "blocks", "alice")
            .map(|_| "ok".to_owned())
            .unwrap_err();
        (ready_before, ready_after, err.kind())
    }

    // Daemon.
    let daemon_dir = tempfile::tempdir().unwrap();
    let (paths, config) = workspace(&daemon_dir);
    let (flag, server) = start_server(&paths, &config);
    let daemon_handle = WorkspaceHandle::open(
        &paths,
        config.clone(),
        Capabilities::default(),
        &SelectorOptions::default(),
    )
    .unwrap();
    assert!(daemon_handle.is_daemon());
    let daemon_outcome = run_flow(&daemon_handle);
    flag.store(true, Ordering::SeqCst);
    server.join().unwrap();

    // Direct.
    let direct_dir = tempfile::tempdir().unwrap();
    let (paths, config) = workspace(&direct_dir);
    let direct_handle = WorkspaceHandle::open(
        &paths,
        config,
        Capabilities::default(),
        &SelectorOptions {
            force_direct: true,
            ..Default::default()
        },
    )
    .unwrap();
    let direct_outcome = run_flow(&direct_handle);

    assert_eq!(daemon_outcome, direct_outcome);
    assert_eq!(daemon_outcome.0, vec!["t-1"]);
    assert_eq!(daemon_outcome.1, vec!["t-2"]);
    assert_eq!(daemon_outcome.2, "integrity");
}

#[test]
fn killed_daemon_falls_back_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let (paths, config) = workspace(&dir);
    let (flag, server) = start_server(&paths, &config);

    // Create through the daemon, then kill it.
    let handle = WorkspaceHandle::open(
        &paths,
        config.clone(),
        Capabilities::default(),
        &SelectorOptions::default(),
    )
    .unwrap();
    handle
        .create_issue(json!({"title": "Survivor", "actor": "alice"}))
        .unwrap();
    drop(handle);
    flag.store(true, Ordering::SeqCst);
    server.join().unwrap();

    // Next invocation: socket is gone, auto-start disabled -> direct mode,
    // and the data written through the daemon is still there.
    let handle = WorkspaceHandle::open(
        &paths,
        config,
        Capabilities::default(),
        &SelectorOptions {
            auto_start: false,
            ..Default::default()
        },
    )
    .unwrap();
    assert!(!handle.is_daemon());
    assert_eq!(handle.fallback_reason(), FallbackReason::AutoStartDisabled);
    assert_eq!(handle.show("t-1").unwrap().title, "Survivor");
}

#[test]
fn mutation_stream_over_the_socket() {
    let dir = tempfile::tempdir().unwrap();
    let (paths, config) = workspace(&dir);
    let (flag, server) = start_server(&paths, &config);

    let handle = WorkspaceHandle::open(
        &paths,
        config,
        Capabilities::default(),
        &SelectorOptions::default(),
    )
    .unwrap();

    handle
        .create_issue(json!({"title": "Watched", "actor": "alice"}))
        .unwrap();
    handle.close("t-1", "done", "alice").unwrap();

    let events = handle.mutations_since(0).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind, "created");
    assert_eq!(events[1].kind, "closed");

    // A cursor at the last seen timestamp sees nothing new.
    let last_ts = events.last().unwrap().timestamp_ms;
    assert!(handle.mutations_since(last_ts).unwrap().is_empty());

    flag.store(true, Ordering::SeqCst);
    server.join().unwrap();
}
