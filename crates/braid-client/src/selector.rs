//! The daemon/direct fallback selector.
//!
//! Per invocation, exactly one mode is chosen and exactly one reason
//! recorded. The daemon is preferred whenever it is healthy and compatible;
//! everything else degrades to direct mode with the reason naming why.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use braid_config::WorkspacePaths;
use braid_proto::{HealthState, PROTOCOL_VERSION, is_compatible};

use crate::socket::SocketClient;

/// Auto-start connect retries.
const AUTO_START_ATTEMPTS: u32 = 10;
/// Pause between auto-start connect retries.
const AUTO_START_BACKOFF: Duration = Duration::from_millis(100);

/// Why this invocation runs in its chosen mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// Daemon mode; nothing went wrong.
    None,
    /// The caller explicitly requested direct mode.
    FlagNoDaemon,
    /// The socket did not answer and auto-start could not be attempted.
    ConnectFailed,
    /// The daemon answered but is unhealthy or incompatible, and a restart
    /// handshake did not produce a serviceable one.
    HealthFailed,
    /// A multi-checkout workspace where the daemon's working directory may
    /// diverge from this invocation's view.
    WorktreeSafety,
    /// The socket did not answer and auto-start is disabled.
    AutoStartDisabled,
    /// Auto-start ran but no healthy daemon appeared within the backoff
    /// budget.
    AutoStartFailed,
    /// This platform has no Unix sockets.
    DaemonUnsupported,
}

/// The chosen mode.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Mode {
    Daemon,
    Direct,
}

/// Outcome of selection.
#[derive(Debug)]
pub struct Selection {
    pub mode: Mode,
    pub reason: FallbackReason,
    /// Connected client when mode is Daemon.
    pub client: Option<SocketClient>,
}

/// Inputs to the selection algorithm. Environment sensing (worktrees,
/// sandboxes) happens in the caller; the selector only consumes the verdict.
#[derive(Debug, Clone, Default)]
pub struct SelectorOptions {
    /// The caller explicitly wants direct mode.
    pub force_direct: bool,
    /// The workspace is shared between checkouts with no sync policy.
    pub worktree_shared: bool,
    /// Whether a missing daemon may be spawned.
    pub auto_start: bool,
    /// Path to the daemon binary; defaults to `braidd` on PATH.
    pub daemon_binary: Option<PathBuf>,
}

/// Chooses daemon or direct mode for one invocation.
pub fn select_mode(paths: &WorkspacePaths, options: &SelectorOptions) -> Selection {
    if !cfg!(unix) {
        return direct(FallbackReason::DaemonUnsupported);
    }
    if options.force_direct {
        return direct(FallbackReason::FlagNoDaemon);
    }
    if options.worktree_shared {
        info!("workspace is shared between checkouts; refusing daemon mode");
        return direct(FallbackReason::WorktreeSafety);
    }

    let socket = paths.socket_file();
    let mut client = match SocketClient::connect(&socket) {
        Ok(client) => client,
        Err(e) => {
            debug!("daemon connect failed: {e}");
            if !options.auto_start {
                return direct(FallbackReason::AutoStartDisabled);
            }
            match auto_start(paths, options) {
                AutoStart::Connected(client) => client,
                AutoStart::SpawnFailed => return direct(FallbackReason::ConnectFailed),
                AutoStart::NeverCameUp => return direct(FallbackReason::AutoStartFailed),
            }
        }
    };

    match negotiate(&mut client) {
        Negotiation::Good => Selection {
            mode: Mode::Daemon,
            reason: FallbackReason::None,
            client: Some(client),
        },
        Negotiation::Bad => {
            // The client, not the server, owns restarts: ask the stale
            // daemon to exit, then retry once.
            client.request_shutdown();
            drop(client);
            std::thread::sleep(AUTO_START_BACKOFF);

            let retried = if options.auto_start {
                match auto_start(paths, options) {
                    AutoStart::Connected(c) => Some(c),
                    _ => None,
                }
            } else {
                SocketClient::connect(&socket).ok()
            };

            if let Some(mut client) = retried {
                if matches!(negotiate(&mut client), Negotiation::Good) {
                    Selection {
                        mode: Mode::Daemon,
                        reason: FallbackReason::None,
                        client: Some(client),
                    }
                } else {
                    direct(FallbackReason::HealthFailed)
                }
            } else {
                direct(FallbackReason::HealthFailed)
            }
        }
    }
}

fn direct(reason: FallbackReason) -> Selection {
    Selection {
        mode: Mode::Direct,
        reason,
        client: None,
    }
}

enum Negotiation {
    Good,
    Bad,
}

fn negotiate(client: &mut SocketClient) -> Negotiation {
    match client.health() {
        Ok(report)
            if report.status != HealthState::Unhealthy
                && is_compatible(PROTOCOL_VERSION, &report.version) =>
        {
            Negotiation::Good
        }
        Ok(report) => {
            warn!(
                version = %report.version,
                status = ?report.status,
                "daemon is not serviceable"
            );
            Negotiation::Bad
        }
        Err(e) => {
            warn!("health request failed: {e}");
            Negotiation::Bad
        }
    }
}

enum AutoStart {
    Connected(SocketClient),
    SpawnFailed,
    NeverCameUp,
}

/// Spawns a detached daemon and retries the connection with bounded backoff.
fn auto_start(paths: &WorkspacePaths, options: &SelectorOptions) -> AutoStart {
    let binary = options
        .daemon_binary
        .clone()
        .unwrap_or_else(|| PathBuf::from("braidd"));

    let workspace = paths
        .workspace_root()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));

    info!(binary = %binary.display(), "auto-starting workspace daemon");
    let spawned = std::process::Command::new(&binary)
        .arg("--workspace")
        .arg(&workspace)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn();

    if let Err(e) = spawned {
        warn!("failed to spawn daemon: {e}");
        return AutoStart::SpawnFailed;
    }

    let socket = paths.socket_file();
    for _ in 0..AUTO_START_ATTEMPTS {
        std::thread::sleep(AUTO_START_BACKOFF);
        if let Ok(client) = SocketClient::connect(&socket) {
            return AutoStart::Connected(client);
        }
    }
    AutoStart::NeverCameUp
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> (tempfile::TempDir, WorkspacePaths) {
        let dir = tempfile::tempdir().unwrap();
        let paths = WorkspacePaths::new(dir.path().join(".braid"));
        std::fs::create_dir_all(&paths.braid_dir).unwrap();
        (dir, paths)
    }

    #[test]
    fn force_direct_wins() {
        let (_dir, paths) = paths();
        let selection = select_mode(
            &paths,
            &SelectorOptions {
                force_direct: true,
                auto_start: true,
                ..Default::default()
            },
        );
        assert_eq!(selection.mode, Mode::Direct);
        assert_eq!(selection.reason, FallbackReason::FlagNoDaemon);
    }

    #[test]
    fn worktree_safety_beats_connection_attempts() {
        let (_dir, paths) = paths();
        let selection = select_mode(
            &paths,
            &SelectorOptions {
                worktree_shared: true,
                auto_start: true,
                ..Default::default()
            },
        );
        assert_eq!(selection.mode, Mode::Direct);
        assert_eq!(selection.reason, FallbackReason::WorktreeSafety);
    }

    #[test]
    fn no_daemon_and_no_auto_start() {
        let (_dir, paths) = paths();
        let selection = select_mode(
            &paths,
            &SelectorOptions {
                auto_start: false,
                ..Default::default()
            },
        );
        assert_eq!(selection.mode, Mode::Direct);
        assert_eq!(selection.reason, FallbackReason::AutoStartDisabled);
    }

    #[test]
    fn missing_binary_records_connect_failed() {
        let (_dir, paths) = paths();
        let selection = select_mode(
            &paths,
            &SelectorOptions {
                auto_start: true,
                daemon_binary: Some(PathBuf::from("/definitely/not/a/binary")),
                ..Default::default()
            },
        );
        assert_eq!(selection.mode, Mode::Direct);
        assert_eq!(selection.reason, FallbackReason::ConnectFailed);
    }

    #[test]
    fn reason_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&FallbackReason::AutoStartDisabled).unwrap(),
            "\"auto_start_disabled\""
        );
        assert_eq!(
            serde_json::to_string(&FallbackReason::None).unwrap(),
            "\"none\""
        );
    }
}
