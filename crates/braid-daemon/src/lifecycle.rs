//! Daemon lifecycle: pidfile lock, endpoint descriptor, error file, cleanup.

use std::fs::File;
use std::io::Write;

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use braid_config::WorkspacePaths;
use braid_proto::PROTOCOL_VERSION;

use crate::error::DaemonError;

/// Contents of the endpoint descriptor written next to the socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub socket: String,
    pub pid: u32,
    pub version: String,
}

/// Holds the exclusive workspace lock for the daemon's lifetime.
///
/// The pidfile doubles as the lock file; the advisory lock is released when
/// the held [`File`] drops. Cleanup removes the socket, pidfile, and
/// endpoint descriptor.
#[derive(Debug)]
pub struct Lifecycle {
    paths: WorkspacePaths,
    // Held for the advisory lock; released on drop.
    _lock_file: File,
}

impl Lifecycle {
    /// Acquires the workspace lock and writes the pidfile and endpoint
    /// descriptor. Fails with [`DaemonError::LockFailed`] if another daemon
    /// holds the lock.
    pub fn acquire(paths: &WorkspacePaths) -> Result<Self, DaemonError> {
        std::fs::create_dir_all(&paths.braid_dir)?;

        // Open without truncating: wiping the file before holding the lock
        // would clobber a running daemon's recorded pid.
        let lock_file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(paths.pid_file())?;
        lock_file
            .try_lock_exclusive()
            .map_err(DaemonError::LockFailed)?;

        let mut lock_file = lock_file;
        lock_file.set_len(0)?;
        writeln!(lock_file, "{}", std::process::id())?;

        let descriptor = EndpointDescriptor {
            socket: paths.socket_file().display().to_string(),
            pid: std::process::id(),
            version: PROTOCOL_VERSION.to_owned(),
        };
        std::fs::write(
            paths.endpoint_file(),
            serde_json::to_vec_pretty(&descriptor).unwrap_or_default(),
        )?;

        info!(pid = std::process::id(), "workspace lock acquired");
        Ok(Self {
            paths: paths.clone(),
            _lock_file: lock_file,
        })
    }

    /// Removes the files this daemon owns. Called on orderly shutdown; drop
    /// repeats it harmlessly.
    pub fn cleanup(&self) {
        for path in [
            self.paths.socket_file(),
            self.paths.pid_file(),
            self.paths.endpoint_file(),
        ] {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(path = %path.display(), "cleanup failed: {e}");
                }
            }
        }
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Records a fatal daemon error for the next client invocation to surface.
pub fn write_daemon_error(paths: &WorkspacePaths, message: &str) {
    if let Err(e) = std::fs::write(paths.daemon_error_file(), message) {
        warn!("failed to record daemon error: {e}");
    }
}

/// Reads and clears the recorded daemon error, if any.
pub fn take_daemon_error(paths: &WorkspacePaths) -> Option<String> {
    let path = paths.daemon_error_file();
    let message = std::fs::read_to_string(&path).ok()?;
    let _ = std::fs::remove_file(&path);
    Some(message)
}
