//! Canonical file layout inside the `.braid/` workspace directory.

use std::path::{Path, PathBuf};

/// The files the core reads and writes inside one workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePaths {
    /// The `.braid/` directory itself.
    pub braid_dir: PathBuf,
}

impl WorkspacePaths {
    /// Builds the layout for a given `.braid/` directory.
    pub fn new(braid_dir: impl Into<PathBuf>) -> Self {
        Self {
            braid_dir: braid_dir.into(),
        }
    }

    /// The VCS-tracked text mirror.
    pub fn mirror_file(&self) -> PathBuf {
        self.braid_dir.join("issues.jsonl")
    }

    /// The durable SQLite store.
    pub fn db_file(&self) -> PathBuf {
        self.braid_dir.join("braid.db")
    }

    /// The workspace configuration file.
    pub fn config_file(&self) -> PathBuf {
        self.braid_dir.join("config.yaml")
    }

    /// The daemon's Unix domain socket.
    pub fn socket_file(&self) -> PathBuf {
        self.braid_dir.join("socket")
    }

    /// The daemon's pid/lock file.
    pub fn pid_file(&self) -> PathBuf {
        self.braid_dir.join("braidd.pid")
    }

    /// Endpoint descriptor written next to the socket for introspection.
    pub fn endpoint_file(&self) -> PathBuf {
        self.braid_dir.join("endpoint.json")
    }

    /// Where a dying daemon records its fatal error for the next client.
    pub fn daemon_error_file(&self) -> PathBuf {
        self.braid_dir.join("daemon-error")
    }

    /// The workspace root (the parent of `.braid/`).
    pub fn workspace_root(&self) -> Option<&Path> {
        self.braid_dir.parent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout() {
        let paths = WorkspacePaths::new("/work/.braid");
        assert_eq!(paths.mirror_file(), PathBuf::from("/work/.braid/issues.jsonl"));
        assert_eq!(paths.db_file(), PathBuf::from("/work/.braid/braid.db"));
        assert_eq!(paths.socket_file(), PathBuf::from("/work/.braid/socket"));
        assert_eq!(paths.pid_file(), PathBuf::from("/work/.braid/braidd.pid"));
        assert_eq!(paths.endpoint_file(), PathBuf::from("/work/.braid/endpoint.json"));
        assert_eq!(paths.daemon_error_file(), PathBuf::from("/work/.braid/daemon-error"));
        assert_eq!(paths.workspace_root(), Some(Path::new("/work")));
    }
}
