//! Discovery and management of the `.braid/` directory.
//!
//! The `.braid/` directory is the root of a workspace's metadata. Discovery
//! walks up the directory tree; the `BRAID_DIR` environment variable takes
//! precedence when set.

use crate::config::ConfigError;
use std::path::{Path, PathBuf};

/// The name of the braid metadata directory.
const BRAID_DIR_NAME: &str = ".braid";

/// Environment variable that overrides workspace discovery.
const BRAID_DIR_ENV: &str = "BRAID_DIR";

/// Walk up the directory tree from `start` looking for a `.braid/` directory.
///
/// Returns `None` if the filesystem root is reached without finding one.
pub fn find_braid_dir(start: &Path) -> Option<PathBuf> {
    if let Ok(env_dir) = std::env::var(BRAID_DIR_ENV) {
        let env_path = PathBuf::from(&env_dir);
        if env_path.is_dir() {
            return Some(env_path);
        }
    }

    let start = match start.canonicalize() {
        Ok(p) => p,
        Err(_) => return None,
    };

    let mut current = start.as_path();
    loop {
        let candidate = current.join(BRAID_DIR_NAME);
        if candidate.is_dir() {
            return Some(candidate);
        }

        match current.parent() {
            Some(parent) if parent != current => {
                current = parent;
            }
            _ => break,
        }
    }

    None
}

/// Like [`find_braid_dir`], but converts `None` into
/// [`ConfigError::BraidDirNotFound`].
pub fn find_braid_dir_or_error(start: &Path) -> Result<PathBuf, ConfigError> {
    find_braid_dir(start).ok_or(ConfigError::BraidDirNotFound)
}

/// Ensure a `.braid/` directory exists at the given path.
///
/// If `path` itself is not called `.braid`, a `.braid/` subdirectory is
/// created under it. Returns the `.braid/` path.
pub fn ensure_braid_dir(path: &Path) -> Result<PathBuf, ConfigError> {
    let braid_dir = if path.ends_with(BRAID_DIR_NAME) {
        path.to_path_buf()
    } else {
        path.join(BRAID_DIR_NAME)
    };

    std::fs::create_dir_all(&braid_dir)?;
    Ok(braid_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_in_temp() {
        let dir = tempfile::tempdir().unwrap();
        let braid = dir.path().join(".braid");
        std::fs::create_dir(&braid).unwrap();

        let found = find_braid_dir(dir.path()).unwrap().canonicalize().unwrap();
        assert_eq!(found, braid.canonicalize().unwrap());
    }

    #[test]
    fn find_from_nested_child() {
        let dir = tempfile::tempdir().unwrap();
        let braid = dir.path().join(".braid");
        std::fs::create_dir(&braid).unwrap();

        let child = dir.path().join("src").join("deep");
        std::fs::create_dir_all(&child).unwrap();

        let found = find_braid_dir(&child).unwrap().canonicalize().unwrap();
        assert_eq!(found, braid.canonicalize().unwrap());
    }

    #[test]
    fn ensure_creates() {
        let dir = tempfile::tempdir().unwrap();
        let result = ensure_braid_dir(dir.path()).unwrap();
        assert!(result.is_dir());
        assert!(result.ends_with(".braid"));
    }

    #[test]
    fn ensure_idempotent_and_name_aware() {
        let dir = tempfile::tempdir().unwrap();
        let braid = dir.path().join(".braid");
        let first = ensure_braid_dir(&braid).unwrap();
        let second = ensure_braid_dir(dir.path()).unwrap();
        assert_eq!(first, second);
    }
}
