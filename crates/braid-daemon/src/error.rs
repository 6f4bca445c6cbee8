//! Daemon error types.

use std::path::PathBuf;

/// Errors from daemon startup and operation.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("another daemon already serves this workspace")]
    AlreadyRunning,

    #[error("failed to acquire workspace lock: {0}")]
    LockFailed(std::io::Error),

    #[error("failed to bind socket at {path}: {source}")]
    BindFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Engine(#[from] braid_engine::EngineError),

    #[error(transparent)]
    Config(#[from] braid_config::ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            DaemonError::AlreadyRunning.to_string(),
            "another daemon already serves this workspace"
        );
    }
}
