//! Client error types.

use braid_proto::FrameError;

/// Errors from client-side operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),

    /// The server (or direct engine) rejected the operation. `kind` is the
    /// stable contract.
    #[error("{kind}: {message}")]
    Remote { kind: String, message: String },

    /// The peer answered with something that is not this protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Engine(#[from] braid_engine::EngineError),

    #[error(transparent)]
    Config(#[from] braid_config::ConfigError),
}

impl ClientError {
    /// The stable error kind, unified across daemon and direct modes.
    pub fn kind(&self) -> String {
        match self {
            Self::Remote { kind, .. } => kind.clone(),
            Self::Engine(e) => e.kind().to_owned(),
            Self::Io(_) | Self::Frame(_) => "transient_io".to_owned(),
            Self::Protocol(_) => "fatal".to_owned(),
            Self::Config(_) => "validation".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_kind_passthrough() {
        let err = ClientError::Remote {
            kind: "integrity".into(),
            message: "cycle".into(),
        };
        assert_eq!(err.kind(), "integrity");
        assert_eq!(err.to_string(), "integrity: cycle");
    }
}
