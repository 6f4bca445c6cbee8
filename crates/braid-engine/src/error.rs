//! Engine error taxonomy.
//!
//! Wraps the storage and sync taxonomies and adds the engine-level gates
//! (readonly, staleness, fresh clone, deadlines). [`EngineError::kind`] is
//! the wire contract; messages are advisory.

use braid_storage::StorageError;
use braid_sync::SyncError;

/// Errors surfaced by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Config(#[from] braid_config::ConfigError),

    #[error(transparent)]
    Validation(#[from] braid_core::validation::ValidationError),

    /// The workspace was opened read-only.
    #[error("workspace is read-only")]
    Readonly,

    /// The operation ran past its deadline.
    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    /// The store is an uninitialized clone sitting next to a populated
    /// mirror; the message is the actionable guide.
    #[error("{guide}")]
    FreshClone { guide: String },

    /// The requested opcode is not supported by this engine.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Catch-all for internal invariant breaks.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Stable wire kind for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Storage(e) => e.kind(),
            Self::Sync(e) => e.kind(),
            Self::Config(_) => "validation",
            Self::Validation(_) => "validation",
            Self::Readonly => "readonly_mode",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::FreshClone { .. } => "fresh_clone",
            Self::Unsupported(_) => "unsupported_op",
            Self::Internal(_) => "fatal",
        }
    }

    /// Returns `true` for `not_found`-kind errors.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_not_found())
    }
}
