//! Error taxonomy for mirror synchronization.

use braid_core::format::FormatError;
use braid_storage::StorageError;

/// Errors from export/import/staleness operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The mirror file could not be read or written.
    #[error("mirror I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The mirror file failed to decode.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// The store rejected an operation.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The mirror has diverged from the store since the last export.
    #[error("mirror file is stale: {reason}")]
    Stale { reason: String },

    /// Import in strict mode rejected a record.
    #[error("record {id} failed validation: {reason}")]
    StrictValidation { id: String, reason: String },
}

/// Result alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Stable wire kind for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "transient_io",
            Self::Format(e) => match e {
                FormatError::ConflictMarkers => "conflict",
                _ => "validation",
            },
            Self::Storage(e) => e.kind(),
            Self::Stale { .. } => "staleness",
            Self::StrictValidation { .. } => "validation",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(
            SyncError::Format(FormatError::ConflictMarkers).kind(),
            "conflict"
        );
        assert_eq!(
            SyncError::Stale {
                reason: "x".into()
            }
            .kind(),
            "staleness"
        );
        assert_eq!(
            SyncError::Storage(StorageError::not_found("issue", "a")).kind(),
            "not_found"
        );
    }
}
