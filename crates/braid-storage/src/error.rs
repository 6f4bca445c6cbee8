//! Storage error taxonomy.
//!
//! Every variant maps onto a stable wire kind via [`StorageError::kind`];
//! callers branch on the kind, the display string is advisory.

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested entity was not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g., "issue", "config").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// An issue with this ID already exists.
    #[error("duplicate issue id: {id}")]
    DuplicateId {
        /// The conflicting identifier.
        id: String,
    },

    /// The ID is reserved by a tombstone and may not be reused.
    #[error("issue id {id} is tombstoned and cannot be reused")]
    Tombstoned { id: String },

    /// A validation constraint was violated.
    #[error("validation error: {message}")]
    Validation {
        /// Description of the validation failure.
        message: String,
        /// Stable reason code (e.g., "missing_title", "invalid_prefix").
        reason: &'static str,
    },

    /// Adding a dependency would create a cycle in the blocking graph.
    #[error("dependency would create a cycle: {}", path.join(" -> "))]
    CycleDetected {
        /// The offending path, starting and ending at the same issue.
        path: Vec<String>,
    },

    /// The store has not been initialized for this workspace.
    #[error("store not initialized: {reason}")]
    NotInitialized {
        /// Why the store is considered uninitialized.
        reason: String,
    },

    /// Writer contention exceeded the configured busy timeout.
    #[error("write lock timeout: {0}")]
    LockTimeout(String),

    /// Failed to establish or maintain a database connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// A transaction operation failed.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// A schema migration failed.
    #[error("migration {name} failed: {reason}")]
    Migration {
        /// Name of the migration that failed.
        name: String,
        /// Underlying error description.
        reason: String,
    },

    /// A raw SQLite query error.
    #[error("query error: {0}")]
    Query(rusqlite::Error),

    /// JSON serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Catch-all for unexpected internal errors.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the storage crate.
pub type Result<T> = std::result::Result<T, StorageError>;

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        // Busy/locked errors are a distinct kind so callers can retry.
        if let rusqlite::Error::SqliteFailure(ref ffi, ref msg) = e {
            if matches!(
                ffi.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ) {
                return Self::LockTimeout(
                    msg.clone().unwrap_or_else(|| "database is busy".to_owned()),
                );
            }
        }
        Self::Query(e)
    }
}

impl From<braid_core::validation::ValidationError> for StorageError {
    fn from(e: braid_core::validation::ValidationError) -> Self {
        let reason = e.reason();
        Self::Validation {
            message: e.to_string(),
            reason,
        }
    }
}

impl StorageError {
    // -- Constructors --------------------------------------------------------

    /// Creates a [`StorageError::NotFound`] for the given entity kind and id.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a [`StorageError::Validation`] with the given message and reason.
    pub fn validation(message: impl Into<String>, reason: &'static str) -> Self {
        Self::Validation {
            message: message.into(),
            reason,
        }
    }

    // -- Predicates ----------------------------------------------------------

    /// Returns `true` if this is a [`StorageError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if the error is transient and the operation may succeed
    /// on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout(_) | Self::Connection(_) | Self::Transaction(_)
        )
    }

    /// Stable wire kind for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::DuplicateId { .. } | Self::Tombstoned { .. } | Self::CycleDetected { .. } => {
                "integrity"
            }
            Self::Validation { .. } => "validation",
            Self::LockTimeout(_) => "lock_timeout",
            Self::Connection(_) | Self::Transaction(_) => "transient_io",
            Self::NotInitialized { .. } => "fresh_clone",
            Self::Migration { .. } | Self::Query(_) | Self::Serialization(_) | Self::Internal(_) => {
                "fatal"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(StorageError::not_found("issue", "x").kind(), "not_found");
        assert_eq!(
            StorageError::DuplicateId { id: "x".into() }.kind(),
            "integrity"
        );
        assert_eq!(
            StorageError::CycleDetected { path: vec![] }.kind(),
            "integrity"
        );
        assert_eq!(StorageError::LockTimeout("busy".into()).kind(), "lock_timeout");
        assert_eq!(
            StorageError::NotInitialized { reason: "no prefix".into() }.kind(),
            "fresh_clone"
        );
    }

    #[test]
    fn cycle_display_shows_path() {
        let err = StorageError::CycleDetected {
            path: vec!["a-1".into(), "a-2".into(), "a-1".into()],
        };
        assert_eq!(
            err.to_string(),
            "dependency would create a cycle: a-1 -> a-2 -> a-1"
        );
    }

    #[test]
    fn retryable_predicate() {
        assert!(StorageError::LockTimeout("x".into()).is_retryable());
        assert!(!StorageError::not_found("issue", "x").is_retryable());
    }

    #[test]
    fn validation_conversion_keeps_reason() {
        let verr = braid_core::validation::validate_prefix("BAD").unwrap_err();
        let serr: StorageError = verr.into();
        match serr {
            StorageError::Validation { reason, .. } => assert_eq!(reason, "invalid_prefix"),
            other => panic!("expected validation, got {:?}", other),
        }
    }
}
