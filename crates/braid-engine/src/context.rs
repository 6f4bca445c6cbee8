//! Capability flags and the per-operation context.

use std::time::{Duration, Instant};

use crate::error::{EngineError, Result};

/// Default deadline applied to operations that do not carry one.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(30);

/// Capability flags consumed by the engine.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    /// Reject all mutating operations.
    pub readonly: bool,
    /// Permit mutations despite a failed staleness check.
    pub allow_stale: bool,
    /// Skip the durable store; the mirror alone backs this invocation.
    pub no_db: bool,
    /// Disable the debounced auto-export loop.
    pub no_auto_flush: bool,
    /// Disable auto-import when the mirror is newer than the store.
    pub no_auto_import: bool,
    /// Override the store's busy timeout.
    pub lock_timeout: Option<Duration>,
}

/// Per-operation context: who is acting, and until when.
#[derive(Debug, Clone)]
pub struct OpContext {
    /// Actor recorded in the audit trail.
    pub actor: String,
    /// Cooperative cancellation point; checked at operation boundaries.
    pub deadline: Instant,
}

impl OpContext {
    /// Creates a context with the default operation deadline.
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            deadline: Instant::now() + DEFAULT_OP_TIMEOUT,
        }
    }

    /// Creates a context with an explicit timeout from now.
    pub fn with_timeout(actor: impl Into<String>, timeout: Duration) -> Self {
        Self {
            actor: actor.into(),
            deadline: Instant::now() + timeout,
        }
    }

    /// Fails with `deadline_exceeded` once the deadline has passed.
    pub fn check_deadline(&self) -> Result<()> {
        if Instant::now() > self.deadline {
            Err(EngineError::DeadlineExceeded)
        } else {
            Ok(())
        }
    }
}

/// Resolves the actor name for audit entries.
///
/// Priority: explicit value > `BRAID_ACTOR` env > `USER` env > `"unknown"`.
pub fn resolve_actor(explicit: Option<&str>) -> String {
    if let Some(actor) = explicit {
        if !actor.is_empty() {
            return actor.to_owned();
        }
    }
    if let Ok(actor) = std::env::var("BRAID_ACTOR") {
        if !actor.is_empty() {
            return actor;
        }
    }
    if let Ok(user) = std::env::var("USER").or_else(|_| std::env::var("USERNAME")) {
        if !user.is_empty() {
            return user;
        }
    }
    "unknown".to_owned()
}
