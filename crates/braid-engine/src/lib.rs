//! The operation surface of a braid workspace.
//!
//! An [`Engine`] bundles the store, the mirror synchronizer, the flush
//! manager, and the mutation bus behind the operations both the daemon
//! dispatcher and direct-mode clients call. Capability flags and the
//! actor/deadline context are threaded explicitly; nothing reads global
//! state.

pub mod bus;
pub mod context;
pub mod engine;
pub mod error;

pub use bus::{MutationBus, MutationEvent};
pub use context::{Capabilities, OpContext, resolve_actor};
pub use engine::{Engine, MirrorStatus, NewIssue, StatusSummary};
pub use error::{EngineError, Result};
