//! Client side of the braid control socket, plus the daemon/direct fallback
//! selector.
//!
//! Every invocation resolves to exactly one of two modes: **daemon** (the
//! workspace coordinator owns the store; we speak frames over its socket) or
//! **direct** (we open the store in-process). The selector records exactly
//! one reason for the choice; the returned handle exposes the same
//! operations either way.

pub mod error;
pub mod handle;
pub mod selector;
pub mod socket;

pub use error::ClientError;
pub use handle::WorkspaceHandle;
pub use selector::{FallbackReason, Mode, Selection, SelectorOptions, select_mode};
pub use socket::SocketClient;
