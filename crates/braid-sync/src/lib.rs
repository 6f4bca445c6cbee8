//! Mirror synchronization for the braid system.
//!
//! Keeps the on-disk text mirror equal to the store contents (modulo
//! ephemeral issues): export with atomic writes and hash bookkeeping, import
//! with hash-diffed merging, staleness detection, fresh-clone guidance, and
//! the debounced flush manager that drives auto-export.

pub mod error;
pub mod export;
pub mod flush;
pub mod import;
pub mod staleness;

pub use error::{Result, SyncError};
pub use export::{ExportStats, export};
pub use flush::{FlushManager, FlushStatus};
pub use import::{ImportOptions, ImportReport, import};
pub use staleness::{
    Staleness, auto_import_if_newer, fresh_clone_guide, is_fresh_clone, staleness_check,
};
