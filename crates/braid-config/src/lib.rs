//! Workspace discovery and configuration for the braid system.
//!
//! A braid workspace is a project directory containing a `.braid/` metadata
//! directory. This crate finds that directory, loads `config.yaml`, and
//! derives the canonical paths of every file the core touches.

pub mod braid_dir;
pub mod config;
pub mod paths;

pub use braid_dir::{ensure_braid_dir, find_braid_dir, find_braid_dir_or_error};
pub use config::{BraidConfig, ConfigError, load_config, save_config};
pub use paths::WorkspacePaths;
