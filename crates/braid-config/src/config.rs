//! Configuration types and loading.
//!
//! The main entry point is [`BraidConfig`], representing the contents of
//! `.braid/config.yaml`. All fields carry serde defaults so a partial file
//! loads cleanly.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read or written.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file contained invalid YAML.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The `.braid/` directory was not found.
    #[error("no .braid directory found (initialize the workspace first)")]
    BraidDirNotFound,

    /// A configuration value was invalid.
    #[error("invalid configuration value for key '{key}': {reason}")]
    InvalidValue {
        /// The configuration key that had an invalid value.
        key: String,
        /// Why the value is invalid.
        reason: String,
    },
}

/// A specialized `Result` type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// How issue IDs are minted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IdMode {
    /// Short content-hash suffix (default).
    #[default]
    Hash,
    /// Monotonic counter suffix.
    Sequential,
}

/// The full braid workspace configuration (`.braid/config.yaml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BraidConfig {
    /// Issue ID prefix (e.g., `"proj"`).
    #[serde(default, rename = "issue-prefix")]
    pub prefix: Option<String>,

    /// Debounce window for the auto-export flush, in seconds.
    #[serde(default = "default_flush_debounce", rename = "flush-debounce-secs")]
    pub flush_debounce_secs: u64,

    /// Whether clients may auto-start the workspace daemon.
    #[serde(default = "default_true", rename = "auto-start")]
    pub auto_start: bool,

    /// Skip the durable store; the text mirror is the only source of truth
    /// for the lifetime of one invocation.
    #[serde(default, rename = "no-db")]
    pub no_db: bool,

    /// ID minting mode.
    #[serde(default, rename = "id-mode")]
    pub id_mode: IdMode,

    /// Consecutive flush failures before health degrades.
    #[serde(default = "default_flush_failures", rename = "flush-failure-threshold")]
    pub flush_failure_threshold: u32,

    /// Comma-separated custom statuses accepted by validation.
    #[serde(default, rename = "custom-statuses")]
    pub custom_statuses: String,

    /// Comma-separated custom issue types accepted by validation.
    #[serde(default, rename = "custom-types")]
    pub custom_types: String,
}

impl Default for BraidConfig {
    fn default() -> Self {
        Self {
            prefix: None,
            flush_debounce_secs: default_flush_debounce(),
            auto_start: true,
            no_db: false,
            id_mode: IdMode::default(),
            flush_failure_threshold: default_flush_failures(),
            custom_statuses: String::new(),
            custom_types: String::new(),
        }
    }
}

fn default_flush_debounce() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_flush_failures() -> u32 {
    3
}

impl BraidConfig {
    /// Custom statuses as trimmed, non-empty strings.
    pub fn custom_status_list(&self) -> Vec<String> {
        parse_comma_list(&self.custom_statuses)
    }

    /// Custom issue types as trimmed, non-empty strings.
    pub fn custom_type_list(&self) -> Vec<String> {
        parse_comma_list(&self.custom_types)
    }
}

/// Parse a comma-separated string into trimmed, non-empty parts.
fn parse_comma_list(s: &str) -> Vec<String> {
    if s.is_empty() {
        return Vec::new();
    }
    s.split(',')
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

/// Load configuration from `config.yaml` inside the given `.braid/` directory.
///
/// A missing or empty file yields the defaults.
pub fn load_config(braid_dir: &Path) -> Result<BraidConfig> {
    let config_path = braid_dir.join("config.yaml");

    if !config_path.exists() {
        return Ok(BraidConfig::default());
    }

    let content = std::fs::read_to_string(&config_path)?;
    if content.trim().is_empty() {
        return Ok(BraidConfig::default());
    }

    let config: BraidConfig = serde_yaml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to `config.yaml` inside the given `.braid/` directory,
/// creating the directory if needed.
pub fn save_config(braid_dir: &Path, config: &BraidConfig) -> Result<()> {
    std::fs::create_dir_all(braid_dir)?;

    let config_path = braid_dir.join("config.yaml");
    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(config_path, yaml)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let cfg = BraidConfig::default();
        assert!(cfg.prefix.is_none());
        assert_eq!(cfg.flush_debounce_secs, 5);
        assert!(cfg.auto_start);
        assert!(!cfg.no_db);
        assert_eq!(cfg.id_mode, IdMode::Hash);
        assert_eq!(cfg.flush_failure_threshold, 3);
    }

    #[test]
    fn load_missing_config_returns_default() {
        let cfg = load_config(Path::new("/nonexistent/path/.braid")).unwrap();
        assert!(cfg.prefix.is_none());
    }

    #[test]
    fn roundtrip_config() {
        let dir = tempfile::tempdir().unwrap();
        let braid_dir = dir.path().join(".braid");

        let mut cfg = BraidConfig::default();
        cfg.prefix = Some("test".to_string());
        cfg.flush_debounce_secs = 1;
        cfg.id_mode = IdMode::Sequential;

        save_config(&braid_dir, &cfg).unwrap();
        let loaded = load_config(&braid_dir).unwrap();

        assert_eq!(loaded.prefix.as_deref(), Some("test"));
        assert_eq!(loaded.flush_debounce_secs, 1);
        assert_eq!(loaded.id_mode, IdMode::Sequential);
    }

    #[test]
    fn deserialize_partial_yaml() {
        let yaml = "issue-prefix: proj\nno-db: true\n";
        let cfg: BraidConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.prefix.as_deref(), Some("proj"));
        assert!(cfg.no_db);
        // Everything else stays default.
        assert!(cfg.auto_start);
        assert_eq!(cfg.flush_debounce_secs, 5);
    }

    #[test]
    fn comma_lists() {
        let mut cfg = BraidConfig::default();
        cfg.custom_statuses = "triage, needs-info".into();
        assert_eq!(cfg.custom_status_list(), vec!["triage", "needs-info"]);
        assert!(cfg.custom_type_list().is_empty());
        assert_eq!(parse_comma_list(",,"), Vec::<String>::new());
    }
}
