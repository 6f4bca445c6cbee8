//! Health reporting for the control socket.

use serde::Deserialize;
use tracing::debug;

use braid_config::WorkspacePaths;
use braid_engine::Engine;
use braid_proto::{HealthReport, HealthState, PROTOCOL_VERSION, is_compatible};

/// Free disk space below this flips health to degraded.
pub const MIN_FREE_BYTES: u64 = 100 * 1024 * 1024;

/// Args accepted by the `Health` opcode.
#[derive(Debug, Default, Deserialize)]
pub struct HealthArgs {
    /// The caller's protocol version, for the compatibility verdict.
    #[serde(default)]
    pub version: Option<String>,
}

/// Builds the health report for this daemon.
///
/// Unhealthy: the store no longer answers. Degraded: low disk on the
/// workspace volume, or the flush manager has hit its consecutive-failure
/// threshold. Healthy otherwise.
pub fn health_report(engine: &Engine, paths: &WorkspacePaths, args: &HealthArgs) -> HealthReport {
    let compatible = args
        .version
        .as_deref()
        .map(|theirs| is_compatible(PROTOCOL_VERSION, theirs))
        .unwrap_or(true);

    let ctx = braid_engine::OpContext::new("health");
    if let Err(e) = engine.statistics(&ctx) {
        return HealthReport {
            status: HealthState::Unhealthy,
            version: PROTOCOL_VERSION.to_owned(),
            compatible,
            error: Some(e.to_string()),
        };
    }

    let mut degraded_reason: Option<String> = None;

    match fs2::available_space(&paths.braid_dir) {
        Ok(free) if free < MIN_FREE_BYTES => {
            degraded_reason = Some(format!("low disk space: {free} bytes free"));
        }
        Ok(_) => {}
        Err(e) => debug!("disk space probe failed: {e}"),
    }

    if degraded_reason.is_none() {
        if let Some(status) = engine.flush_status() {
            if status.consecutive_failures >= engine.flush_failure_threshold() {
                degraded_reason = Some(format!(
                    "{} consecutive flush failures: {}",
                    status.consecutive_failures,
                    status.last_error.unwrap_or_default()
                ));
            }
        }
    }

    match degraded_reason {
        Some(reason) => HealthReport {
            status: HealthState::Degraded,
            version: PROTOCOL_VERSION.to_owned(),
            compatible,
            error: Some(reason),
        },
        None => HealthReport {
            status: HealthState::Healthy,
            version: PROTOCOL_VERSION.to_owned(),
            compatible,
            error: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_config::{BraidConfig, ensure_braid_dir};
    use braid_engine::Capabilities;

    fn engine_and_paths() -> (tempfile::TempDir, Engine, WorkspacePaths) {
        let dir = tempfile::tempdir().unwrap();
        let braid_dir = ensure_braid_dir(dir.path()).unwrap();
        let paths = WorkspacePaths::new(braid_dir);
        let mut config = BraidConfig::default();
        config.prefix = Some("t".into());
        let engine = Engine::open(paths.clone(), config, Capabilities::default()).unwrap();
        (dir, engine, paths)
    }

    #[test]
    fn healthy_on_working_store() {
        let (_dir, engine, paths) = engine_and_paths();
        let report = health_report(&engine, &paths, &HealthArgs::default());
        assert_eq!(report.status, HealthState::Healthy);
        assert_eq!(report.version, PROTOCOL_VERSION);
        assert!(report.compatible);
    }

    #[test]
    fn version_mismatch_reported_incompatible() {
        let (_dir, engine, paths) = engine_and_paths();
        let report = health_report(
            &engine,
            &paths,
            &HealthArgs {
                version: Some("99.0.0".into()),
            },
        );
        assert!(!report.compatible);
        // Compatibility does not affect health itself.
        assert_eq!(report.status, HealthState::Healthy);
    }
}
