//! The workspace handle: one API, two transports.
//!
//! Daemon mode forwards frames over the socket; direct mode feeds the same
//! requests through the in-process dispatcher, so both modes produce
//! identical observable results by construction.

use std::sync::Mutex;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use braid_config::{BraidConfig, WorkspacePaths};
use braid_core::issue::Issue;
use braid_daemon::dispatch;
use braid_daemon::lifecycle::take_daemon_error;
use braid_engine::{Capabilities, Engine, MutationEvent};
use braid_proto::{Opcode, Request, Response};

use crate::error::ClientError;
use crate::selector::{FallbackReason, Mode, SelectorOptions, select_mode};
use crate::socket::{DEFAULT_OP_TIMEOUT, SocketClient};

/// A blocked issue as reported over the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockedEntry {
    pub issue: Issue,
    pub blocked_by: Vec<String>,
}

enum Backend {
    Daemon(Mutex<SocketClient>),
    Direct(Box<Engine>),
}

/// Handle to one workspace, in whichever mode the selector chose.
pub struct WorkspaceHandle {
    backend: Backend,
    reason: FallbackReason,
    timeout: Duration,
}

impl WorkspaceHandle {
    /// Selects a mode and opens the workspace.
    ///
    /// When the previous daemon died with a fatal error, the recorded
    /// message is surfaced through the log before the selection runs.
    pub fn open(
        paths: &WorkspacePaths,
        config: BraidConfig,
        caps: Capabilities,
        options: &SelectorOptions,
    ) -> Result<Self, ClientError> {
        if let Some(message) = take_daemon_error(paths) {
            info!("previous daemon exited with an error: {message}");
        }

        let selection = select_mode(paths, options);
        let backend = match selection.mode {
            Mode::Daemon => {
                let client = selection
                    .client
                    .ok_or_else(|| ClientError::Protocol("daemon mode without client".into()))?;
                Backend::Daemon(Mutex::new(client))
            }
            Mode::Direct => {
                let engine = Engine::open(paths.clone(), config, caps)?;
                Backend::Direct(Box::new(engine))
            }
        };

        Ok(Self {
            backend,
            reason: selection.reason,
            timeout: DEFAULT_OP_TIMEOUT,
        })
    }

    /// Opens directly against an already-constructed engine (tests, no_db
    /// invocations).
    pub fn direct(engine: Engine, reason: FallbackReason) -> Self {
        Self {
            backend: Backend::Direct(Box::new(engine)),
            reason,
            timeout: DEFAULT_OP_TIMEOUT,
        }
    }

    /// The selector's recorded justification for this handle's mode.
    pub fn fallback_reason(&self) -> FallbackReason {
        self.reason
    }

    /// Returns `true` when requests flow through the daemon.
    pub fn is_daemon(&self) -> bool {
        matches!(self.backend, Backend::Daemon(_))
    }

    /// Raw operation entry point; typed helpers below wrap it.
    pub fn call(&self, op: Opcode, args: Value) -> Result<Value, ClientError> {
        match &self.backend {
            Backend::Daemon(client) => {
                let mut client = client
                    .lock()
                    .map_err(|_| ClientError::Protocol("client mutex poisoned".into()))?;
                client.call(op, args, self.timeout)
            }
            Backend::Direct(engine) => {
                let request = Request {
                    op,
                    args,
                    request_id: 0,
                    timeout_ms: Some(self.timeout.as_millis() as u64),
                };
                let response: Response = dispatch::dispatch(engine, &request);
                if response.success {
                    Ok(response.data)
                } else {
                    Err(ClientError::Remote {
                        kind: response.error_kind,
                        message: response.error,
                    })
                }
            }
        }
    }

    // -- Typed operations ----------------------------------------------------

    pub fn create_issue(&self, args: Value) -> Result<Issue, ClientError> {
        decode(self.call(Opcode::Create, args)?)
    }

    pub fn show(&self, id: &str) -> Result<Issue, ClientError> {
        decode(self.call(Opcode::Show, json!({"id": id}))?)
    }

    pub fn list(&self) -> Result<Vec<Issue>, ClientError> {
        decode(self.call(Opcode::List, json!({}))?)
    }

    pub fn ready(&self) -> Result<Vec<Issue>, ClientError> {
        decode(self.call(Opcode::Ready, json!({}))?)
    }

    pub fn blocked(&self) -> Result<Vec<BlockedEntry>, ClientError> {
        decode(self.call(Opcode::Blocked, json!({}))?)
    }

    pub fn update(&self, args: Value) -> Result<Issue, ClientError> {
        decode(self.call(Opcode::Update, args)?)
    }

    pub fn close(&self, id: &str, reason: &str, actor: &str) -> Result<Issue, ClientError> {
        decode(self.call(
            Opcode::Close,
            json!({"id": id, "reason": reason, "actor": actor}),
        )?)
    }

    pub fn delete(&self, id: &str, actor: &str) -> Result<(), ClientError> {
        self.call(Opcode::Delete, json!({"id": id, "actor": actor}))?;
        Ok(())
    }

    pub fn add_dependency(
        &self,
        issue_id: &str,
        depends_on_id: &str,
        dep_type: &str,
        actor: &str,
    ) -> Result<(), ClientError> {
        self.call(
            Opcode::AddDependency,
            json!({
                "issue_id": issue_id,
                "depends_on_id": depends_on_id,
                "type": dep_type,
                "actor": actor,
            }),
        )?;
        Ok(())
    }

    pub fn remove_dependency(
        &self,
        issue_id: &str,
        depends_on_id: &str,
        actor: &str,
    ) -> Result<(), ClientError> {
        self.call(
            Opcode::RemoveDependency,
            json!({"issue_id": issue_id, "depends_on_id": depends_on_id, "actor": actor}),
        )?;
        Ok(())
    }

    pub fn comment(&self, id: &str, text: &str, actor: &str) -> Result<Value, ClientError> {
        self.call(
            Opcode::Comment,
            json!({"id": id, "text": text, "actor": actor}),
        )
    }

    pub fn import(&self, args: Value) -> Result<Value, ClientError> {
        self.call(Opcode::Import, args)
    }

    pub fn export(&self) -> Result<Value, ClientError> {
        self.call(Opcode::Export, json!({}))
    }

    pub fn status(&self) -> Result<Value, ClientError> {
        self.call(Opcode::Status, json!({}))
    }

    pub fn stats(&self) -> Result<Value, ClientError> {
        self.call(Opcode::Stats, json!({}))
    }

    pub fn vcs_status(&self) -> Result<Value, ClientError> {
        self.call(Opcode::VcsStatus, json!({}))
    }

    pub fn swarm(&self, epic_id: &str) -> Result<Value, ClientError> {
        self.call(Opcode::Swarm, json!({"epic_id": epic_id}))
    }

    pub fn mutations_since(&self, since_ms: i64) -> Result<Vec<MutationEvent>, ClientError> {
        decode(self.call(Opcode::Mutations, json!({"since_ms": since_ms}))?)
    }
}

fn decode<T: for<'de> Deserialize<'de>>(value: Value) -> Result<T, ClientError> {
    serde_json::from_value(value)
        .map_err(|e| ClientError::Protocol(format!("malformed response payload: {e}")))
}

impl std::fmt::Debug for WorkspaceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceHandle")
            .field("mode", &if self.is_daemon() { "daemon" } else { "direct" })
            .field("reason", &self.reason)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_config::ensure_braid_dir;

    fn direct_handle(dir: &tempfile::TempDir) -> WorkspaceHandle {
        let braid_dir = ensure_braid_dir(dir.path()).unwrap();
        let paths = WorkspacePaths::new(braid_dir);
        let mut config = BraidConfig::default();
        config.prefix = Some("t".into());
        config.id_mode = braid_config::config::IdMode::Sequential;
        WorkspaceHandle::open(
            &paths,
            config,
            Capabilities::default(),
            &SelectorOptions {
                force_direct: true,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn direct_mode_records_reason_and_serves_ops() {
        let dir = tempfile::tempdir().unwrap();
        let handle = direct_handle(&dir);

        assert!(!handle.is_daemon());
        assert_eq!(handle.fallback_reason(), FallbackReason::FlagNoDaemon);

        let issue = handle
            .create_issue(json!({"title": "Through the handle", "actor": "alice"}))
            .unwrap();
        assert_eq!(issue.id, "t-1");

        let shown = handle.show("t-1").unwrap();
        assert_eq!(shown.title, "Through the handle");
    }

    #[test]
    fn full_ready_flow_in_direct_mode() {
        let dir = tempfile::tempdir().unwrap();
        let handle = direct_handle(&dir);

        handle.create_issue(json!({"title": "A"})).unwrap();
        handle.create_issue(json!({"title": "B"})).unwrap();
        handle.add_dependency("t-2", "t-1", "blocks", "alice").unwrap();

        let ready: Vec<String> = handle.ready().unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(ready, vec!["t-1"]);

        let blocked = handle.blocked().unwrap();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].blocked_by, vec!["t-1"]);

        handle.close("t-1", "done", "alice").unwrap();
        let ready: Vec<String> = handle.ready().unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(ready, vec!["t-2"]);
    }

    #[test]
    fn errors_carry_stable_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let handle = direct_handle(&dir);

        let err = handle.show("t-404").unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn mutation_stream_through_handle() {
        let dir = tempfile::tempdir().unwrap();
        let handle = direct_handle(&dir);
        handle.create_issue(json!({"title": "watched"})).unwrap();

        let events = handle.mutations_since(0).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "created");
    }
}
