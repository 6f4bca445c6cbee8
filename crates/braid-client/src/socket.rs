//! Blocking socket client for the daemon protocol.

use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use serde_json::json;
use tracing::debug;

use braid_proto::{
    HealthReport, Opcode, PROTOCOL_VERSION, Request, Response, read_frame, write_frame,
};

use crate::error::ClientError;

/// Default per-operation timeout.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for health probes.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

/// A connected client speaking length-prefixed frames to one daemon.
pub struct SocketClient {
    stream: UnixStream,
    next_request_id: u64,
}

impl SocketClient {
    /// Connects to the daemon socket.
    pub fn connect(socket_path: &Path) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(socket_path)?;
        stream.set_read_timeout(Some(DEFAULT_OP_TIMEOUT))?;
        stream.set_write_timeout(Some(DEFAULT_OP_TIMEOUT))?;
        Ok(Self {
            stream,
            next_request_id: 1,
        })
    }

    /// Sends one request and waits for the matching response.
    pub fn call(
        &mut self,
        op: Opcode,
        args: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, ClientError> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        self.stream.set_read_timeout(Some(timeout))?;
        self.stream.set_write_timeout(Some(timeout))?;

        let request = Request {
            op,
            args,
            request_id,
            timeout_ms: Some(timeout.as_millis() as u64),
        };
        write_frame(&mut self.stream, &request)?;
        let response: Response = read_frame(&mut self.stream)?;

        if response.request_id != request_id {
            return Err(ClientError::Protocol(format!(
                "response correlation mismatch: sent {request_id}, got {}",
                response.request_id
            )));
        }
        if !response.success {
            return Err(ClientError::Remote {
                kind: response.error_kind,
                message: response.error,
            });
        }
        Ok(response.data)
    }

    /// Health handshake, announcing our protocol version.
    pub fn health(&mut self) -> Result<HealthReport, ClientError> {
        let data = self.call(
            Opcode::Health,
            json!({"version": PROTOCOL_VERSION}),
            HEALTH_TIMEOUT,
        )?;
        serde_json::from_value(data)
            .map_err(|e| ClientError::Protocol(format!("malformed health report: {e}")))
    }

    /// Asks the daemon to terminate gracefully. Errors are swallowed; a dead
    /// peer is the desired end state anyway.
    pub fn request_shutdown(&mut self) {
        debug!("requesting daemon shutdown");
        let _ = self.call(Opcode::Shutdown, json!({}), HEALTH_TIMEOUT);
    }
}

impl std::fmt::Debug for SocketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketClient").finish_non_exhaustive()
    }
}
