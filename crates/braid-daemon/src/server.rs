//! The control-socket server.
//!
//! A nonblocking accept loop hands each connection to its own thread; frames
//! are served until the peer hangs up or shutdown begins. Writes serialize
//! through the engine's store lock; reads run concurrently. Shutdown stops
//! accepting, drains in-flight connections up to a grace deadline, then
//! shuts the engine down.

use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{debug, error, info, warn};

use braid_config::WorkspacePaths;
use braid_engine::Engine;
use braid_proto::{
    HealthState, Opcode, PROTOCOL_VERSION, Request, Response, is_compatible, read_frame,
    write_frame,
};

use crate::dispatch;
use crate::error::DaemonError;
use crate::health::{HealthArgs, health_report};
use crate::lifecycle::{Lifecycle, write_daemon_error};

/// How long shutdown waits for in-flight connections.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// Accept-loop poll interval while idle.
const ACCEPT_POLL: Duration = Duration::from_millis(25);

/// The workspace daemon server.
pub struct Server {
    paths: WorkspacePaths,
    engine: Arc<Engine>,
    shutdown: Arc<AtomicBool>,
    grace: Duration,
}

impl Server {
    /// Creates a server for the given workspace and engine.
    pub fn new(paths: WorkspacePaths, engine: Arc<Engine>) -> Self {
        Self {
            paths,
            engine,
            shutdown: Arc::new(AtomicBool::new(false)),
            grace: DEFAULT_GRACE,
        }
    }

    /// Shared flag that initiates graceful shutdown (signal handlers flip
    /// it; so does the `Shutdown` opcode).
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Overrides the drain grace period.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Binds the socket and serves until shutdown. Blocks the calling
    /// thread.
    pub fn run(&self) -> Result<(), DaemonError> {
        let lifecycle = Lifecycle::acquire(&self.paths)?;
        let listener = self.bind_socket()?;
        listener.set_nonblocking(true)?;
        info!(socket = %self.paths.socket_file().display(), "daemon listening");

        let in_flight = Arc::new(AtomicUsize::new(0));

        while !self.shutdown.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, _addr)) => {
                    let engine = Arc::clone(&self.engine);
                    let paths = self.paths.clone();
                    let shutdown = Arc::clone(&self.shutdown);
                    let counter = Arc::clone(&in_flight);
                    counter.fetch_add(1, Ordering::SeqCst);
                    std::thread::spawn(move || {
                        handle_connection(stream, &engine, &paths, &shutdown);
                        counter.fetch_sub(1, Ordering::SeqCst);
                    });
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    error!("accept failed: {e}");
                    write_daemon_error(&self.paths, &format!("accept failed: {e}"));
                    break;
                }
            }
        }

        info!("draining in-flight connections");
        drop(listener);
        let deadline = Instant::now() + self.grace;
        while in_flight.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        let leftover = in_flight.load(Ordering::SeqCst);
        if leftover > 0 {
            warn!(leftover, "grace deadline hit; abandoning connections");
        }

        self.engine.shutdown();
        lifecycle.cleanup();
        info!("daemon stopped");
        Ok(())
    }

    /// Binds the socket, probing any existing endpoint first.
    ///
    /// A healthy, version-compatible server on the other end means this
    /// instance must not start; anything else is a stale socket file from a
    /// dead daemon and gets swept.
    fn bind_socket(&self) -> Result<UnixListener, DaemonError> {
        let socket_path = self.paths.socket_file();

        if socket_path.exists() {
            match probe_existing(&socket_path) {
                Some(report)
                    if report.status != HealthState::Unhealthy
                        && is_compatible(PROTOCOL_VERSION, &report.version) =>
                {
                    return Err(DaemonError::AlreadyRunning);
                }
                Some(report) => {
                    // Mismatched or unhealthy peer: the *client* decides on
                    // restarts; this instance only refuses to double-bind.
                    info!(version = %report.version, status = ?report.status,
                        "existing endpoint is not serviceable; leaving it to its clients");
                    return Err(DaemonError::AlreadyRunning);
                }
                None => {
                    info!("removing stale socket file");
                    std::fs::remove_file(&socket_path)?;
                }
            }
        }

        let listener = UnixListener::bind(&socket_path).map_err(|e| DaemonError::BindFailed {
            path: socket_path.clone(),
            source: e,
        })?;
        // Same-user restriction.
        let _ = std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600));
        Ok(listener)
    }
}

/// Sends a Health request to an existing endpoint. `None` means nothing
/// answered (stale socket).
fn probe_existing(socket_path: &std::path::Path) -> Option<braid_proto::HealthReport> {
    let mut stream = UnixStream::connect(socket_path).ok()?;
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .ok()?;
    stream
        .set_write_timeout(Some(Duration::from_secs(2)))
        .ok()?;

    let request = Request {
        op: Opcode::Health,
        args: json!({"version": PROTOCOL_VERSION}),
        request_id: 0,
        timeout_ms: Some(2_000),
    };
    write_frame(&mut stream, &request).ok()?;
    let response: Response = read_frame(&mut stream).ok()?;
    serde_json::from_value(response.data).ok()
}

/// Serves one connection until EOF or shutdown.
fn handle_connection(
    mut stream: UnixStream,
    engine: &Engine,
    paths: &WorkspacePaths,
    shutdown: &AtomicBool,
) {
    debug!("connection opened");
    // Bounded reads so a wedged peer cannot pin the drain phase forever.
    let _ = stream.set_read_timeout(Some(Duration::from_secs(60)));

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let request: Request = match read_frame(&mut stream) {
            Ok(req) => req,
            Err(e) if e.is_eof() => break,
            Err(e) => {
                debug!("connection closed: {e}");
                break;
            }
        };

        let response = match request.op {
            Opcode::Health => {
                let args: HealthArgs =
                    serde_json::from_value(request.args.clone()).unwrap_or_default();
                Response::ok(
                    request.request_id,
                    json!(health_report(engine, paths, &args)),
                )
            }
            Opcode::Shutdown => {
                info!("shutdown requested over the socket");
                shutdown.store(true, Ordering::SeqCst);
                Response::ok(request.request_id, json!({"stopping": true}))
            }
            _ => dispatch::dispatch(engine, &request),
        };

        let is_shutdown = request.op == Opcode::Shutdown;
        if let Err(e) = write_frame(&mut stream, &response) {
            debug!("failed to write response: {e}");
            break;
        }
        if is_shutdown {
            break;
        }
    }
    debug!("connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_config::{BraidConfig, ensure_braid_dir};
    use braid_engine::Capabilities;

    fn start_server(dir: &tempfile::TempDir) -> (WorkspacePaths, Arc<AtomicBool>, std::thread::JoinHandle<()>) {
        let braid_dir = ensure_braid_dir(dir.path()).unwrap();
        let paths = WorkspacePaths::new(braid_dir);
        let mut config = BraidConfig::default();
        config.prefix = Some("t".into());
        config.id_mode = braid_config::config::IdMode::Sequential;
        let engine = Engine::open(paths.clone(), config, Capabilities::default()).unwrap();

        let server = Server::new(paths.clone(), Arc::new(engine)).with_grace(Duration::from_secs(1));
        let flag = server.shutdown_flag();
        let handle = std::thread::spawn(move || {
            server.run().unwrap();
        });

        // Wait for the socket to appear.
        let socket = paths.socket_file();
        for _ in 0..100 {
            if socket.exists() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        (paths, flag, handle)
    }

    fn call(stream: &mut UnixStream, op: Opcode, args: serde_json::Value, id: u64) -> Response {
        write_frame(
            stream,
            &Request {
                op,
                args,
                request_id: id,
                timeout_ms: None,
            },
        )
        .unwrap();
        read_frame(stream).unwrap()
    }

    #[test]
    fn health_create_show_over_socket() {
        let dir = tempfile::tempdir().unwrap();
        let (paths, flag, handle) = start_server(&dir);

        let mut stream = UnixStream::connect(paths.socket_file()).unwrap();

        let resp = call(
            &mut stream,
            Opcode::Health,
            json!({"version": PROTOCOL_VERSION}),
            1,
        );
        assert!(resp.success);
        assert_eq!(resp.data["status"], "healthy");
        assert_eq!(resp.data["compatible"], true);

        let resp = call(
            &mut stream,
            Opcode::Create,
            json!({"title": "Over the socket", "actor": "alice"}),
            2,
        );
        assert!(resp.success, "create failed: {}", resp.error);
        let id = resp.data["id"].as_str().unwrap().to_owned();

        let resp = call(&mut stream, Opcode::Show, json!({"id": id}), 3);
        assert!(resp.success);
        assert_eq!(resp.data["title"], "Over the socket");
        assert_eq!(resp.request_id, 3);

        flag.store(true, Ordering::SeqCst);
        handle.join().unwrap();
    }

    #[test]
    fn shutdown_opcode_stops_the_server() {
        let dir = tempfile::tempdir().unwrap();
        let (paths, _flag, handle) = start_server(&dir);

        let mut stream = UnixStream::connect(paths.socket_file()).unwrap();
        let resp = call(&mut stream, Opcode::Shutdown, json!({}), 1);
        assert!(resp.success);

        handle.join().unwrap();
        // Orderly shutdown removed the socket and pidfile.
        assert!(!paths.socket_file().exists());
        assert!(!paths.pid_file().exists());
    }

    #[test]
    fn concurrent_clients_each_get_their_responses() {
        let dir = tempfile::tempdir().unwrap();
        let (paths, flag, handle) = start_server(&dir);

        let mut workers = Vec::new();
        for n in 0..4u64 {
            let socket = paths.socket_file();
            workers.push(std::thread::spawn(move || {
                let mut stream = UnixStream::connect(socket).unwrap();
                let resp = call(
                    &mut stream,
                    Opcode::Create,
                    json!({"title": format!("issue {n}")}),
                    n,
                );
                assert!(resp.success, "create failed: {}", resp.error);
                assert_eq!(resp.request_id, n);
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }

        let mut stream = UnixStream::connect(paths.socket_file()).unwrap();
        let resp = call(&mut stream, Opcode::List, json!({}), 99);
        assert_eq!(resp.data.as_array().unwrap().len(), 4);

        flag.store(true, Ordering::SeqCst);
        handle.join().unwrap();
    }
}
