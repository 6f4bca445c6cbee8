//! Debounced flush manager: the "dirty -> export" loop.
//!
//! A dedicated worker thread owns the state machine
//! `Idle -> DirtyPending -> Flushing -> Idle`, with `Draining -> Shut` on
//! shutdown. Mutations signal dirt over a channel; each signal (re)arms the
//! debounce window, so a burst of mutations inside one window produces
//! exactly one export.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

/// Flush callback: performs one export, returning a short error string on
/// failure. The manager owns retry/health bookkeeping, not the callback.
pub type FlushFn = Box<dyn Fn() -> Result<(), String> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum State {
    Idle = 0,
    DirtyPending = 1,
    Flushing = 2,
    Draining = 3,
    Shut = 4,
}

impl State {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::DirtyPending,
            2 => Self::Flushing,
            3 => Self::Draining,
            4 => Self::Shut,
            _ => Self::Idle,
        }
    }
}

enum Signal {
    Dirty,
    Shutdown,
}

/// Observable flush health, surfaced through the daemon's health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushStatus {
    /// Completed flush attempts (successes and failures).
    pub flushes: u64,
    /// Consecutive failures since the last success.
    pub consecutive_failures: u32,
    /// The last failure message, if the most recent flush failed.
    pub last_error: Option<String>,
}

#[derive(Default)]
struct Shared {
    state: AtomicU8,
    flushes: AtomicU64,
    consecutive_failures: AtomicU32,
    last_error: Mutex<Option<String>>,
}

/// Debounced, event-driven flush manager.
///
/// Shared across connection threads, so the channel sender sits behind a
/// mutex.
pub struct FlushManager {
    tx: Mutex<mpsc::Sender<Signal>>,
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl FlushManager {
    /// Starts the worker thread with the given debounce window and export
    /// callback.
    pub fn start(debounce: Duration, flush: FlushFn) -> Self {
        let (tx, rx) = mpsc::channel::<Signal>();
        let shared = Arc::new(Shared::default());

        let worker_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("braid-flush".to_owned())
            .spawn(move || run_worker(rx, worker_shared, debounce, flush))
            .expect("failed to spawn flush worker");

        Self {
            tx: Mutex::new(tx),
            shared,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Signals that the store has uncommitted mirror changes.
    ///
    /// Re-arms the debounce window; a burst of calls inside one window
    /// coalesces into a single flush. Refused after shutdown.
    pub fn mark_dirty(&self) {
        if self.current_state() >= State::Draining as u8 {
            debug!("mark_dirty ignored: flush manager is draining or shut");
            return;
        }
        if let Ok(tx) = self.tx.lock() {
            let _ = tx.send(Signal::Dirty);
        }
    }

    /// Drains and stops the worker. If dirt is pending, one final flush runs
    /// synchronously before this returns. Idempotent; no flush runs after it
    /// returns.
    pub fn shutdown(&self) {
        let mut guard = match self.handle.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(handle) = guard.take() else {
            return; // Already shut.
        };
        self.shared
            .state
            .store(State::Draining as u8, Ordering::SeqCst);
        if let Ok(tx) = self.tx.lock() {
            let _ = tx.send(Signal::Shutdown);
        }
        if handle.join().is_err() {
            error!("flush worker panicked during shutdown");
        }
        self.shared.state.store(State::Shut as u8, Ordering::SeqCst);
        info!("flush manager shut down");
    }

    /// Observable health counters.
    pub fn status(&self) -> FlushStatus {
        FlushStatus {
            flushes: self.shared.flushes.load(Ordering::SeqCst),
            consecutive_failures: self.shared.consecutive_failures.load(Ordering::SeqCst),
            last_error: self
                .shared
                .last_error
                .lock()
                .map(|g| g.clone())
                .unwrap_or(None),
        }
    }

    fn current_state(&self) -> u8 {
        self.shared.state.load(Ordering::SeqCst)
    }
}

impl Drop for FlushManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for FlushManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushManager")
            .field("state", &State::from_u8(self.current_state()))
            .finish_non_exhaustive()
    }
}

fn run_worker(rx: mpsc::Receiver<Signal>, shared: Arc<Shared>, debounce: Duration, flush: FlushFn) {
    loop {
        // Idle: wait for the first dirt (or shutdown).
        match rx.recv() {
            Ok(Signal::Dirty) => {}
            Ok(Signal::Shutdown) | Err(_) => return,
        }
        shared
            .state
            .store(State::DirtyPending as u8, Ordering::SeqCst);

        // DirtyPending: every further dirt re-arms the window.
        let mut deadline = Instant::now() + debounce;
        let mut drain_after_flush = false;
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match rx.recv_timeout(deadline - now) {
                Ok(Signal::Dirty) => {
                    deadline = Instant::now() + debounce;
                }
                Ok(Signal::Shutdown) => {
                    drain_after_flush = true;
                    break;
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    drain_after_flush = true;
                    break;
                }
            }
        }

        shared.state.store(State::Flushing as u8, Ordering::SeqCst);
        run_flush(&shared, &flush);

        if drain_after_flush {
            return;
        }
        shared.state.store(State::Idle as u8, Ordering::SeqCst);
    }
}

fn run_flush(shared: &Shared, flush: &FlushFn) {
    debug!("flushing mirror");
    match flush() {
        Ok(()) => {
            shared.consecutive_failures.store(0, Ordering::SeqCst);
            if let Ok(mut last) = shared.last_error.lock() {
                *last = None;
            }
        }
        Err(message) => {
            let failures = shared.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
            error!(failures, %message, "mirror flush failed");
            if let Ok(mut last) = shared.last_error.lock() {
                *last = Some(message);
            }
        }
    }
    shared.flushes.fetch_add(1, Ordering::SeqCst);
}
