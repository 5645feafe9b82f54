//! Interpreter session lifecycle
//!
//! A [`Session`] owns exactly one engine instance and everything around
//! it: the dedicated engine thread the instance lives on, the log buffer
//! its output lands in, and the dispatcher that delivers that output to
//! the registered sink. The consumer-facing API is meant to be driven from
//! a single owner thread - `execute_script` blocks its caller, so drive it
//! from a worker thread, never from a UI or event-loop thread.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::dispatch::{CoalescingDispatcher, DEFAULT_MIN_NOTIFY_INTERVAL};
use crate::engine::{EngineInterrupt, EvalError, EvalValue, LogEmitter, ScriptEngine};
use crate::error::SessionError;
use crate::outcome::ExecutionOutcome;
use ember_logs::{LogBuffer, LogSink};

/// The three directories an engine is constructed against
///
/// Resolved and provisioned by an external collaborator; the session only
/// checks that they exist and are readable before handing them to the
/// engine factory.
#[derive(Debug, Clone)]
pub struct SessionPaths {
    /// Interpreter base directory (stdlib, bundled scripts)
    pub base_dir: PathBuf,
    /// Directory holding native extensions
    pub native_ext_dir: PathBuf,
    /// Working directory for script execution
    pub work_dir: PathBuf,
}

impl SessionPaths {
    pub fn new(
        base_dir: impl Into<PathBuf>,
        native_ext_dir: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
    ) -> SessionPaths {
        SessionPaths {
            base_dir: base_dir.into(),
            native_ext_dir: native_ext_dir.into(),
            work_dir: work_dir.into(),
        }
    }

    fn validate(&self) -> Result<(), SessionError> {
        for path in [&self.base_dir, &self.native_ext_dir, &self.work_dir] {
            if !path.is_dir() {
                return Err(SessionError::InvalidPath {
                    path: path.clone(),
                    reason: "not an existing directory".to_string(),
                });
            }
            if let Err(e) = std::fs::read_dir(path) {
                return Err(SessionError::InvalidPath {
                    path: path.clone(),
                    reason: format!("not readable: {}", e),
                });
            }
        }
        Ok(())
    }
}

/// Session lifecycle state, readable without locking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Accepting executions
    Running = 0,
    /// An uninterruptible eval outlived its timeout; the engine's state is
    /// in doubt and further execution is refused
    Degraded = 1,
    /// Torn down; every operation fails with `SessionClosed`
    Closed = 2,
}

impl SessionState {
    fn from_u8(value: u8) -> SessionState {
        match value {
            0 => SessionState::Running,
            1 => SessionState::Degraded,
            _ => SessionState::Closed,
        }
    }
}

/// Tunables owned by the session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Minimum interval between sink notifications
    pub min_notify_interval: Duration,
    /// How long an interrupted eval gets to unwind before the session
    /// falls back to `Degraded`
    pub interrupt_grace: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            min_notify_interval: DEFAULT_MIN_NOTIFY_INTERVAL,
            interrupt_grace: Duration::from_secs(1),
        }
    }
}

enum EngineRequest {
    Eval {
        source: String,
        reply: Sender<Result<EvalValue, EvalError>>,
    },
}

type InitReply = Result<Option<Arc<dyn EngineInterrupt>>, anyhow::Error>;

/// One managed lifetime of a native interpreter instance
///
/// Not `Sync`: all executions and the close go through one owner. Dropping
/// the session closes it, so release happens on every exit path.
pub struct Session {
    paths: SessionPaths,
    state: AtomicU8,
    req_tx: Option<Sender<EngineRequest>>,
    engine_thread: Option<JoinHandle<()>>,
    interrupter: Option<Arc<dyn EngineInterrupt>>,
    buffer: Arc<LogBuffer>,
    dispatcher: Option<CoalescingDispatcher>,
    options: SessionOptions,
}

impl Session {
    /// Construct the engine on a fresh engine thread and start log
    /// delivery to `sink`.
    ///
    /// The factory runs on the engine thread, so thread-affine native
    /// instances are created where they will be used. Fails with
    /// `InvalidPath` before the factory runs, or `NativeInitFailure` when
    /// the factory does; on either failure everything already started is
    /// torn back down before returning.
    pub fn create<F>(
        paths: SessionPaths,
        engine_factory: F,
        sink: impl LogSink,
        options: SessionOptions,
    ) -> Result<Session, SessionError>
    where
        F: FnOnce(&SessionPaths) -> anyhow::Result<Box<dyn ScriptEngine>> + Send + 'static,
    {
        paths.validate()?;

        let buffer = Arc::new(LogBuffer::new());
        let mut dispatcher = CoalescingDispatcher::spawn(
            Arc::clone(&buffer),
            Box::new(sink),
            options.min_notify_interval,
        );
        let emitter = LogEmitter::new(Arc::clone(&buffer), dispatcher.handle());

        let (req_tx, req_rx) = mpsc::channel();
        let (init_tx, init_rx) = mpsc::channel();
        let thread_paths = paths.clone();
        let engine_thread = thread::Builder::new()
            .name("ember-engine".to_string())
            .spawn(move || run_engine_thread(engine_factory, thread_paths, emitter, init_tx, req_rx))
            .expect("failed to spawn engine thread");

        let interrupter = match init_rx.recv() {
            Ok(Ok(interrupter)) => interrupter,
            Ok(Err(e)) => {
                let _ = engine_thread.join();
                dispatcher.shutdown();
                return Err(SessionError::NativeInitFailure(e));
            }
            Err(_) => {
                let _ = engine_thread.join();
                dispatcher.shutdown();
                return Err(SessionError::NativeInitFailure(anyhow::anyhow!(
                    "engine thread terminated during initialization"
                )));
            }
        };

        info!(
            target: "session",
            base_dir = %paths.base_dir.display(),
            work_dir = %paths.work_dir.display(),
            interruptible = interrupter.is_some(),
            "interpreter session ready"
        );

        Ok(Session {
            paths,
            state: AtomicU8::new(SessionState::Running as u8),
            req_tx: Some(req_tx),
            engine_thread: Some(engine_thread),
            interrupter,
            buffer,
            dispatcher: Some(dispatcher),
            options,
        })
    }

    pub fn paths(&self) -> &SessionPaths {
        &self.paths
    }

    /// Current lifecycle state - a lock-free atomic read
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    /// Ask the dispatcher for a delivery no earlier than `delay` from now,
    /// giving asynchronous producer threads time to catch up first.
    pub fn flush_logs(&self, delay: Duration) {
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.request_flush(delay);
        }
    }

    fn ensure_runnable(&self) -> Result<(), SessionError> {
        match self.state() {
            SessionState::Running => Ok(()),
            SessionState::Degraded => Err(SessionError::SessionDegraded),
            SessionState::Closed => Err(SessionError::SessionClosed),
        }
    }

    fn degrade(&self, reason: &str) {
        let flipped = self
            .state
            .compare_exchange(
                SessionState::Running as u8,
                SessionState::Degraded as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if flipped {
            warn!(target: "session", "session degraded: {}", reason);
        }
    }

    /// Run one script, blocking until the engine replies or `timeout`
    /// elapses.
    ///
    /// A timeout returns `Timeout` without making the session unusable
    /// when the engine can be interrupted; otherwise the engine's state is
    /// in doubt and the session degrades.
    pub fn execute_script(
        &self,
        source: &str,
        timeout: Duration,
    ) -> Result<ExecutionOutcome, SessionError> {
        self.ensure_runnable()?;
        let Some(req_tx) = self.req_tx.as_ref() else {
            return Err(SessionError::SessionClosed);
        };

        let (reply_tx, reply_rx) = mpsc::channel();
        if req_tx
            .send(EngineRequest::Eval {
                source: source.to_string(),
                reply: reply_tx,
            })
            .is_err()
        {
            // Engine thread is gone without a close - treat as degraded
            self.degrade("engine thread terminated unexpectedly");
            return Err(SessionError::SessionDegraded);
        }

        match reply_rx.recv_timeout(timeout) {
            Ok(Ok(value)) => Ok(ExecutionOutcome::Success {
                value: value.summary,
            }),
            Ok(Err(e)) => Ok(ExecutionOutcome::Failure {
                message: e.to_string(),
            }),
            Err(RecvTimeoutError::Timeout) => Ok(self.handle_timeout(timeout, reply_rx)),
            Err(RecvTimeoutError::Disconnected) => {
                self.degrade("engine thread died during eval");
                Ok(ExecutionOutcome::Failure {
                    message: "interpreter thread terminated during execution".to_string(),
                })
            }
        }
    }

    /// The timer fired before the engine replied. The timeout outcome is
    /// already decided; what remains is whether the session survives it.
    fn handle_timeout(
        &self,
        timeout: Duration,
        reply_rx: Receiver<Result<EvalValue, EvalError>>,
    ) -> ExecutionOutcome {
        match &self.interrupter {
            Some(interrupter) => {
                debug!(target: "session", ?timeout, "eval timed out, interrupting engine");
                interrupter.interrupt();
                match reply_rx.recv_timeout(self.options.interrupt_grace) {
                    Ok(_) => {
                        // Eval unwound; engine is consistent and the
                        // session stays usable
                    }
                    Err(_) => {
                        self.degrade("interrupted eval did not unwind within the grace period");
                    }
                }
            }
            None => {
                self.degrade("engine cannot interrupt an in-flight eval");
            }
        }
        ExecutionOutcome::Timeout { limit: timeout }
    }

    /// Tear the session down. Idempotent: only the first call does any
    /// work, later calls are no-ops. Never fails - teardown problems are
    /// logged and swallowed, and no log delivery happens after this
    /// returns.
    pub fn close(&mut self) {
        let previous =
            SessionState::from_u8(self.state.swap(SessionState::Closed as u8, Ordering::SeqCst));
        if previous == SessionState::Closed {
            return;
        }

        debug!(target: "session", ?previous, "closing interpreter session");

        // Disconnecting the request channel stops the engine thread's
        // receive loop; the engine's shutdown runs there before it exits
        drop(self.req_tx.take());
        if let Some(engine_thread) = self.engine_thread.take() {
            if previous == SessionState::Degraded {
                // The thread may be stuck inside native code - joining
                // could hang forever, so it is detached instead
                warn!(target: "session", "detaching engine thread stuck in degraded eval");
                drop(engine_thread);
            } else if engine_thread.join().is_err() {
                warn!(target: "session", "engine thread panicked during teardown");
            }
        }

        // Final synchronous drain: whatever the engine managed to emit is
        // delivered, and the sink is never called again afterwards
        if let Some(mut dispatcher) = self.dispatcher.take() {
            dispatcher.shutdown();
        }

        info!(target: "session", "interpreter session closed");
    }

    /// Records published but not yet delivered to the sink
    pub fn buffered_log_records(&self) -> usize {
        self.buffer.len()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_engine_thread<F>(
    engine_factory: F,
    paths: SessionPaths,
    emitter: LogEmitter,
    init_tx: Sender<InitReply>,
    req_rx: Receiver<EngineRequest>,
) where
    F: FnOnce(&SessionPaths) -> anyhow::Result<Box<dyn ScriptEngine>>,
{
    let mut engine = match engine_factory(&paths) {
        Ok(engine) => engine,
        Err(e) => {
            let _ = init_tx.send(Err(e));
            return;
        }
    };
    let _ = init_tx.send(Ok(engine.interrupter()));

    while let Ok(request) = req_rx.recv() {
        match request {
            EngineRequest::Eval { source, reply } => {
                let result = engine.eval(&source, &emitter);
                // A dropped receiver means the caller timed out; the
                // late result is discarded
                let _ = reply.send(result);
            }
        }
    }

    engine.shutdown();
    debug!(target: "session", "engine thread exiting");
}
