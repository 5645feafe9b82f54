//! The seam between the session and the native interpreter machinery
//!
//! The session never touches an interpreter directly; it drives a
//! [`ScriptEngine`] on a dedicated engine thread. Engines report their
//! output through the [`LogEmitter`] they are handed on every eval, and
//! declare through [`ScriptEngine::interrupter`] whether an in-flight eval
//! can be abandoned safely - that claim is what decides whether a timeout
//! degrades the session or not.

use std::sync::Arc;

use crate::dispatch::DispatchHandle;
use ember_logs::{LogBuffer, LogSource};

pub mod process;
pub mod stub;

/// Publish half of the session's log channel
///
/// Emitting never blocks the engine: it is one buffered append plus a
/// dispatcher wake-up.
#[derive(Clone)]
pub struct LogEmitter {
    buffer: Arc<LogBuffer>,
    dispatch: DispatchHandle,
}

impl LogEmitter {
    pub(crate) fn new(buffer: Arc<LogBuffer>, dispatch: DispatchHandle) -> LogEmitter {
        LogEmitter { buffer, dispatch }
    }

    pub fn emit(&self, source: LogSource, message: impl Into<String>, error: bool) {
        self.buffer.publish(source, message, error);
        self.dispatch.notify_publish();
    }

    /// One line of script output
    pub fn stdout(&self, message: impl Into<String>) {
        self.emit(LogSource::InterpreterStdout, message, false);
    }

    /// One line of script error output
    pub fn stderr(&self, message: impl Into<String>) {
        self.emit(LogSource::InterpreterStderr, message, true);
    }
}

/// Return value of a successful eval
///
/// `summary` is a short display form of the script's result, when the
/// engine can produce one.
#[derive(Debug, Clone, Default)]
pub struct EvalValue {
    pub summary: Option<String>,
}

impl EvalValue {
    pub fn empty() -> EvalValue {
        EvalValue { summary: None }
    }

    pub fn from_summary(summary: impl Into<String>) -> EvalValue {
        EvalValue {
            summary: Some(summary.into()),
        }
    }
}

/// Errors reported by an engine while evaluating a script
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    /// The script itself raised an error
    #[error("{0}")]
    ScriptRaised(String),

    /// The eval was aborted through the engine's interrupt handle
    #[error("eval interrupted")]
    Interrupted,

    /// The engine could not run the script at all
    #[error(transparent)]
    Engine(#[from] anyhow::Error),
}

/// Handle that can abort an in-flight eval from another thread
pub trait EngineInterrupt: Send + Sync {
    /// Best effort - the interrupted eval is expected to return (typically
    /// with [`EvalError::Interrupted`]) shortly afterwards.
    fn interrupt(&self);
}

/// One native interpreter instance
///
/// An engine is constructed on the session's engine thread and stays
/// there: `eval` and `shutdown` are only ever called from that thread, in
/// order, with `shutdown` called exactly once after the last eval.
pub trait ScriptEngine: Send + 'static {
    /// Run one script to completion, blocking the engine thread.
    fn eval(&mut self, source: &str, logs: &LogEmitter) -> Result<EvalValue, EvalError>;

    /// Handle that can abort an in-flight eval, or `None` when the engine
    /// cannot be interrupted without leaving its internal state in doubt.
    fn interrupter(&self) -> Option<Arc<dyn EngineInterrupt>> {
        None
    }

    /// Release native resources.
    fn shutdown(&mut self) {}
}
