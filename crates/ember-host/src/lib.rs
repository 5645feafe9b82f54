//! Interpreter session manager
//!
//! This crate owns the lifecycle of a single embedded script-interpreter
//! instance: it mediates script submissions to the engine, bounds them
//! with timeouts, and delivers the engine's asynchronous output back to
//! one consumer in coalesced, ordered batches. The interpreter machinery
//! itself stays behind the [`ScriptEngine`] trait; a process-backed engine
//! and a deterministic stub ship with the crate.

pub mod batch;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod outcome;
pub mod session;

pub use batch::{Batch, ScriptRequest, DEFAULT_BATCH_TIMEOUT};
pub use config::{ConfigError, EmberConfig, EngineSpec};
pub use dispatch::{CoalescingDispatcher, DispatchHandle, DEFAULT_MIN_NOTIFY_INTERVAL};
pub use engine::process::ProcessEngine;
pub use engine::stub::{StubCounters, StubEngine};
pub use engine::{EngineInterrupt, EvalError, EvalValue, LogEmitter, ScriptEngine};
pub use error::SessionError;
pub use outcome::{BatchMetrics, BatchResult, ExecutionOutcome, ScriptOutcome, ScriptResult};
pub use session::{Session, SessionOptions, SessionPaths, SessionState};

// Re-export the record types consumers handle in their sinks
pub use ember_logs::{ChannelSink, LogBuffer, LogRecord, LogSink, LogSource, NullSink, TracingSink};
