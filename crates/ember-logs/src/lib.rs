/// Log record types and the ordered log channel for ember
///
/// This crate provides the types that flow between the interpreter session
/// and its consumers, allowing UI and app crates to receive interpreter
/// output without depending on the host runtime.
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;

// ============================================================================
// Record Types
// ============================================================================

/// Where a log record originated inside the interpreter stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSource {
    /// Script output written to the interpreter's stdout
    InterpreterStdout,
    /// Script output written to the interpreter's stderr
    InterpreterStderr,
    /// The VM's own internal logger
    VmInternal,
    /// Native-layer stdout (extensions, loader)
    NativeStdout,
    /// Native-layer stderr
    NativeStderr,
}

impl LogSource {
    /// Short display label, used as a message prefix by console consumers
    pub fn label(&self) -> &'static str {
        match self {
            LogSource::InterpreterStdout => "ruby",
            LogSource::InterpreterStderr => "ruby err",
            LogSource::VmInternal => "vm",
            LogSource::NativeStdout => "native",
            LogSource::NativeStderr => "native err",
        }
    }
}

impl std::fmt::Display for LogSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One emitted line of interpreter output
///
/// Records are immutable once published. `seq` is assigned at publish time
/// and is strictly increasing per session, which defines the total delivery
/// order even when records arrive from multiple producer threads.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub source: LogSource,
    pub message: String,
    pub error: bool,
    pub seq: u64,
    pub emitted_at: DateTime<Utc>,
}

impl LogRecord {
    pub fn is_error(&self) -> bool {
        self.error || matches!(self.source, LogSource::InterpreterStderr | LogSource::NativeStderr)
    }
}

// ============================================================================
// Log Buffer
// ============================================================================

struct BufferInner {
    next_seq: u64,
    records: Vec<LogRecord>,
}

/// Multi-producer, single-consumer log buffer
///
/// `publish` never blocks producers beyond a single O(1) append under the
/// mutex; the sequence counter lives inside the same critical section so
/// sequence order always equals append order. The buffer is unbounded
/// (logs are a diagnostic path, not a control path); the owning session
/// drains and discards whatever is left at close.
pub struct LogBuffer {
    inner: Mutex<BufferInner>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BufferInner {
                next_seq: 0,
                records: Vec::new(),
            }),
        }
    }

    /// Append a record, assigning its sequence number. Returns the sequence.
    pub fn publish(&self, source: LogSource, message: impl Into<String>, error: bool) -> u64 {
        let emitted_at = Utc::now();
        let mut inner = self.inner.lock().expect("log buffer poisoned");
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.records.push(LogRecord {
            source,
            message: message.into(),
            error,
            seq,
            emitted_at,
        });
        seq
    }

    /// Take every record published since the last drain, in sequence order.
    pub fn drain(&self) -> Vec<LogRecord> {
        let mut inner = self.inner.lock().expect("log buffer poisoned");
        std::mem::take(&mut inner.records)
    }

    /// Number of records currently buffered
    pub fn len(&self) -> usize {
        self.inner.lock().expect("log buffer poisoned").records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Log Sink
// ============================================================================

/// Consumer of coalesced record batches - registered once per session
///
/// Batches arrive on the session's dispatcher thread, in sequence order,
/// never concurrently, and never after the session's close has returned.
pub trait LogSink: Send + 'static {
    fn on_batch_ready(&mut self, records: Vec<LogRecord>);
}

/// Sink that discards every batch
pub struct NullSink;

impl LogSink for NullSink {
    fn on_batch_ready(&mut self, _records: Vec<LogRecord>) {}
}

/// Sink that re-emits records through `tracing`
pub struct TracingSink;

impl LogSink for TracingSink {
    fn on_batch_ready(&mut self, records: Vec<LogRecord>) {
        for record in records {
            if record.is_error() {
                tracing::warn!(target: "interp", seq = record.seq, "[{}] {}", record.source, record.message);
            } else {
                tracing::info!(target: "interp", seq = record.seq, "[{}] {}", record.source, record.message);
            }
        }
    }
}

/// Sink that forwards batches into a tokio channel for async consumers
pub struct ChannelSink {
    tx: UnboundedSender<Vec<LogRecord>>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<Vec<LogRecord>>) -> Self {
        Self { tx }
    }
}

impl LogSink for ChannelSink {
    fn on_batch_ready(&mut self, records: Vec<LogRecord>) {
        // Receiver dropped means nobody is listening anymore - not an error
        let _ = self.tx.send(records);
    }
}
