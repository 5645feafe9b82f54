//! Value types produced by script execution
//!
//! Outcomes are created exactly once per script by the single-script or
//! batch execution path and never mutated afterwards. Batch metrics are a
//! pure fold over the outcome list, computed on demand so they cannot
//! drift out of sync with the results they summarize.

use std::fmt;
use std::time::Duration;

/// Result of running one script against the interpreter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The script ran to completion; `value` is a short display form of its
    /// return value when the engine can produce one
    Success { value: Option<String> },
    /// The engine reported a runtime error
    Failure { message: String },
    /// The configured limit elapsed before the engine replied. A zero limit
    /// marks a script the batch budget could no longer schedule - it was
    /// never submitted to the engine.
    Timeout { limit: Duration },
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success { .. })
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionOutcome::Success { value: Some(value) } => write!(f, "ok ({})", value),
            ExecutionOutcome::Success { value: None } => write!(f, "ok"),
            ExecutionOutcome::Failure { message } => write!(f, "failed: {}", message),
            ExecutionOutcome::Timeout { limit } if limit.is_zero() => {
                write!(f, "skipped: batch budget exhausted")
            }
            ExecutionOutcome::Timeout { limit } => write!(f, "timed out after {:?}", limit),
        }
    }
}

/// Per-script entry in a batch result
///
/// A degraded skip is kept distinct from an ordinary script failure: it
/// means the session refused to touch the engine, not that the script ran
/// and failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOutcome {
    Executed(ExecutionOutcome),
    /// The session degraded before this script could run; no native call
    /// was made
    Degraded,
}

impl ScriptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ScriptOutcome::Executed(outcome) if outcome.is_success())
    }
}

impl fmt::Display for ScriptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptOutcome::Executed(outcome) => outcome.fmt(f),
            ScriptOutcome::Degraded => write!(f, "skipped: session degraded"),
        }
    }
}

/// Outcome of one request in a batch, in submission order
#[derive(Debug, Clone)]
pub struct ScriptResult {
    pub name: Option<String>,
    pub index: usize,
    pub outcome: ScriptOutcome,
    pub duration: Duration,
}

impl ScriptResult {
    /// Name given at submission, or a positional fallback
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("script_{}", self.index + 1))
    }
}

/// Ordered results of a batch run
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub results: Vec<ScriptResult>,
}

impl BatchResult {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Aggregate counts, folded from the outcome list
    pub fn metrics(&self) -> BatchMetrics {
        let succeeded = self
            .results
            .iter()
            .filter(|result| result.outcome.is_success())
            .count();
        BatchMetrics {
            total: self.results.len(),
            succeeded,
            failed: self.results.len() - succeeded,
        }
    }
}

/// Aggregate batch counts; timeouts and degraded skips count as failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchMetrics {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}
