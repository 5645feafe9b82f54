//! Batch execution against one session
//!
//! Scripts run sequentially in submission order - the engine is not
//! reentrant, so concurrent scripts within one session are ruled out by
//! construction, not by configuration. The batch holds a shared timeout
//! budget: each script's effective deadline is the smaller of its own
//! override and whatever budget is left.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::SessionError;
use crate::outcome::{BatchResult, ExecutionOutcome, ScriptOutcome, ScriptResult};
use crate::session::{Session, SessionState};

/// Default collective budget for a batch
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// One script in a batch: ordered, optionally named, optionally carrying
/// its own timeout override. Immutable once added.
#[derive(Debug, Clone)]
pub struct ScriptRequest {
    pub name: Option<String>,
    pub source: String,
    pub timeout: Option<Duration>,
}

impl ScriptRequest {
    pub fn new(source: impl Into<String>) -> ScriptRequest {
        ScriptRequest {
            name: None,
            source: source.into(),
            timeout: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> ScriptRequest {
        self.name = Some(name.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> ScriptRequest {
        self.timeout = Some(timeout);
        self
    }
}

/// Builder for a batch run
pub struct Batch<'a> {
    session: &'a Session,
    requests: Vec<ScriptRequest>,
    overall_timeout: Duration,
}

impl Session {
    /// Start building a batch against this session
    pub fn batch(&self) -> Batch<'_> {
        Batch {
            session: self,
            requests: Vec::new(),
            overall_timeout: DEFAULT_BATCH_TIMEOUT,
        }
    }
}

impl<'a> Batch<'a> {
    pub fn script(mut self, source: impl Into<String>) -> Self {
        self.requests.push(ScriptRequest::new(source));
        self
    }

    pub fn named_script(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.requests.push(ScriptRequest::new(source).named(name));
        self
    }

    pub fn request(mut self, request: ScriptRequest) -> Self {
        self.requests.push(request);
        self
    }

    /// Collective budget shared by every script in the batch
    pub fn overall_timeout(mut self, timeout: Duration) -> Self {
        self.overall_timeout = timeout;
        self
    }

    /// Run the batch.
    ///
    /// Partial-failure semantics: an individual `Failure` or `Timeout`
    /// does not abort the batch. A script the budget can no longer
    /// schedule is recorded as a zero-limit `Timeout` without an engine
    /// call, and once the session degrades every remaining script is
    /// recorded as a degraded skip, also without engine calls. A closed
    /// session fails the whole batch instead.
    pub fn run(self) -> Result<BatchResult, SessionError> {
        if self.session.state() == SessionState::Closed {
            return Err(SessionError::SessionClosed);
        }

        let deadline = Instant::now() + self.overall_timeout;
        let mut results = Vec::with_capacity(self.requests.len());

        for (index, request) in self.requests.into_iter().enumerate() {
            let name = request.name;

            if self.session.state() == SessionState::Degraded {
                results.push(ScriptResult {
                    name,
                    index,
                    outcome: ScriptOutcome::Degraded,
                    duration: Duration::ZERO,
                });
                continue;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                // Budget exhausted before this script could start - never
                // submitted to the engine
                debug!(target: "batch", index, "budget exhausted, skipping script");
                results.push(ScriptResult {
                    name,
                    index,
                    outcome: ScriptOutcome::Executed(ExecutionOutcome::Timeout {
                        limit: Duration::ZERO,
                    }),
                    duration: Duration::ZERO,
                });
                continue;
            }

            let effective = request
                .timeout
                .map_or(remaining, |timeout| timeout.min(remaining));
            let started = Instant::now();
            debug!(target: "batch", index, ?effective, "running script");

            let outcome = match self.session.execute_script(&request.source, effective) {
                Ok(outcome) => ScriptOutcome::Executed(outcome),
                Err(SessionError::SessionDegraded) => ScriptOutcome::Degraded,
                Err(e) => return Err(e),
            };

            results.push(ScriptResult {
                name,
                index,
                outcome,
                duration: started.elapsed(),
            });
        }

        let batch = BatchResult { results };
        let metrics = batch.metrics();
        info!(
            target: "batch",
            total = metrics.total,
            succeeded = metrics.succeeded,
            failed = metrics.failed,
            "batch finished"
        );
        Ok(batch)
    }
}
