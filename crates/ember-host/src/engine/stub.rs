//! Deterministic engine for tests and dry runs
//!
//! The stub interprets a tiny directive language instead of a real
//! scripting language, which is enough to exercise every session path:
//!
//! ```text
//! ok [value]      succeed, optionally with a return-value summary
//! echo <text>     emit <text> as interpreter stdout, then succeed
//! fail [message]  raise a script error
//! sleep <ms>      busy-wait for <ms>, then succeed
//! hang            never return (until interrupted, when supported)
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::{EngineInterrupt, EvalError, EvalValue, LogEmitter, ScriptEngine};

const POLL: Duration = Duration::from_millis(2);

/// Shared counters for asserting on engine activity from tests
#[derive(Debug, Clone, Default)]
pub struct StubCounters {
    evals: Arc<AtomicUsize>,
    shutdowns: Arc<AtomicUsize>,
}

impl StubCounters {
    pub fn evals(&self) -> usize {
        self.evals.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

/// Scripted in-process engine
pub struct StubEngine {
    interruptible: bool,
    interrupt_flag: Arc<AtomicBool>,
    counters: StubCounters,
}

impl StubEngine {
    pub fn new(interruptible: bool) -> StubEngine {
        StubEngine::with_counters(interruptible, StubCounters::default())
    }

    pub fn with_counters(interruptible: bool, counters: StubCounters) -> StubEngine {
        StubEngine {
            interruptible,
            interrupt_flag: Arc::new(AtomicBool::new(false)),
            counters,
        }
    }

    fn interrupted(&self) -> bool {
        self.interruptible && self.interrupt_flag.load(Ordering::SeqCst)
    }
}

struct StubInterrupt {
    flag: Arc<AtomicBool>,
}

impl EngineInterrupt for StubInterrupt {
    fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

impl ScriptEngine for StubEngine {
    fn eval(&mut self, source: &str, logs: &LogEmitter) -> Result<EvalValue, EvalError> {
        self.counters.evals.fetch_add(1, Ordering::SeqCst);
        self.interrupt_flag.store(false, Ordering::SeqCst);

        let line = source.trim();
        let (directive, rest) = match line.split_once(char::is_whitespace) {
            Some((directive, rest)) => (directive, rest.trim()),
            None => (line, ""),
        };

        match directive {
            "ok" => Ok(if rest.is_empty() {
                EvalValue::empty()
            } else {
                EvalValue::from_summary(rest)
            }),
            "echo" => {
                logs.stdout(rest);
                Ok(EvalValue::empty())
            }
            "fail" => {
                let message = if rest.is_empty() {
                    "script failed".to_string()
                } else {
                    rest.to_string()
                };
                logs.stderr(&message);
                Err(EvalError::ScriptRaised(message))
            }
            "sleep" => {
                let ms: u64 = rest
                    .parse()
                    .map_err(|_| EvalError::ScriptRaised(format!("bad sleep duration: {}", rest)))?;
                let deadline = Instant::now() + Duration::from_millis(ms);
                while Instant::now() < deadline {
                    if self.interrupted() {
                        return Err(EvalError::Interrupted);
                    }
                    thread::sleep(POLL);
                }
                Ok(EvalValue::empty())
            }
            "hang" => loop {
                if self.interrupted() {
                    return Err(EvalError::Interrupted);
                }
                thread::sleep(POLL);
            },
            other => Err(EvalError::ScriptRaised(format!(
                "unknown directive: {}",
                other
            ))),
        }
    }

    fn interrupter(&self) -> Option<Arc<dyn EngineInterrupt>> {
        if self.interruptible {
            Some(Arc::new(StubInterrupt {
                flag: Arc::clone(&self.interrupt_flag),
            }))
        } else {
            None
        }
    }

    fn shutdown(&mut self) {
        self.counters.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::CoalescingDispatcher;
    use ember_logs::{LogBuffer, NullSink};

    fn test_emitter() -> (LogEmitter, Arc<LogBuffer>, CoalescingDispatcher) {
        let buffer = Arc::new(LogBuffer::new());
        let dispatcher = CoalescingDispatcher::spawn(
            Arc::clone(&buffer),
            Box::new(NullSink),
            Duration::from_secs(3600),
        );
        let emitter = LogEmitter::new(Arc::clone(&buffer), dispatcher.handle());
        (emitter, buffer, dispatcher)
    }

    #[test]
    fn test_ok_directive() {
        let (emitter, _buffer, _dispatcher) = test_emitter();
        let mut engine = StubEngine::new(true);

        let value = engine.eval("ok 42", &emitter).unwrap();
        assert_eq!(value.summary.as_deref(), Some("42"));
        assert!(engine.eval("ok", &emitter).unwrap().summary.is_none());
    }

    #[test]
    fn test_fail_directive_emits_stderr() {
        let (emitter, buffer, _dispatcher) = test_emitter();
        let mut engine = StubEngine::new(true);

        let err = engine.eval("fail out of cheese", &emitter).unwrap_err();
        assert!(matches!(err, EvalError::ScriptRaised(_)));

        let records = buffer.drain();
        assert_eq!(records.len(), 1);
        assert!(records[0].is_error());
    }

    #[test]
    fn test_interrupt_aborts_sleep() {
        let (emitter, _buffer, _dispatcher) = test_emitter();
        let mut engine = StubEngine::new(true);
        let interrupter = engine.interrupter().unwrap();

        let aborter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            interrupter.interrupt();
        });

        let started = Instant::now();
        let err = engine.eval("sleep 5000", &emitter).unwrap_err();
        assert!(matches!(err, EvalError::Interrupted));
        assert!(started.elapsed() < Duration::from_secs(2));
        aborter.join().unwrap();
    }

    #[test]
    fn test_non_interruptible_engine_has_no_interrupter() {
        let engine = StubEngine::new(false);
        assert!(engine.interrupter().is_none());
    }

    #[test]
    fn test_counters_track_activity() {
        let (emitter, _buffer, _dispatcher) = test_emitter();
        let counters = StubCounters::default();
        let mut engine = StubEngine::with_counters(true, counters.clone());

        engine.eval("ok", &emitter).unwrap();
        engine.eval("ok", &emitter).unwrap();
        engine.shutdown();

        assert_eq!(counters.evals(), 2);
        assert_eq!(counters.shutdowns(), 1);
    }
}
