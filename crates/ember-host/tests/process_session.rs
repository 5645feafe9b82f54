// End-to-end tests driving a session with the process-backed engine
// through the config-provided factory

#![cfg(unix)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ember_host::{
    EngineSpec, ExecutionOutcome, LogRecord, LogSink, LogSource, Session, SessionOptions,
    SessionPaths, SessionState,
};

#[derive(Clone, Default)]
struct CollectingSink(Arc<Mutex<Vec<LogRecord>>>);

impl LogSink for CollectingSink {
    fn on_batch_ready(&mut self, records: Vec<LogRecord>) {
        self.0.lock().unwrap().extend(records);
    }
}

impl CollectingSink {
    fn wait_for(&self, count: usize, deadline: Duration) -> Vec<LogRecord> {
        let start = Instant::now();
        while start.elapsed() < deadline {
            let held = self.0.lock().unwrap();
            if held.len() >= count {
                return held.clone();
            }
            drop(held);
            std::thread::sleep(Duration::from_millis(5));
        }
        self.0.lock().unwrap().clone()
    }
}

fn sh_session() -> (Session, CollectingSink, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let paths = SessionPaths::new(dir.path(), dir.path(), dir.path());
    let sink = CollectingSink::default();

    let spec = EngineSpec::Process {
        command: "sh".to_string(),
        args: Vec::new(),
        script_suffix: ".sh".to_string(),
    };
    let session = Session::create(
        paths,
        spec.factory(),
        sink.clone(),
        SessionOptions {
            min_notify_interval: Duration::from_millis(5),
            interrupt_grace: Duration::from_secs(2),
        },
    )
    .expect("sh session should start");

    (session, sink, dir)
}

#[test]
fn test_shell_output_is_captured_and_ordered() {
    let (session, sink, _dir) = sh_session();

    let outcome = session
        .execute_script("echo one\necho two\n", Duration::from_secs(10))
        .unwrap();
    assert!(outcome.is_success());

    let records = sink.wait_for(2, Duration::from_secs(5));
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].message, "one");
    assert_eq!(records[1].message, "two");
    assert!(records.iter().all(|r| r.source == LogSource::InterpreterStdout));
    assert!(records[0].seq < records[1].seq);
}

#[test]
fn test_nonzero_exit_surfaces_as_failure() {
    let (session, _sink, _dir) = sh_session();

    let outcome = session
        .execute_script("echo pre-crash\nexit 7\n", Duration::from_secs(10))
        .unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Failure { .. }));
}

#[test]
fn test_timeout_kills_child_and_session_survives() {
    let (session, _sink, _dir) = sh_session();

    let started = Instant::now();
    let outcome = session
        .execute_script("sleep 30\n", Duration::from_millis(200))
        .unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Timeout { .. }));
    assert!(
        started.elapsed() < Duration::from_secs(10),
        "timeout must not wait for the child's natural exit"
    );

    // The child was killed; the session keeps working
    assert_eq!(session.state(), SessionState::Running);
    let outcome = session
        .execute_script("echo alive\n", Duration::from_secs(10))
        .unwrap();
    assert!(outcome.is_success());
}

#[test]
fn test_batch_against_shell_engine() {
    let (session, _sink, _dir) = sh_session();

    let batch = session
        .batch()
        .named_script("greet", "echo hello\n")
        .named_script("broken", "exit 1\n")
        .overall_timeout(Duration::from_secs(20))
        .run()
        .unwrap();

    let metrics = batch.metrics();
    assert_eq!(metrics.total, 2);
    assert_eq!(metrics.succeeded, 1);
    assert_eq!(metrics.failed, 1);
}
