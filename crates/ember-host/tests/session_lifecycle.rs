// Integration tests for session lifecycle: creation, execution, timeout
// degradation, and teardown

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ember_host::{
    ExecutionOutcome, LogRecord, LogSink, Session, SessionError, SessionOptions, SessionPaths,
    SessionState, StubCounters, StubEngine,
};

#[derive(Clone, Default)]
struct CollectingSink(Arc<Mutex<Vec<LogRecord>>>);

impl LogSink for CollectingSink {
    fn on_batch_ready(&mut self, records: Vec<LogRecord>) {
        self.0.lock().unwrap().extend(records);
    }
}

impl CollectingSink {
    fn records(&self) -> Vec<LogRecord> {
        self.0.lock().unwrap().clone()
    }

    fn wait_for(&self, count: usize, deadline: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if self.0.lock().unwrap().len() >= count {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }
}

fn stub_session(
    interruptible: bool,
    options: SessionOptions,
) -> (Session, StubCounters, CollectingSink, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let paths = SessionPaths::new(dir.path(), dir.path(), dir.path());
    let counters = StubCounters::default();
    let sink = CollectingSink::default();

    let factory_counters = counters.clone();
    let session = Session::create(
        paths,
        move |_paths| {
            Ok(Box::new(StubEngine::with_counters(
                interruptible,
                factory_counters,
            )) as Box<dyn ember_host::ScriptEngine>)
        },
        sink.clone(),
        options,
    )
    .expect("session should start");

    (session, counters, sink, dir)
}

fn fast_options() -> SessionOptions {
    SessionOptions {
        min_notify_interval: Duration::from_millis(5),
        interrupt_grace: Duration::from_millis(500),
    }
}

#[test]
fn test_create_rejects_missing_directory() {
    let dir = tempfile::tempdir().unwrap();
    let paths = SessionPaths::new(dir.path().join("missing"), dir.path(), dir.path());

    let result = Session::create(
        paths,
        |_paths| Ok(Box::new(StubEngine::new(true)) as Box<dyn ember_host::ScriptEngine>),
        CollectingSink::default(),
        SessionOptions::default(),
    );

    assert!(matches!(result, Err(SessionError::InvalidPath { .. })));
}

#[test]
fn test_create_surfaces_engine_init_failure() {
    let dir = tempfile::tempdir().unwrap();
    let paths = SessionPaths::new(dir.path(), dir.path(), dir.path());

    let result = Session::create(
        paths,
        |_paths| anyhow::bail!("no interpreter available"),
        CollectingSink::default(),
        SessionOptions::default(),
    );

    assert!(matches!(result, Err(SessionError::NativeInitFailure(_))));
}

#[test]
fn test_execute_success_and_failure_outcomes() {
    let (session, _counters, _sink, _dir) = stub_session(true, fast_options());

    let outcome = session
        .execute_script("ok 123", Duration::from_secs(5))
        .unwrap();
    assert_eq!(
        outcome,
        ExecutionOutcome::Success {
            value: Some("123".to_string())
        }
    );

    let outcome = session
        .execute_script("fail out of cheese", Duration::from_secs(5))
        .unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Failure { message } if message.contains("cheese")));
}

#[test]
fn test_script_output_reaches_sink_in_order() {
    let (session, _counters, sink, _dir) = stub_session(true, fast_options());

    for i in 0..5 {
        session
            .execute_script(&format!("echo line {}", i), Duration::from_secs(5))
            .unwrap();
    }

    assert!(sink.wait_for(5, Duration::from_secs(2)));
    let records = sink.records();
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.seq, i as u64);
        assert_eq!(record.message, format!("line {}", i));
    }
}

#[test]
fn test_close_is_idempotent() {
    let (mut session, counters, _sink, _dir) = stub_session(true, fast_options());

    session.close();
    session.close();

    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(counters.shutdowns(), 1, "only the first close tears down");
}

#[test]
fn test_drop_closes_session() {
    let counters;
    {
        let (session, session_counters, _sink, _dir) = stub_session(true, fast_options());
        counters = session_counters;
        drop(session);
    }
    assert_eq!(counters.shutdowns(), 1);
}

#[test]
fn test_closed_session_rejects_without_engine_call() {
    let (mut session, counters, _sink, _dir) = stub_session(true, fast_options());
    session.close();

    let result = session.execute_script("ok", Duration::from_secs(1));
    assert!(matches!(result, Err(SessionError::SessionClosed)));
    assert_eq!(counters.evals(), 0, "closed session must not touch the engine");
}

#[test]
fn test_close_delivers_buffered_records_before_returning() {
    // A huge notify interval keeps everything buffered until close
    let options = SessionOptions {
        min_notify_interval: Duration::from_secs(3600),
        interrupt_grace: Duration::from_millis(500),
    };
    let (mut session, _counters, sink, _dir) = stub_session(true, options);

    session
        .execute_script("echo held back", Duration::from_secs(5))
        .unwrap();
    assert!(sink.records().is_empty(), "nothing should be delivered yet");

    session.close();
    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].message, "held back");
}

#[test]
fn test_timeout_with_interruptible_engine_keeps_session_running() {
    let (session, counters, _sink, _dir) = stub_session(true, fast_options());

    let outcome = session
        .execute_script("sleep 5000", Duration::from_millis(50))
        .unwrap();
    assert_eq!(
        outcome,
        ExecutionOutcome::Timeout {
            limit: Duration::from_millis(50)
        }
    );
    assert_eq!(session.state(), SessionState::Running);

    // The session is still usable afterwards
    let outcome = session.execute_script("ok", Duration::from_secs(5)).unwrap();
    assert!(outcome.is_success());
    assert_eq!(counters.evals(), 2);
}

#[test]
fn test_uninterruptible_timeout_degrades_session() {
    let (mut session, counters, _sink, _dir) = stub_session(false, fast_options());

    let outcome = session
        .execute_script("hang", Duration::from_millis(50))
        .unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Timeout { .. }));
    assert_eq!(session.state(), SessionState::Degraded);

    // Every subsequent call is refused without touching the engine
    for _ in 0..3 {
        let result = session.execute_script("ok", Duration::from_secs(1));
        assert!(matches!(result, Err(SessionError::SessionDegraded)));
    }
    assert_eq!(counters.evals(), 1, "no engine call after degradation");

    // Close still works; the stuck engine thread is detached, not joined
    let started = Instant::now();
    session.close();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(session.state(), SessionState::Closed);
}
