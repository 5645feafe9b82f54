//! Process-backed engine
//!
//! Evaluates each script by launching an external interpreter command on a
//! temporary script file and streaming the child's stdout/stderr into the
//! session's log channel line by line. Interruption kills the child, so
//! timeouts against this engine never degrade the session.

use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, warn};

use super::{EngineInterrupt, EvalError, EvalValue, LogEmitter, ScriptEngine};
use crate::session::SessionPaths;
use ember_logs::LogSource;

const REAP_POLL: Duration = Duration::from_millis(10);

/// Environment variables handed to every child, pointing it at the
/// session's resolved directories
pub const ENV_BASE_DIR: &str = "EMBER_BASE_DIR";
pub const ENV_NATIVE_EXT_DIR: &str = "EMBER_NATIVE_EXT_DIR";

pub struct ProcessEngine {
    command: String,
    args: Vec<String>,
    script_suffix: String,
    paths: SessionPaths,
    current: Arc<Mutex<Option<Child>>>,
    interrupted: Arc<AtomicBool>,
}

impl ProcessEngine {
    /// Fails when `command` is given as a path that does not exist;
    /// bare command names are resolved through PATH at spawn time.
    pub fn new(
        command: impl Into<String>,
        args: Vec<String>,
        script_suffix: impl Into<String>,
        paths: &SessionPaths,
    ) -> anyhow::Result<ProcessEngine> {
        let command = command.into();
        if command.contains(std::path::MAIN_SEPARATOR) && !Path::new(&command).exists() {
            anyhow::bail!("interpreter command not found: {}", command);
        }

        Ok(ProcessEngine {
            command,
            args,
            script_suffix: script_suffix.into(),
            paths: paths.clone(),
            current: Arc::new(Mutex::new(None)),
            interrupted: Arc::new(AtomicBool::new(false)),
        })
    }

    fn spawn_child(&self, script_path: &Path) -> anyhow::Result<Child> {
        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .arg(script_path)
            .current_dir(&self.paths.work_dir)
            .env(ENV_BASE_DIR, &self.paths.base_dir)
            .env(ENV_NATIVE_EXT_DIR, &self.paths.native_ext_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        command
            .spawn()
            .with_context(|| format!("failed to launch interpreter: {}", self.command))
    }

    /// Wait for the child in the shared slot to exit, polling so an
    /// interrupt can grab the slot's lock and kill it in between.
    fn reap(&self) -> anyhow::Result<std::process::ExitStatus> {
        loop {
            {
                let mut slot = self.current.lock().expect("child slot poisoned");
                let child = slot.as_mut().expect("child missing from slot");
                if let Some(status) = child.try_wait().context("failed to wait on interpreter")? {
                    slot.take();
                    return Ok(status);
                }
            }
            thread::sleep(REAP_POLL);
        }
    }
}

struct ProcessInterrupt {
    current: Arc<Mutex<Option<Child>>>,
    interrupted: Arc<AtomicBool>,
}

impl EngineInterrupt for ProcessInterrupt {
    fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        if let Some(child) = self.current.lock().expect("child slot poisoned").as_mut() {
            debug!(target: "engine", pid = child.id(), "killing interpreter process");
            let _ = child.kill();
        }
    }
}

impl ScriptEngine for ProcessEngine {
    fn eval(&mut self, source: &str, logs: &LogEmitter) -> Result<EvalValue, EvalError> {
        self.interrupted.store(false, Ordering::SeqCst);

        let mut script_file = tempfile::Builder::new()
            .prefix("ember-script-")
            .suffix(&self.script_suffix)
            .tempfile()
            .context("failed to create script file")?;
        script_file
            .write_all(source.as_bytes())
            .and_then(|_| script_file.flush())
            .context("failed to write script file")?;

        let mut child = self.spawn_child(script_file.path())?;
        let stdout = child.stdout.take().expect("child stdout was piped");
        let stderr = child.stderr.take().expect("child stderr was piped");
        let out_reader = spawn_line_reader(stdout, LogSource::InterpreterStdout, false, logs.clone());
        let err_reader = spawn_line_reader(stderr, LogSource::InterpreterStderr, true, logs.clone());

        *self.current.lock().expect("child slot poisoned") = Some(child);
        let status = self.reap()?;

        if self.interrupted.load(Ordering::SeqCst) {
            // A grandchild may still hold the output pipes open; the
            // readers are left to run out on their own rather than
            // stalling an abandoned eval until EOF
            return Err(EvalError::Interrupted);
        }

        // Readers hit EOF once the child is gone
        let _ = out_reader.join();
        let _ = err_reader.join();
        if status.success() {
            Ok(EvalValue::empty())
        } else {
            Err(EvalError::ScriptRaised(format!(
                "interpreter exited with {}",
                status
            )))
        }
    }

    fn interrupter(&self) -> Option<Arc<dyn EngineInterrupt>> {
        Some(Arc::new(ProcessInterrupt {
            current: Arc::clone(&self.current),
            interrupted: Arc::clone(&self.interrupted),
        }))
    }

    fn shutdown(&mut self) {
        // No child should be running here, but a degraded-then-closed
        // session must not leave one behind
        if let Some(child) = self.current.lock().expect("child slot poisoned").as_mut() {
            warn!(target: "engine", pid = child.id(), "killing leftover interpreter process at shutdown");
            let _ = child.kill();
        }
    }
}

fn spawn_line_reader(
    stream: impl Read + Send + 'static,
    source: LogSource,
    error: bool,
    logs: LogEmitter,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            match line {
                Ok(line) => logs.emit(source, line, error),
                Err(_) => break,
            }
        }
    })
}
