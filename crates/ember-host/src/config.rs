//! Host configuration
//!
//! Everything the original environment injected through globals or
//! process state - which engine to construct, where its directories live,
//! how patient to be - is explicit configuration consumed at session
//! construction, so there is no ordering hazard between configuring the
//! runtime and first use.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::process::ProcessEngine;
use crate::engine::stub::StubEngine;
use crate::engine::ScriptEngine;
use crate::session::{SessionOptions, SessionPaths};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found at {0}")]
    NotFound(PathBuf),
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmberConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    /// Which engine to construct for new sessions
    #[serde(default)]
    pub engine: EngineSpec,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub logs: LogConfig,
}

/// Session directories; unset entries fall back to platform defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
    #[serde(default)]
    pub native_ext_dir: Option<PathBuf>,
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

impl PathsConfig {
    /// Resolve to concrete directories (platform data dir for the
    /// interpreter base and extensions, current directory for work)
    pub fn resolve(&self) -> SessionPaths {
        let data_dir = project_data_dir();
        SessionPaths {
            base_dir: self
                .base_dir
                .clone()
                .unwrap_or_else(|| data_dir.join("runtime")),
            native_ext_dir: self
                .native_ext_dir
                .clone()
                .unwrap_or_else(|| data_dir.join("ext")),
            work_dir: self.work_dir.clone().unwrap_or_else(|| PathBuf::from(".")),
        }
    }
}

/// Engine selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineSpec {
    /// Launch an external interpreter command per script
    Process {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default = "default_script_suffix")]
        script_suffix: String,
    },
    /// Deterministic in-process engine for tests and dry runs
    Stub {
        #[serde(default = "default_true")]
        interruptible: bool,
    },
}

impl Default for EngineSpec {
    fn default() -> Self {
        EngineSpec::Process {
            command: "ruby".to_string(),
            args: Vec::new(),
            script_suffix: default_script_suffix(),
        }
    }
}

impl EngineSpec {
    /// Factory closure for [`crate::session::Session::create`]
    pub fn factory(
        &self,
    ) -> impl FnOnce(&SessionPaths) -> anyhow::Result<Box<dyn ScriptEngine>> + Send + 'static {
        let spec = self.clone();
        move |paths| match spec {
            EngineSpec::Process {
                command,
                args,
                script_suffix,
            } => {
                let engine = ProcessEngine::new(command, args, script_suffix, paths)?;
                Ok(Box::new(engine) as Box<dyn ScriptEngine>)
            }
            EngineSpec::Stub { interruptible } => {
                Ok(Box::new(StubEngine::new(interruptible)) as Box<dyn ScriptEngine>)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Default per-script timeout in seconds
    #[serde(default = "default_script_secs")]
    pub script_secs: u64,

    /// Default collective batch budget in seconds
    #[serde(default = "default_batch_secs")]
    pub batch_secs: u64,

    /// How long an interrupted eval gets to unwind, in milliseconds
    #[serde(default = "default_interrupt_grace_ms")]
    pub interrupt_grace_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            script_secs: default_script_secs(),
            batch_secs: default_batch_secs(),
            interrupt_grace_ms: default_interrupt_grace_ms(),
        }
    }
}

impl TimeoutConfig {
    pub fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.script_secs)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_secs)
    }

    pub fn interrupt_grace(&self) -> Duration {
        Duration::from_millis(self.interrupt_grace_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Minimum interval between sink notifications, in milliseconds
    #[serde(default = "default_min_notify_interval_ms")]
    pub min_notify_interval_ms: u64,

    /// Whether the CLI also logs to a file
    #[serde(default)]
    pub file_logging: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            min_notify_interval_ms: default_min_notify_interval_ms(),
            file_logging: false,
        }
    }
}

fn default_script_suffix() -> String {
    ".rb".to_string()
}

fn default_true() -> bool {
    true
}

fn default_script_secs() -> u64 {
    10
}

fn default_batch_secs() -> u64 {
    30
}

fn default_interrupt_grace_ms() -> u64 {
    1000
}

fn default_min_notify_interval_ms() -> u64 {
    16
}

impl EmberConfig {
    /// Default config file location
    pub fn config_path() -> PathBuf {
        directories::ProjectDirs::from("", "", "ember")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from(".ember/config.toml"))
    }

    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Session tunables derived from this config
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            min_notify_interval: Duration::from_millis(self.logs.min_notify_interval_ms),
            interrupt_grace: self.timeouts.interrupt_grace(),
        }
    }
}

/// Platform data directory for ember
pub fn project_data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "ember")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".ember"))
}
