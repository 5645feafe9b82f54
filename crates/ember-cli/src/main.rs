use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use ember_host::{ConfigError, EmberConfig, Session, SessionPaths};

mod console;
mod logging;

use console::ConsoleSink;

#[derive(Parser)]
#[command(name = "ember", version, about = "Run scripts against an embedded interpreter session")]
struct Cli {
    /// Script files to run, in order, against one session
    #[arg(required = true)]
    scripts: Vec<PathBuf>,

    /// Use an alternate config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Per-script timeout in seconds (overrides config)
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Collective batch budget in seconds (overrides config)
    #[arg(long)]
    batch_timeout: Option<u64>,
}

fn create_example_config(path: &PathBuf) -> anyhow::Result<()> {
    let example = r#"# ember configuration
# Edit this file to point at your interpreter installation

[paths]
# base_dir = "/opt/interpreter/lib"
# native_ext_dir = "/opt/interpreter/ext"
# work_dir = "."

[engine]
kind = "process"
command = "ruby"

[timeouts]
script_secs = 10
batch_secs = 30

[logs]
min_notify_interval_ms = 16
"#;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, example)?;
    eprintln!("Config file created at: {}", path.display());
    eprintln!("Edit it to point at your interpreter, then run ember again.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(EmberConfig::config_path);
    let config = match EmberConfig::load_from(&config_path) {
        Ok(config) => config,
        Err(ConfigError::NotFound(path)) => {
            create_example_config(&path)?;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let _guard = logging::init(config.logs.file_logging)?;
    info!("Starting ember session runner");

    // Read everything up front so a bad path fails before a session exists
    let mut scripts = Vec::with_capacity(cli.scripts.len());
    for path in &cli.scripts {
        let source = fs::read_to_string(path)
            .with_context(|| format!("failed to read script {}", path.display()))?;
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        scripts.push((name, source));
    }

    let script_timeout = cli
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.timeouts.script_timeout());
    let batch_timeout = cli
        .batch_timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.timeouts.batch_timeout());

    // The session API blocks, so it runs on a worker thread while this
    // task stays free to watch for Ctrl-C
    let worker =
        tokio::task::spawn_blocking(move || run_session(config, scripts, script_timeout, batch_timeout));

    tokio::select! {
        result = worker => result.context("session worker panicked")?,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, exiting");
            std::process::exit(130);
        }
    }
}

fn provision(paths: &SessionPaths) -> anyhow::Result<()> {
    for dir in [&paths.base_dir, &paths.native_ext_dir, &paths.work_dir] {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create directory {}", dir.display()))?;
    }
    Ok(())
}

fn run_session(
    config: EmberConfig,
    scripts: Vec<(String, String)>,
    script_timeout: Duration,
    batch_timeout: Duration,
) -> anyhow::Result<()> {
    let paths = config.paths.resolve();
    provision(&paths)?;

    let mut session = Session::create(
        paths,
        config.engine.factory(),
        ConsoleSink,
        config.session_options(),
    )
    .context("failed to create interpreter session")?;

    if scripts.len() == 1 {
        let (name, source) = scripts.into_iter().next().expect("checked length");
        let outcome = session.execute_script(&source, script_timeout)?;
        // Close first so every pending log record is printed above the
        // result
        session.close();
        println!();
        console::print_outcome(&name, &outcome);
    } else {
        let mut batch = session.batch().overall_timeout(batch_timeout);
        for (name, source) in scripts {
            batch = batch.request(
                ember_host::ScriptRequest::new(source)
                    .named(name)
                    .with_timeout(script_timeout),
            );
        }
        let result = batch.run()?;
        session.close();
        println!();
        console::print_batch(&result);
    }

    Ok(())
}
