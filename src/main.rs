mod artifact;
mod config;
mod events;
mod report;
mod session;
mod supervisor;

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

use crate::config::{CliOverrides, RelaunchConfig};
use crate::report::TracingReporter;
use crate::session::WatchSession;

/// Run the output of a watching build and restart it after every successful
/// rebuild. Build events are read as JSON lines from stdin (or --events).
#[derive(Parser, Debug)]
#[command(name = "relaunch", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "relaunch.toml")]
    config: PathBuf,

    /// Artifact to run: emitted name, name fragment, or file path (overrides config)
    #[arg(short, long)]
    script: Option<String>,

    /// Interpreter to run the artifact with, e.g. "node" (overrides config)
    #[arg(short, long)]
    runner: Option<String>,

    /// Seconds to wait after SIGTERM before SIGKILL, 0 to never escalate (overrides config)
    #[arg(long, value_name = "SECS")]
    stop_timeout: Option<u64>,

    /// Read build events from this file instead of stdin
    #[arg(short, long)]
    events: Option<PathBuf>,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (resolution and supervisor decisions)
    #[arg(short, long)]
    verbose: bool,

    /// Arguments passed to the process (overrides config)
    #[arg(last = true)]
    args: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let mut config = match RelaunchConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    config.apply(CliOverrides {
        script: cli.script,
        runner: cli.runner,
        stop_timeout_secs: cli.stop_timeout,
        args: cli.args,
    });

    if cli.dry_run {
        println!("{config:#?}");
        return ExitCode::SUCCESS;
    }

    let mut session = WatchSession::new(
        config.target_spec(),
        config.launch_spec(),
        Arc::new(TracingReporter),
    );

    let result = match &cli.events {
        Some(path) => match tokio::fs::File::open(path).await {
            Ok(file) => events::run_feed(BufReader::new(file), &mut session).await,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "failed to open event file");
                return ExitCode::FAILURE;
            }
        },
        None => events::run_feed(BufReader::new(tokio::io::stdin()), &mut session).await,
    };

    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
