use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use ark::agent::{self, LockError};
use ark::config::{self, AgentConfig};
use ark::settings::Settings;

/// Ark agent
///
/// Holds cloud credentials for the `ark` CLI and mediates gated operations
/// through the training policy service. Normally started by `ark agent start`.
#[derive(Parser, Debug)]
#[command(name = "ark-agent")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (defaults to $ARK_CONFIG or ~/.ark/config.yml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();
    ark::logging::init_logging(args.verbose, false);

    if let Err(e) = run(args) {
        match e.downcast_ref::<LockError>() {
            Some(LockError::AlreadyRunning { pid }) => {
                tracing::error!("Agent already running with PID {}", pid);
                eprintln!("Error: agent already running (PID {})", pid);
                eprintln!("{}", agent::STATUS_HINT);
            }
            _ => {
                tracing::error!("Agent failed: {:#}", e);
                eprintln!("Error: {:#}", e);
            }
        }
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let config_path = match args.config {
        Some(path) => path,
        None => config::get_config_path()?,
    };

    let config = AgentConfig::load(&config_path)?;
    let settings = Settings::from_env(&config)?;

    tracing::info!(
        "Starting ark-agent {} (commit {}, built {})",
        settings.build.version,
        settings.build.commit,
        settings.build.build_date
    );
    tracing::info!("Config: {}", config_path.display());
    tracing::info!("Data directory: {}", settings.data_dir.display());

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(agent::run(settings))
}
