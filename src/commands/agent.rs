use anyhow::{Context, Result};

use ark::agent::{self, Launcher, LockError, lockfile};
use ark::config;
use ark::platform::{self, SystemLiveness};
use ark::settings::Settings;

use super::Session;
use super::utils::{WAIT_TIMEOUT, block_on, progress};

/// Start the agent in the background and wait until it answers
pub fn start(session: &Session, binary: Option<std::path::PathBuf>) -> Result<()> {
    let client = session.client()?;
    let data_dir = config::get_data_dir()?;

    block_on(async {
        if client.health().await.is_ok() {
            println!("✓ Agent is already running");
            return Ok(());
        }

        println!("Starting Ark agent...");

        let mut launcher = Launcher::new(&data_dir);
        if session.explicit_config {
            launcher = launcher.with_config(&session.config_path);
        }

        let pid = launcher
            .start(binary.as_deref())
            .context("Failed to start agent")?;

        progress("Waiting for agent to start");
        if !client.wait_for(true, WAIT_TIMEOUT).await {
            println!(" ✗");
            anyhow::bail!(
                "Agent (PID {}) did not answer at {} within {}s. Check {}",
                pid,
                client.base_url(),
                WAIT_TIMEOUT.as_secs(),
                launcher.log_path().display()
            );
        }

        println!(" ✓");
        println!("Agent started successfully (PID {})", pid);
        println!("Logs: {}", launcher.log_path().display());
        Ok::<(), anyhow::Error>(())
    })?
}

/// Ask the agent holding the lock to shut down
pub fn stop(session: &Session) -> Result<()> {
    let client = session.client()?;
    let lock_path = config::lock_path(&config::get_data_dir()?);

    block_on(async {
        let Some(pid) = lockfile::holder(&lock_path, &SystemLiveness) else {
            if client.health().await.is_ok() {
                println!("Agent is running but lock file not found");
                println!("Try manually stopping the agent process");
            } else {
                println!("Agent is not running");
            }
            return Ok(());
        };

        println!("Stopping agent (PID {})...", pid);
        platform::process::terminate(pid)?;

        progress("Waiting for agent to stop");
        if !client.wait_for(false, WAIT_TIMEOUT).await {
            println!(" ✗");
            anyhow::bail!("Agent did not stop gracefully, may need to be killed manually");
        }

        println!(" ✓");
        println!("Agent stopped successfully");
        Ok::<(), anyhow::Error>(())
    })?
}

/// Report whether the agent answers its health check
pub fn status(session: &Session) -> Result<()> {
    let client = session.client()?;
    let lock_path = config::lock_path(&config::get_data_dir()?);

    let health = block_on(client.health())?;

    match health {
        Ok(body) => {
            println!("✓ Agent is running");
            if let Some(version) = body.get("version").and_then(|v| v.as_str()) {
                println!("  Version: {}", version);
            }
            println!("  URL:     {}", client.base_url());
            if let Some(pid) = lockfile::holder(&lock_path, &SystemLiveness) {
                println!("  PID:     {}", pid);
            }
        }
        Err(e) => {
            tracing::debug!("Health check failed: {:#}", e);
            println!("✗ Agent is not running");
            println!();
            println!("Start the agent with: ark agent start");
        }
    }

    Ok(())
}

/// Run the agent in this process until interrupted
pub fn run(session: &Session) -> Result<()> {
    let settings = Settings::from_env(&session.config)?;

    tracing::info!("Config: {}", session.config_path.display());
    tracing::info!("Data directory: {}", settings.data_dir.display());

    block_on(agent::run(settings))?.map_err(|e| match e.downcast_ref::<LockError>() {
        Some(LockError::AlreadyRunning { pid }) => {
            anyhow::anyhow!("Agent already running (PID {}). {}", pid, agent::STATUS_HINT)
        }
        _ => e,
    })
}
