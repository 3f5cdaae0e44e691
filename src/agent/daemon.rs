use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::config;
use crate::platform;

/// Name of the agent executable, without platform suffix
pub const AGENT_BINARY: &str = "ark-agent";

/// Starts the agent as a detached background process
pub struct Launcher {
    data_dir: PathBuf,
    config_path: Option<PathBuf>,
}

impl Launcher {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            config_path: None,
        }
    }

    /// Pass `--config <path>` to the agent
    pub fn with_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Where the agent's stdout/stderr end up
    pub fn log_path(&self) -> PathBuf {
        config::log_path(&self.data_dir)
    }

    /// Spawn the agent and return its PID without waiting for it to become ready
    pub fn start(&self, binary: Option<&Path>) -> Result<u32> {
        platform::ensure_private_directory(&self.data_dir)?;

        let binary = match binary {
            Some(path) if path.is_file() => path.to_path_buf(),
            Some(path) => anyhow::bail!("Agent binary not found: {}", path.display()),
            None => find_agent_binary()?,
        };

        let log_path = self.log_path();
        let log_file = open_log(&log_path)?;
        let stderr_file = log_file
            .try_clone()
            .context("Failed to duplicate log file handle")?;

        let mut command = Command::new(&binary);
        command
            .current_dir(&self.data_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(stderr_file));

        if let Some(config_path) = &self.config_path {
            command.arg("--config").arg(config_path);
        }

        platform::process::detach(&mut command);

        let child = command
            .spawn()
            .with_context(|| format!("Failed to start agent process: {}", binary.display()))?;

        tracing::info!(
            "Started {} (PID {}), logging to {}",
            binary.display(),
            child.id(),
            log_path.display()
        );

        Ok(child.id())
    }
}

fn open_log(path: &Path) -> Result<std::fs::File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    options
        .open(path)
        .with_context(|| format!("Failed to open log file: {}", path.display()))
}

/// Platform file name of the agent executable
pub fn agent_file_name() -> String {
    format!("{}{}", AGENT_BINARY, std::env::consts::EXE_SUFFIX)
}

/// Locate the agent on PATH, then next to the current executable
pub fn find_agent_binary() -> Result<PathBuf> {
    let exe_dir = std::env::current_exe()
        .context("Failed to get executable path")?
        .parent()
        .map(Path::to_path_buf);

    let path_var = std::env::var_os("PATH");

    search(path_var.as_deref(), exe_dir.as_deref()).with_context(|| {
        format!(
            "{} binary not found in PATH or {}",
            agent_file_name(),
            exe_dir
                .as_deref()
                .map(|d| d.display().to_string())
                .unwrap_or_else(|| "the executable directory".to_string())
        )
    })
}

fn search(path_var: Option<&OsStr>, exe_dir: Option<&Path>) -> Option<PathBuf> {
    let file_name = agent_file_name();

    let on_path = path_var
        .into_iter()
        .flat_map(std::env::split_paths)
        .map(|dir| dir.join(&file_name))
        .find(|candidate| candidate.is_file());

    on_path.or_else(|| {
        exe_dir
            .map(|dir| dir.join(&file_name))
            .filter(|candidate| candidate.is_file())
    })
}
