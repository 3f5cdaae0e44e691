pub mod agent;
pub mod completion;
pub mod config;
pub mod credentials;
pub mod s3;
pub mod utils;
pub mod version;

use anyhow::Result;
use std::path::PathBuf;

use ark::config::{self as ark_config, AgentConfig};

use utils::AgentClient;

/// `--config` if given, otherwise `$ARK_CONFIG` or the default location
pub fn resolve_config_path(config_path: Option<PathBuf>) -> Result<PathBuf> {
    match config_path {
        Some(path) => Ok(path),
        None => ark_config::get_config_path(),
    }
}

/// Configuration resolved once per CLI invocation
pub struct Session {
    pub config_path: PathBuf,
    pub config: AgentConfig,
    /// Set when `--config` was given, so a started agent uses the same file
    pub explicit_config: bool,
}

impl Session {
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let explicit_config = config_path.is_some();
        let config_path = resolve_config_path(config_path)?;

        let config = AgentConfig::load(&config_path)?;

        Ok(Self {
            config_path,
            config,
            explicit_config,
        })
    }

    /// Client for the agent this configuration points at
    pub fn client(&self) -> Result<AgentClient> {
        let mut config = self.config.clone();
        config.apply_env_overrides()?;
        AgentClient::new(&config.agent_url())
    }
}
