use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Keys accepted by `ark config get` / `ark config set`
pub const KNOWN_KEYS: &[&str] = &[
    "current_profile",
    "agent.host",
    "agent.port",
    "backend.url",
    "training.enabled",
    "training.auto_complete",
];

/// Main configuration structure, stored as YAML
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AgentConfig {
    /// Profile used when a request does not name one
    #[serde(default = "default_profile_name")]
    pub current_profile: String,

    #[serde(default)]
    pub agent: AgentSettings,

    #[serde(default)]
    pub backend: BackendSettings,

    /// Named AWS profiles
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,

    #[serde(default)]
    pub training: TrainingSettings,
}

/// Where the agent listens
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AgentSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Remote policy and audit service
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BackendSettings {
    #[serde(default = "default_backend_url")]
    pub url: String,
}

/// A named AWS account/role
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Profile {
    pub name: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// AWS CLI profile name
    #[serde(default)]
    pub aws_profile: String,

    #[serde(default)]
    pub description: String,
}

/// Training preferences
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TrainingSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub skip_modules: Vec<String>,

    #[serde(default)]
    pub auto_complete: bool,
}

// Default values
fn default_profile_name() -> String {
    "default".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8737
}

fn default_backend_url() -> String {
    "http://localhost:8080".to_string()
}

/// Region used when neither the request nor the stored credential names one
pub fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
        }
    }
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            skip_modules: Vec::new(),
            auto_complete: false,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert(
            "default".to_string(),
            Profile {
                name: "default".to_string(),
                region: default_region(),
                aws_profile: "default".to_string(),
                description: "Default AWS profile".to_string(),
            },
        );

        Self {
            current_profile: default_profile_name(),
            agent: AgentSettings::default(),
            backend: BackendSettings::default(),
            profiles,
            training: TrainingSettings::default(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from file, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_yaml_str(&content)
            .with_context(|| format!("Failed to parse YAML config file: {}", path.display()))
    }

    /// Parse config from a YAML string
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        // An empty file is a valid, all-defaults document
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: AgentConfig = serde_yaml::from_str(content).context("Failed to parse YAML")?;
        Ok(config)
    }

    /// Save configuration by rewriting the whole file atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config")?;

        crate::platform::atomic_write(path, yaml.as_bytes())
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.backend.url)
            .with_context(|| format!("Invalid backend URL: {}", self.backend.url))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            anyhow::bail!("Backend URL must use http or https (got: {})", url.scheme());
        }

        if !is_loopback_host(&self.agent.host) {
            anyhow::bail!(
                "Agent host must be a loopback address (got: {})",
                self.agent.host
            );
        }

        if self.agent.port == 0 {
            anyhow::bail!("Agent port must be non-zero");
        }

        if self.current_profile.trim().is_empty() {
            anyhow::bail!("current_profile must not be empty");
        }

        Ok(())
    }

    /// Read a value by key path (e.g. `agent.port`)
    pub fn get(&self, key: &str) -> Result<String> {
        let value = match key {
            "current_profile" => self.current_profile.clone(),
            "agent.host" => self.agent.host.clone(),
            "agent.port" => self.agent.port.to_string(),
            "backend.url" => self.backend.url.clone(),
            "training.enabled" => self.training.enabled.to_string(),
            "training.auto_complete" => self.training.auto_complete.to_string(),
            _ => anyhow::bail!(unknown_key(key)),
        };

        Ok(value)
    }

    /// Write a value by key path (e.g. `agent.port`)
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "current_profile" => {
                if value.trim().is_empty() {
                    anyhow::bail!("current_profile must not be empty");
                }
                self.current_profile = value.to_string();
            }
            "agent.host" => self.agent.host = value.to_string(),
            "agent.port" => {
                let port: u16 = value
                    .parse()
                    .with_context(|| format!("Invalid port number: {}", value))?;
                if port == 0 {
                    anyhow::bail!("Invalid port number: {}", value);
                }
                self.agent.port = port;
            }
            "backend.url" => self.backend.url = value.to_string(),
            "training.enabled" => self.training.enabled = parse_bool(key, value)?,
            "training.auto_complete" => self.training.auto_complete = parse_bool(key, value)?,
            _ => anyhow::bail!(unknown_key(key)),
        }

        Ok(())
    }

    /// Apply `AGENT_PORT` and `ARK_BACKEND_URL` from the environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(port) = std::env::var("AGENT_PORT") {
            if !port.is_empty() {
                self.set("agent.port", &port).context("Invalid AGENT_PORT")?;
            }
        }

        if let Ok(url) = std::env::var("ARK_BACKEND_URL") {
            if !url.is_empty() {
                self.backend.url = url;
            }
        }

        Ok(())
    }

    /// Base URL of the local agent API
    pub fn agent_url(&self) -> String {
        if self.agent.host.contains(':') {
            format!("http://[{}]:{}", self.agent.host, self.agent.port)
        } else {
            format!("http://{}:{}", self.agent.host, self.agent.port)
        }
    }
}

fn unknown_key(key: &str) -> String {
    format!(
        "Unknown config key: {} (known keys: {})",
        key,
        KNOWN_KEYS.join(", ")
    )
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => anyhow::bail!("{} must be 'true' or 'false' (got: {})", key, value),
    }
}

/// Whether `host` names the loopback interface
pub fn is_loopback_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }

    host.parse::<IpAddr>().map(|ip| ip.is_loopback()).unwrap_or(false)
}

fn home_dir() -> Result<PathBuf> {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().to_path_buf())
        .context("Failed to determine home directory")
}

/// Config file path: `ARK_CONFIG` or `~/.ark/config.yml`
pub fn get_config_path() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os("ARK_CONFIG").filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }

    Ok(home_dir()?.join(".ark").join("config.yml"))
}

/// Agent data directory: `ARK_AGENT_DATA` or `~/.ark`
pub fn get_data_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os("ARK_AGENT_DATA").filter(|d| !d.is_empty()) {
        return Ok(PathBuf::from(dir));
    }

    Ok(home_dir()?.join(".ark"))
}

/// Lock file inside the data directory
pub fn lock_path(data_dir: &Path) -> PathBuf {
    data_dir.join("agent.lock")
}

/// Store file inside the data directory
pub fn db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("agent.db")
}

/// Agent log file inside the data directory
pub fn log_path(data_dir: &Path) -> PathBuf {
    data_dir.join("agent.log")
}
