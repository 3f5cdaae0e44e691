use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{self, AgentConfig};

/// Timeout applied to every policy and audit request
pub const BACKEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Build metadata reported by `/api/system/version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    pub version: String,
    pub commit: String,
    pub build_date: String,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            commit: option_env!("ARK_COMMIT").unwrap_or("unknown").to_string(),
            build_date: option_env!("ARK_BUILD_DATE").unwrap_or("unknown").to_string(),
        }
    }
}

/// Everything the agent needs to know at startup, resolved once
#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub bind_addr: String,
    pub backend_url: String,
    pub backend_timeout: Duration,
    /// Path-style S3-compatible endpoint, when not talking to AWS
    pub s3_endpoint: Option<String>,
    /// Identity sent with policy checks and audit entries
    pub user_id: String,
    /// Profile used when a request omits one
    pub default_profile: String,
    pub build: BuildInfo,
}

impl Settings {
    /// Resolve settings from the loaded config and the process environment
    pub fn from_env(config: &AgentConfig) -> Result<Self> {
        let mut config = config.clone();
        config.apply_env_overrides()?;

        config.validate().context("Invalid configuration")?;

        Ok(Self {
            data_dir: config::get_data_dir()?,
            bind_addr: bind_addr(&config.agent.host, config.agent.port),
            backend_url: config.backend.url.trim_end_matches('/').to_string(),
            backend_timeout: BACKEND_TIMEOUT,
            s3_endpoint: std::env::var("ARK_S3_ENDPOINT").ok().filter(|e| !e.is_empty()),
            user_id: current_user(),
            default_profile: config.current_profile.clone(),
            build: BuildInfo::current(),
        })
    }

    /// Resolve the loopback socket address to bind
    pub async fn resolve_bind_addr(&self) -> Result<SocketAddr> {
        let addr = tokio::net::lookup_host(&self.bind_addr)
            .await
            .with_context(|| format!("Failed to resolve {}", self.bind_addr))?
            .find(|addr| addr.ip().is_loopback())
            .with_context(|| format!("{} does not resolve to a loopback address", self.bind_addr))?;

        Ok(addr)
    }
}

fn bind_addr(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// The OS user running the agent
pub fn current_user() -> String {
    ["USER", "USERNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|user| !user.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
impl Settings {
    /// Settings pointing at a scratch data dir and the given backend
    pub fn for_tests(data_dir: PathBuf, backend_url: &str) -> Self {
        Self {
            data_dir,
            bind_addr: "127.0.0.1:0".to_string(),
            backend_url: backend_url.trim_end_matches('/').to_string(),
            backend_timeout: Duration::from_secs(2),
            s3_endpoint: None,
            user_id: "alice".to_string(),
            default_profile: "default".to_string(),
            build: BuildInfo::current(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_info_reports_package_version() {
        let build = BuildInfo::current();
        assert_eq!(build.version, env!("CARGO_PKG_VERSION"));
        assert!(!build.commit.is_empty());
    }

    #[test]
    fn current_user_is_never_empty() {
        assert!(!current_user().is_empty());
    }

    #[test]
    fn ipv6_bind_addr_is_bracketed() {
        assert_eq!(bind_addr("::1", 8737), "[::1]:8737");
        assert_eq!(bind_addr("localhost", 8737), "localhost:8737");
    }

    #[tokio::test]
    async fn bind_addr_resolves_to_loopback() {
        let settings = Settings::for_tests(PathBuf::from("/tmp"), "http://localhost:1");
        let addr = settings.resolve_bind_addr().await.unwrap();
        assert!(addr.ip().is_loopback());
    }
}
