use anyhow::{Context, Result};
use std::path::Path;

use ark::config::AgentConfig;

use super::Session;

pub fn get(session: &Session, key: &str) -> Result<()> {
    println!("{}", session.config.get(key)?);
    Ok(())
}

/// Change one key and rewrite the file
///
/// The running agent reads its configuration at startup only.
pub fn set(session: &Session, key: &str, value: &str) -> Result<()> {
    let mut config = session.config.clone();
    config.set(key, value)?;
    config
        .validate()
        .with_context(|| format!("Refusing to set {} = {}", key, value))?;
    config.save(&session.config_path)?;

    println!("✓ Set {} = {}", key, value);
    Ok(())
}

pub fn show(session: &Session) -> Result<()> {
    let yaml = serde_yaml::to_string(&session.config).context("Failed to serialize config")?;

    println!("Configuration file: {}", session.config_path.display());
    println!();
    print!("{}", yaml);
    Ok(())
}

/// Write the default configuration to the config path
///
/// Does not read the existing file, so it also repairs a malformed one.
pub fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists: {} (use --force to overwrite)",
            path.display()
        );
    }

    AgentConfig::default().save(path)?;

    println!("✓ Configuration initialized at {}", path.display());
    Ok(())
}

pub fn path(session: &Session) -> Result<()> {
    println!("{}", session.config_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use predicates::prelude::*;

    fn session(temp: &assert_fs::TempDir) -> Session {
        Session {
            config_path: temp.child("config.yml").path().to_path_buf(),
            config: AgentConfig::default(),
            explicit_config: true,
        }
    }

    #[test]
    fn set_writes_file() {
        let temp = assert_fs::TempDir::new().unwrap();
        let session = session(&temp);

        set(&session, "backend.url", "https://ark.example.com").unwrap();

        temp.child("config.yml")
            .assert(predicate::str::contains("url: https://ark.example.com"));
        let saved = AgentConfig::load(&session.config_path).unwrap();
        assert_eq!(saved.backend.url, "https://ark.example.com");
    }

    #[test]
    fn init_writes_defaults() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("nested").child("config.yml");

        init(file.path(), false).unwrap();

        let saved = AgentConfig::load(file.path()).unwrap();
        assert_eq!(saved, AgentConfig::default());
    }

    #[test]
    fn init_replaces_existing_file_only_when_forced() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("config.yml");
        file.write_str("agent: [not, a, map]\n").unwrap();

        assert!(init(file.path(), false).is_err());
        file.assert("agent: [not, a, map]\n");

        init(file.path(), true).unwrap();
        assert_eq!(AgentConfig::load(file.path()).unwrap(), AgentConfig::default());
    }

    #[test]
    fn set_refuses_invalid_config() {
        let temp = assert_fs::TempDir::new().unwrap();
        let session = session(&temp);

        assert!(set(&session, "agent.host", "0.0.0.0").is_err());
        assert!(set(&session, "nope", "x").is_err());
        temp.child("config.yml").assert(predicate::path::missing());
    }
}
