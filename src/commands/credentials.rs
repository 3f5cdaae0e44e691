use anyhow::{Context, Result};
use reqwest::{Method, StatusCode};
use serde_json::json;

use ark::agent::ProfileSummary;

use super::Session;
use super::utils::block_on;

pub struct NewCredential {
    pub profile: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub region: Option<String>,
}

pub fn add(session: &Session, credential: NewCredential) -> Result<()> {
    let client = session.client()?;

    let body = json!({
        "profile": &credential.profile,
        "access_key_id": &credential.access_key_id,
        "secret_access_key": &credential.secret_access_key,
        "session_token": &credential.session_token,
        "region": credential.region.as_deref().unwrap_or_default(),
    });

    block_on(async {
        client.ensure_running().await?;
        client
            .request(Method::POST, &["api", "credentials"], Some(&body))
            .await?
            .into_success()
    })??;

    println!("✓ Credentials stored for profile '{}'", credential.profile);
    println!();
    println!("Note: Credentials are stored locally and not encrypted.");
    println!("In production, consider using IAM roles or AWS SSO.");
    Ok(())
}

pub fn list(session: &Session) -> Result<()> {
    let client = session.client()?;

    let body = block_on(async {
        client.ensure_running().await?;
        client
            .request(Method::GET, &["api", "credentials"], None)
            .await?
            .into_success()
    })??;

    let profiles: Vec<ProfileSummary> =
        serde_json::from_value(body).context("Failed to decode profile list")?;

    print!("{}", format_profiles(&profiles));
    Ok(())
}

pub fn delete(session: &Session, profile: &str) -> Result<()> {
    let client = session.client()?;

    let reply = block_on(async {
        client.ensure_running().await?;
        client
            .request(Method::DELETE, &["api", "credentials", profile], None)
            .await
    })??;

    if reply.status == StatusCode::NOT_FOUND {
        anyhow::bail!("Profile '{}' not found", profile);
    }
    reply.into_success()?;

    println!("✓ Deleted credentials for profile '{}'", profile);
    Ok(())
}

fn format_profiles(profiles: &[ProfileSummary]) -> String {
    if profiles.is_empty() {
        return "No credentials stored.\n".to_string();
    }

    let mut out = String::from("Stored credential profiles:\n");
    for summary in profiles {
        out.push_str(&format!("  {}  (region: {})\n", summary.profile, summary.region));
    }
    out
}
