use anyhow::{Context, Result};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;

use ark::aws::{self, CreateBucketOutput, EncryptionType};
use ark::backend::Module;

use super::Session;
use super::utils::block_on;

pub struct BucketOptions {
    pub name: String,
    pub region: Option<String>,
    pub encryption: String,
    pub kms_key_id: Option<String>,
    pub versioning: bool,
    pub profile: Option<String>,
}

/// 403 body returned when training is missing
#[derive(Debug, Deserialize)]
struct Blocked {
    #[serde(default)]
    required_modules: Vec<Module>,
    #[serde(default)]
    message: String,
}

pub fn create_bucket(session: &Session, options: BucketOptions) -> Result<()> {
    // Same checks the agent applies, without a round trip
    aws::validate_bucket_name(&options.name)?;
    let encryption: EncryptionType = options.encryption.parse()?;

    let client = session.client()?;

    let body = json!({
        "bucket_name": &options.name,
        "region": options.region.as_deref().unwrap_or_default(),
        "encryption": {
            "type": encryption.as_str(),
            "kms_key_id": &options.kms_key_id,
        },
        "versioning_enabled": options.versioning,
        "profile": options.profile.as_deref().unwrap_or_default(),
    });

    let reply = block_on(async {
        client.ensure_running().await?;
        client.request(Method::POST, &["api", "s3", "buckets"], Some(&body)).await
    })??;

    match reply.status {
        StatusCode::CREATED => {
            let created: CreateBucketOutput =
                serde_json::from_value(reply.body).context("Failed to parse response")?;
            print!("{}", format_created(&created));
            Ok(())
        }
        StatusCode::FORBIDDEN => {
            let blocked: Blocked =
                serde_json::from_value(reply.body).context("Failed to parse response")?;
            print!("{}", format_blocked(&blocked));
            std::process::exit(1);
        }
        _ => anyhow::bail!("Failed to create bucket: {}", reply.error_message()),
    }
}

fn format_created(created: &CreateBucketOutput) -> String {
    let mut out = String::from("✓ S3 bucket created successfully\n\n");
    out.push_str(&format!("  Name:      {}\n", created.bucket_name));
    out.push_str(&format!("  Region:    {}\n", created.region));
    if !created.location.is_empty() {
        out.push_str(&format!("  Location:  {}\n", created.location));
    }
    out.push_str(&format!(
        "  Created:   {}\n",
        created.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out
}

fn format_blocked(blocked: &Blocked) -> String {
    let mut out = String::from("✗ Training required before creating S3 buckets\n\n");

    if !blocked.message.is_empty() {
        out.push_str(&format!("{}\n\n", blocked.message));
    }

    out.push_str("You must complete the following training modules:\n\n");
    for (i, module) in blocked.required_modules.iter().enumerate() {
        let title = if module.title.is_empty() {
            &module.name
        } else {
            &module.title
        };
        out.push_str(&format!("  {}. {} ({} minutes)\n", i + 1, title, module.estimated_minutes));
    }

    out.push_str("\nAfter completing training, run your command again.\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn created_bucket_summary() {
        let created = CreateBucketOutput {
            bucket_name: "team-logs".to_string(),
            region: "eu-west-1".to_string(),
            location: "http://team-logs.s3.amazonaws.com/".to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 5).unwrap(),
        };

        assert_eq!(
            format_created(&created),
            "✓ S3 bucket created successfully\n\n  \
             Name:      team-logs\n  \
             Region:    eu-west-1\n  \
             Location:  http://team-logs.s3.amazonaws.com/\n  \
             Created:   2026-03-01 09:30:05 UTC\n"
        );
    }

    #[test]
    fn blocked_lists_modules_in_order() {
        let blocked: Blocked = serde_json::from_value(json!({
            "status": "blocked",
            "reason": "training_required",
            "required_modules": [
                {"id": "1", "name": "security-basics", "title": "Security Basics", "estimated_minutes": 20},
                {"name": "cost-awareness"}
            ],
            "message": "Complete required training modules to perform this operation"
        }))
        .unwrap();

        let text = format_blocked(&blocked);
        assert!(text.starts_with("✗ Training required before creating S3 buckets\n"));
        assert!(text.contains("  1. Security Basics (20 minutes)\n  2. cost-awareness (0 minutes)\n"));
        assert!(text.ends_with("After completing training, run your command again.\n"));
    }
}
