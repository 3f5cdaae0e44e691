use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::json;

use super::{blocking, optional};
use crate::agent::error::ApiError;
use crate::agent::server::AppState;
use crate::aws::{self, CreateBucketInput, CreateBucketOutput, EncryptionType};
use crate::backend::{AuditLogEntry, AuditStatus, Details};
use crate::config;
use crate::training;

pub const CREATE_BUCKET_ACTION: &str = "s3:CreateBucket";
pub const BUCKET_RESOURCE: &str = "s3:bucket";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EncryptionRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub kms_key_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateBucketRequest {
    pub bucket_name: String,
    pub region: String,
    pub encryption: EncryptionRequest,
    pub versioning_enabled: bool,
    pub profile: String,
}

/// `POST /api/s3/buckets`
///
/// The bucket is only created after the policy gate allows it. Every
/// outcome past the gate is audited without delaying the response.
pub async fn create_bucket(
    State(state): State<AppState>,
    payload: Result<Json<CreateBucketRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateBucketOutput>), ApiError> {
    let Json(request) = payload?;

    if request.bucket_name.is_empty() {
        return Err(ApiError::Validation("bucket_name is required".to_string()));
    }
    aws::validate_bucket_name(&request.bucket_name)?;
    let encryption: EncryptionType = request.encryption.kind.parse()?;

    let profile = if request.profile.is_empty() {
        state.settings.default_profile.clone()
    } else {
        request.profile
    };

    let key = profile.clone();
    let credential = blocking(&state.store, move |store| optional(store.get_credential(&key)))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Credentials not found for profile: {}", profile)))?;

    let region = [request.region.as_str(), credential.region.as_str()]
        .into_iter()
        .find(|r| !r.is_empty())
        .map(String::from)
        .unwrap_or_else(config::default_region);

    let bucket = request.bucket_name;

    let mut details = Details::new();
    details.insert("bucket_name".to_string(), json!(bucket));
    details.insert("region".to_string(), json!(region));

    let outcome = state
        .gate
        .check(&state.settings.user_id, CREATE_BUCKET_ACTION, BUCKET_RESOURCE, details)
        .await;

    if !outcome.allowed {
        tracing::info!(
            "Blocked {} of {} for {}: {} training modules outstanding",
            CREATE_BUCKET_ACTION,
            bucket,
            state.settings.user_id,
            outcome.required_modules.len()
        );

        state.audit.emit(
            AuditLogEntry::new(CREATE_BUCKET_ACTION, BUCKET_RESOURCE, &bucket, AuditStatus::Blocked)
                .with_detail("region", region.as_str())
                .with_detail("required_modules", json!(outcome.required_modules)),
        );

        let message = if outcome.message.is_empty() {
            training::TRAINING_REQUIRED.to_string()
        } else {
            outcome.message
        };

        return Err(ApiError::Blocked {
            required_modules: outcome.required_modules,
            message,
        });
    }

    let input = CreateBucketInput {
        bucket_name: bucket.clone(),
        region: region.clone(),
        encryption,
        kms_key_id: request.encryption.kms_key_id.filter(|k| !k.is_empty()),
        versioning_enabled: request.versioning_enabled,
    };

    tracing::info!(
        "Creating bucket {} in {} (encryption {}, versioning {})",
        bucket,
        region,
        encryption,
        input.versioning_enabled
    );

    match state.provider.create_bucket(&credential, &input).await {
        Ok(output) => {
            tracing::info!("Created bucket {} at {}", output.bucket_name, output.location);

            state.audit.emit(
                AuditLogEntry::new(
                    CREATE_BUCKET_ACTION,
                    BUCKET_RESOURCE,
                    &output.bucket_name,
                    AuditStatus::Success,
                )
                .with_detail("region", output.region.as_str())
                .with_detail("encryption", encryption.as_str())
                .with_detail("versioning", input.versioning_enabled),
            );

            Ok((StatusCode::CREATED, Json(output)))
        }
        Err(e) => {
            tracing::error!("Failed to create bucket {}: {}", bucket, e);

            state.audit.emit(
                AuditLogEntry::new(CREATE_BUCKET_ACTION, BUCKET_RESOURCE, &bucket, AuditStatus::Failure)
                    .with_detail("region", region.as_str())
                    .with_detail("encryption", encryption.as_str())
                    .with_detail("versioning", input.versioning_enabled)
                    .with_detail("error", e.to_string()),
            );

            Err(ApiError::Provider(e.to_string()))
        }
    }
}
