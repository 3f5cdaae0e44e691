use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::blocking;
use crate::agent::error::ApiError;
use crate::agent::server::AppState;
use crate::agent::store::Credential;
use crate::config;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SetCredentialRequest {
    pub profile: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub region: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProfileSummary {
    pub profile: String,
    pub region: String,
}

/// `POST /api/credentials`
pub async fn set(
    State(state): State<AppState>,
    payload: Result<Json<SetCredentialRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload?;

    if request.profile.is_empty() || request.access_key_id.is_empty() || request.secret_access_key.is_empty() {
        return Err(ApiError::Validation(
            "profile, access_key_id, and secret_access_key are required".to_string(),
        ));
    }

    let region = if request.region.is_empty() {
        config::default_region()
    } else {
        request.region
    };

    let credential = Credential {
        access_key_id: request.access_key_id,
        secret_access_key: request.secret_access_key,
        session_token: request.session_token.filter(|t| !t.is_empty()),
        region: region.clone(),
        expiration: None,
    };

    let profile = request.profile;
    let key = profile.clone();
    blocking(&state.store, move |store| store.set_credential(&key, &credential)).await?;

    tracing::info!("Stored credentials for profile {} ({})", profile, region);

    Ok(Json(json!({ "status": "success", "profile": profile })))
}

/// `GET /api/credentials`
pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<ProfileSummary>>, ApiError> {
    let profiles = blocking(&state.store, |store| store.list_credentials()).await?;

    Ok(Json(
        profiles
            .into_iter()
            .map(|(profile, credential)| ProfileSummary {
                profile,
                region: credential.region,
            })
            .collect(),
    ))
}

/// `DELETE /api/credentials/{profile}`
pub async fn delete(
    State(state): State<AppState>,
    Path(profile): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let key = profile.clone();
    let existed = blocking(&state.store, move |store| store.delete_credential_if_present(&key)).await?;

    if !existed {
        return Err(ApiError::NotFound("Profile not found".to_string()));
    }

    tracing::info!("Deleted credentials for profile {}", profile);

    Ok(Json(json!({ "status": "success" })))
}
