use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use super::store::StoreError;
use crate::aws::ProviderError;
use crate::backend::Module;

/// Errors surfaced by the agent's HTTP API
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    Blocked {
        required_modules: Vec<Module>,
        message: String,
    },

    #[error("{0}")]
    Provider(String),

    #[error("{0}")]
    Persistence(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Blocked { .. } => StatusCode::FORBIDDEN,
            ApiError::Provider(_) | ApiError::Persistence(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = match self {
            ApiError::Blocked {
                required_modules,
                message,
            } => json!({
                "status": "blocked",
                "reason": "training_required",
                "required_modules": required_modules,
                "message": message,
            }),
            other => json!({ "error": other.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!("Rejected request body: {}", rejection.body_text());
        ApiError::Validation("Invalid request body".to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        tracing::error!("Store operation failed: {}", err);
        ApiError::Persistence(format!("Storage error: {}", err))
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::InvalidInput(message) => ApiError::Validation(message),
            other => ApiError::Provider(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        tracing::error!("Blocking task failed: {}", err);
        ApiError::Internal("Internal error".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn plain_errors_use_error_field() {
        let (status, body) = body_json(ApiError::NotFound("Profile not found".into())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"error": "Profile not found"}));

        let (status, _) = body_json(ApiError::Persistence("disk".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn blocked_body_lists_modules() {
        let modules = vec![Module {
            id: "1".into(),
            name: "m1".into(),
            title: "Module one".into(),
            estimated_minutes: 5,
        }];

        let (status, body) = body_json(ApiError::Blocked {
            required_modules: modules,
            message: "Complete training".into(),
        })
        .await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["status"], "blocked");
        assert_eq!(body["reason"], "training_required");
        assert_eq!(body["required_modules"][0]["name"], "m1");
        assert!(body.get("error").is_none());
    }

    #[test]
    fn provider_input_errors_are_validation() {
        let err: ApiError = ProviderError::InvalidInput("bad".into()).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err: ApiError = ProviderError::Api {
            code: "AccessDenied".into(),
            message: "permission denied".into(),
        }
        .into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "permission denied");
    }
}
