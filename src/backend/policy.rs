use anyhow::{Context, Result};
use reqwest::Client;

use super::models::{Details, Module, PolicyAction, PolicyCheckRequest, PolicyDecision};

pub const CHECK_PATH: &str = "/api/policies/check";

/// What the broker needs to know after asking the policy service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateOutcome {
    pub allowed: bool,
    pub required_modules: Vec<Module>,
    pub message: String,
}

impl GateOutcome {
    fn open() -> Self {
        Self {
            allowed: true,
            required_modules: Vec::new(),
            message: String::new(),
        }
    }
}

impl From<PolicyDecision> for GateOutcome {
    fn from(decision: PolicyDecision) -> Self {
        match decision.action {
            PolicyAction::Block => Self {
                allowed: false,
                required_modules: decision.required_modules,
                message: decision.message,
            },
            PolicyAction::Allow => Self {
                message: decision.message,
                ..Self::open()
            },
        }
    }
}

/// Client for the remote training-gate check
///
/// Fails open: only an explicit `block` from a reachable service with a
/// well-formed answer stops the caller.
#[derive(Clone)]
pub struct PolicyGate {
    client: Client,
    url: String,
}

impl PolicyGate {
    pub fn new(client: Client, backend_url: &str) -> Self {
        Self {
            client,
            url: format!("{}{}", backend_url.trim_end_matches('/'), CHECK_PATH),
        }
    }

    pub async fn check(
        &self,
        user_id: &str,
        action: &str,
        resource_type: &str,
        resource_details: Details,
    ) -> GateOutcome {
        let request = PolicyCheckRequest {
            user_id: user_id.to_string(),
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_details,
        };

        match self.request(&request).await {
            Ok(decision) => {
                tracing::debug!("Policy decision for {} on {}: {:?}", user_id, action, decision.action);
                decision.into()
            }
            Err(e) => {
                tracing::warn!(
                    "Policy service unavailable for {} on {}, allowing operation: {:#}",
                    user_id,
                    action,
                    e
                );
                GateOutcome::open()
            }
        }
    }

    async fn request(&self, request: &PolicyCheckRequest) -> Result<PolicyDecision> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.url))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .context("Failed to read policy response")?;

        serde_json::from_slice(&body)
            .with_context(|| format!("Undecodable policy response (HTTP {})", status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::http_client;
    use crate::testing::{MockBackend, unreachable_url};
    use axum::http::StatusCode;
    use std::time::Duration;

    fn details() -> Details {
        let mut details = Details::new();
        details.insert("bucket_name".to_string(), "logs".into());
        details
    }

    fn gate(url: &str) -> PolicyGate {
        PolicyGate::new(http_client(Duration::from_millis(500)).unwrap(), url)
    }

    #[tokio::test]
    async fn connection_error_fails_open() {
        let outcome = gate(&unreachable_url())
            .check("alice", "s3:CreateBucket", "s3:bucket", details())
            .await;

        assert!(outcome.allowed);
        assert!(outcome.required_modules.is_empty());
    }

    #[tokio::test]
    async fn explicit_block_carries_modules() {
        let backend = MockBackend::start().await;
        backend.require("s3:CreateBucket", &["data-handling"]);

        let outcome = gate(&backend.url)
            .check("alice", "s3:CreateBucket", "s3:bucket", details())
            .await;

        assert!(!outcome.allowed);
        assert_eq!(outcome.required_modules.len(), 1);
        assert_eq!(outcome.required_modules[0].name, "data-handling");

        let checks = backend.checks();
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].user_id, "alice");
        assert_eq!(checks[0].resource_details, details());
    }

    #[tokio::test]
    async fn completed_training_allows() {
        let backend = MockBackend::start().await;
        backend.require("s3:CreateBucket", &["data-handling"]);
        backend.complete("data-handling");

        let outcome = gate(&backend.url)
            .check("alice", "s3:CreateBucket", "s3:bucket", details())
            .await;

        assert!(outcome.allowed);
        assert_eq!(outcome.message, "Training requirements met");
    }

    #[tokio::test]
    async fn malformed_body_fails_open() {
        let backend = MockBackend::start().await;
        backend.respond_with(StatusCode::OK, "not json");

        let outcome = gate(&backend.url)
            .check("alice", "s3:CreateBucket", "s3:bucket", details())
            .await;
        assert!(outcome.allowed);
    }

    #[tokio::test]
    async fn unknown_action_fails_open() {
        let backend = MockBackend::start().await;
        backend.respond_with(StatusCode::OK, r#"{"action":"deny","required_modules":[{"name":"m1"}]}"#);

        let outcome = gate(&backend.url)
            .check("alice", "s3:CreateBucket", "s3:bucket", details())
            .await;
        assert!(outcome.allowed);
        assert!(outcome.required_modules.is_empty());
    }

    #[tokio::test]
    async fn server_error_body_fails_open() {
        let backend = MockBackend::start().await;
        backend.respond_with(StatusCode::INTERNAL_SERVER_ERROR, r#"{"error":"db down"}"#);

        let outcome = gate(&backend.url)
            .check("alice", "s3:CreateBucket", "s3:bucket", details())
            .await;
        assert!(outcome.allowed);
    }

    #[tokio::test]
    async fn slow_service_fails_open() {
        let backend = MockBackend::start().await;
        backend.require("s3:CreateBucket", &["data-handling"]);
        backend.set_delay(Duration::from_secs(2));

        let outcome = gate(&backend.url)
            .check("alice", "s3:CreateBucket", "s3:bucket", details())
            .await;
        assert!(outcome.allowed);
    }
}
