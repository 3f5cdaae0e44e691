use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Free-form attributes attached to policy checks and audit entries
pub type Details = serde_json::Map<String, serde_json::Value>;

/// A unit of required training
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Module {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub estimated_minutes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    Allow,
    Block,
}

/// Verdict returned by `POST /api/policies/check`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PolicyDecision {
    pub action: PolicyAction,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub required_modules: Vec<Module>,

    #[serde(default)]
    pub message: String,
}

impl PolicyDecision {
    pub fn allow(message: impl Into<String>) -> Self {
        Self {
            action: PolicyAction::Allow,
            reason: None,
            required_modules: Vec::new(),
            message: message.into(),
        }
    }

    pub fn block(required_modules: Vec<Module>, message: impl Into<String>) -> Self {
        Self {
            action: PolicyAction::Block,
            reason: Some("training_required".to_string()),
            required_modules,
            message: message.into(),
        }
    }
}

/// Body of `POST /api/policies/check`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PolicyCheckRequest {
    pub user_id: String,
    pub action: String,
    pub resource_type: String,
    #[serde(default)]
    pub resource_details: Details,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Failure,
    Blocked,
}

/// One audited action; `id` and `created_at` are assigned by the backend
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AuditLogEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub status: AuditStatus,

    #[serde(default)]
    pub details: Details,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl AuditLogEntry {
    pub fn new(
        action: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        status: AuditStatus,
    ) -> Self {
        Self {
            id: None,
            user_id: None,
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            status,
            details: Details::new(),
            created_at: None,
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
