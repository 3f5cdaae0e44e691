// Clients for the remote policy and audit services
//
// Both share one HTTP client with a fixed timeout and never retry. The
// policy gate fails open and the audit emitter swallows failures, so an
// unreachable backend never fails a gated operation.

mod audit;
mod models;
mod policy;

pub use audit::{AUDIT_PATH, AuditEmitter, MAX_IN_FLIGHT};
pub use models::{
    AuditLogEntry, AuditStatus, Details, Module, PolicyAction, PolicyCheckRequest, PolicyDecision,
};
pub use policy::{CHECK_PATH, GateOutcome, PolicyGate};

use anyhow::{Context, Result};
use std::time::Duration;

/// HTTP client shared by the policy gate and audit emitter
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(format!("ark-agent/{}", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")
}
