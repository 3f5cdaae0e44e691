use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;

use super::models::AuditLogEntry;

pub const AUDIT_PATH: &str = "/api/audit/log";

/// Deliveries allowed in flight at once; further entries wait for a slot
pub const MAX_IN_FLIGHT: usize = 16;

/// Best-effort, fire-and-forget delivery of audit entries
///
/// `emit` never waits on the network. Failed deliveries are logged and dropped.
#[derive(Clone)]
pub struct AuditEmitter {
    client: Client,
    url: Arc<str>,
    user_id: Arc<str>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl AuditEmitter {
    pub fn new(client: Client, backend_url: &str, user_id: &str) -> Self {
        Self {
            client,
            url: format!("{}{}", backend_url.trim_end_matches('/'), AUDIT_PATH).into(),
            user_id: user_id.into(),
            permits: Arc::new(Semaphore::new(MAX_IN_FLIGHT)),
            tracker: TaskTracker::new(),
        }
    }

    /// Queue `entry` for delivery. Must be called from within a Tokio runtime.
    pub fn emit(&self, mut entry: AuditLogEntry) {
        if entry.user_id.is_none() {
            entry.user_id = Some(self.user_id.to_string());
        }

        let client = self.client.clone();
        let url = self.url.clone();
        let permits = self.permits.clone();

        self.tracker.spawn(async move {
            // Closed only if the emitter is torn down mid-flight
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };

            match deliver(&client, &url, &entry).await {
                Ok(()) => tracing::debug!("Audit entry delivered: {} {}", entry.action, entry.resource_id),
                Err(e) => tracing::warn!(
                    "Dropping audit entry for {} {}: {:#}",
                    entry.action,
                    entry.resource_id,
                    e
                ),
            }
        });
    }

    /// Number of deliveries queued or in flight
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Give queued and in-flight deliveries up to `timeout` to finish
    ///
    /// Returns false if some deliveries were still pending at the deadline.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.tracker.close();

        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_err() {
            tracing::warn!(
                "Abandoning {} undelivered audit entries after {:?}",
                self.tracker.len(),
                timeout
            );
            return false;
        }

        true
    }
}

async fn deliver(client: &Client, url: &str, entry: &AuditLogEntry) -> Result<()> {
    let response = client
        .post(url)
        .json(entry)
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", url))?;

    match response.status() {
        StatusCode::OK => Ok(()),
        status => anyhow::bail!("Audit service returned {}", status),
    }
}
