//! Test doubles for the agent's remote collaborators.

use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tower::ServiceExt;

use crate::agent::server::{self, AppState};
use crate::agent::store::{Credential, Store};
use crate::aws::s3::translate;
use crate::aws::{BucketProvider, CreateBucketInput, CreateBucketOutput, ProviderError};
use crate::backend::{AUDIT_PATH, AuditLogEntry, CHECK_PATH, Module, PolicyCheckRequest};
use crate::config;
use crate::settings::Settings;
use crate::training::{self, Policy};

/// Modules known to the mock backend
pub fn catalog() -> Vec<Module> {
    [
        ("1", "security-basics", "Security Basics", 20),
        ("2", "data-handling", "Data Handling", 15),
        ("3", "cost-awareness", "Cost Awareness", 10),
    ]
    .into_iter()
    .map(|(id, name, title, minutes)| Module {
        id: id.to_string(),
        name: name.to_string(),
        title: title.to_string(),
        estimated_minutes: minutes,
    })
    .collect()
}

/// A loopback URL nothing is listening on
pub fn unreachable_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

#[derive(Default)]
struct BackendState {
    policies: Mutex<Vec<Policy>>,
    completed: Mutex<BTreeSet<String>>,
    checks: Mutex<Vec<PolicyCheckRequest>>,
    audits: Mutex<Vec<AuditLogEntry>>,
    canned: Mutex<Option<(StatusCode, String)>>,
    audit_status: Mutex<Option<StatusCode>>,
    delay: Mutex<Duration>,
}

/// Policy and audit service bound to an ephemeral loopback port
pub struct MockBackend {
    pub url: String,
    state: Arc<BackendState>,
    server: JoinHandle<()>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let state = Arc::new(BackendState::default());

        let app = Router::new()
            .route(CHECK_PATH, post(check))
            .route(AUDIT_PATH, post(audit))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { url, state, server }
    }

    /// Gate `action` behind the named modules
    pub fn require(&self, action: &str, modules: &[&str]) {
        let mut policies = self.state.policies.lock().unwrap();
        let name = format!("gate-{}", policies.len());
        policies.push(Policy::training_gate(&name, &[action], modules));
    }

    pub fn complete(&self, module: &str) {
        self.state.completed.lock().unwrap().insert(module.to_string());
    }

    /// Answer every policy check with this raw response
    pub fn respond_with(&self, status: StatusCode, body: &str) {
        *self.state.canned.lock().unwrap() = Some((status, body.to_string()));
    }

    pub fn set_audit_status(&self, status: StatusCode) {
        *self.state.audit_status.lock().unwrap() = Some(status);
    }

    /// Delay every response
    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = delay;
    }

    pub fn checks(&self) -> Vec<PolicyCheckRequest> {
        self.state.checks.lock().unwrap().clone()
    }

    pub fn audits(&self) -> Vec<AuditLogEntry> {
        self.state.audits.lock().unwrap().clone()
    }

    /// Poll until at least `count` audit entries arrived or `timeout` passes
    pub async fn wait_for_audits(&self, count: usize, timeout: Duration) -> Vec<AuditLogEntry> {
        let deadline = Instant::now() + timeout;
        loop {
            let audits = self.audits();
            if audits.len() >= count || Instant::now() >= deadline {
                return audits;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn check(State(state): State<Arc<BackendState>>, Json(request): Json<PolicyCheckRequest>) -> Response {
    state.checks.lock().unwrap().push(request.clone());

    let delay = *state.delay.lock().unwrap();
    tokio::time::sleep(delay).await;

    let canned = state.canned.lock().unwrap().clone();
    if let Some((status, body)) = canned {
        return (status, body).into_response();
    }

    let completed = state.completed.lock().unwrap().clone();
    let policies = state.policies.lock().unwrap().clone();
    Json(training::evaluate(&completed, &request.action, &policies, &catalog())).into_response()
}

async fn audit(State(state): State<Arc<BackendState>>, Json(entry): Json<AuditLogEntry>) -> StatusCode {
    state.audits.lock().unwrap().push(entry);

    let delay = *state.delay.lock().unwrap();
    tokio::time::sleep(delay).await;

    let status = *state.audit_status.lock().unwrap();
    status.unwrap_or(StatusCode::OK)
}

/// Bucket provider that records calls instead of talking to S3
#[derive(Default)]
pub struct RecordingProvider {
    calls: Mutex<Vec<CreateBucketInput>>,
    failure: Mutex<Option<(String, String)>>,
}

impl RecordingProvider {
    pub fn calls(&self) -> Vec<CreateBucketInput> {
        self.calls.lock().unwrap().clone()
    }

    /// Fail subsequent calls with this S3 error code
    pub fn fail_with(&self, code: &str, message: &str) {
        *self.failure.lock().unwrap() = Some((code.to_string(), message.to_string()));
    }
}

#[async_trait]
impl BucketProvider for RecordingProvider {
    async fn create_bucket(
        &self,
        _credential: &Credential,
        input: &CreateBucketInput,
    ) -> Result<CreateBucketOutput, ProviderError> {
        self.calls.lock().unwrap().push(input.clone());

        let failure = self.failure.lock().unwrap().clone();
        if let Some((code, message)) = failure {
            return Err(ProviderError::Api {
                message: translate(&code, &message),
                code,
            });
        }

        Ok(CreateBucketOutput {
            bucket_name: input.bucket_name.clone(),
            region: input.region.clone(),
            location: format!("http://{}.s3.amazonaws.com/", input.bucket_name),
            created_at: Utc::now(),
        })
    }
}

/// An agent wired to a scratch store, a recording provider and `backend_url`
pub struct TestAgent {
    pub state: AppState,
    pub provider: Arc<RecordingProvider>,
    _data_dir: TempDir,
}

impl TestAgent {
    pub fn new(backend_url: &str) -> Self {
        let data_dir = tempfile::tempdir().unwrap();
        let settings = Settings::for_tests(data_dir.path().to_path_buf(), backend_url);
        let store = Arc::new(Store::open(&config::db_path(data_dir.path())).unwrap());
        let provider = Arc::new(RecordingProvider::default());

        let state = AppState::new(settings, store, provider.clone()).unwrap();

        Self {
            state,
            provider,
            _data_dir: data_dir,
        }
    }

    pub fn add_credential(&self, profile: &str, region: &str) {
        let credential = Credential {
            access_key_id: format!("AKIA{}", profile.to_uppercase()),
            secret_access_key: "secret".to_string(),
            session_token: None,
            region: region.to_string(),
            expiration: None,
        };
        self.state.store.set_credential(profile, &credential).unwrap();
    }

    /// Send a JSON request through the router
    pub async fn call(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let body = body.map(|b| b.to_string()).unwrap_or_default();
        self.call_raw(method, uri, &body).await
    }

    pub async fn call_raw(&self, method: &str, uri: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = server::router(self.state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };

        (status, value)
    }
}
