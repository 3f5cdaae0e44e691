use anyhow::{Context, Result};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::future::Future;
use std::io::Write;
use std::time::{Duration, Instant};
use url::Url;

/// How often readiness is polled while starting or stopping the agent
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// How long start and stop wait for the agent
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bucket creation waits on the policy gate and on S3
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Run `future` to completion on a fresh runtime
pub fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    Ok(runtime.block_on(future))
}

/// Print without a newline and flush, for progress lines
pub fn progress(text: &str) {
    print!("{}", text);
    let _ = std::io::stdout().flush();
}

/// A decoded response from the agent
#[derive(Debug)]
pub struct Reply {
    pub status: StatusCode,
    pub body: Value,
}

impl Reply {
    /// The agent's `{"error": ...}` message, or a generic description
    pub fn error_message(&self) -> String {
        match self.body.get("error").and_then(Value::as_str) {
            Some(message) => message.to_string(),
            None => format!("unexpected response (status {})", self.status.as_u16()),
        }
    }

    /// The body of a 2xx reply, otherwise the agent's error
    pub fn into_success(self) -> Result<Value> {
        if !self.status.is_success() {
            anyhow::bail!("Agent error: {}", self.error_message());
        }
        Ok(self.body)
    }
}

/// HTTP client for the local agent API
pub struct AgentClient {
    base: Url,
    http: reqwest::Client,
}

impl AgentClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url).with_context(|| format!("Invalid agent URL: {}", base_url))?;

        let http = reqwest::Client::builder()
            .user_agent(format!("ark/{}", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { base, http })
    }

    pub fn base_url(&self) -> &str {
        self.base.as_str().trim_end_matches('/')
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Agent URL cannot be a base: {}", self.base))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send a request to the path made of `segments`
    ///
    /// Each segment is percent-encoded, so profile names can be passed as is.
    pub async fn request(&self, method: Method, segments: &[&str], body: Option<&Value>) -> Result<Reply> {
        let url = self.url(segments)?;

        let mut request = self.http.request(method.clone(), url.clone());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to reach agent at {}", self.base_url()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read response from {} {}", method, url.path()))?;

        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        tracing::debug!("{} {} -> {}", method, url.path(), status);

        Ok(Reply { status, body })
    }

    /// `GET /api/system/health`
    pub async fn health(&self) -> Result<Value> {
        self.request(Method::GET, &["api", "system", "health"], None)
            .await?
            .into_success()
    }

    /// Fail unless the agent answers its health check
    pub async fn ensure_running(&self) -> Result<()> {
        self.health().await.map(|_| ()).with_context(|| {
            format!(
                "Agent is not running at {}. Start it with: ark agent start",
                self.base_url()
            )
        })
    }

    /// Poll the health endpoint until it answers (`up`) or stops answering
    pub async fn wait_for(&self, up: bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.health().await.is_ok() == up {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::{delete, get};
    use serde_json::json;

    async fn serve(router: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        url
    }

    fn closed_port_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        url
    }

    #[test]
    fn error_message_prefers_agent_error() {
        let reply = Reply {
            status: StatusCode::NOT_FOUND,
            body: json!({"error": "Profile not found"}),
        };
        assert_eq!(reply.error_message(), "Profile not found");

        let reply = Reply {
            status: StatusCode::BAD_GATEWAY,
            body: Value::Null,
        };
        assert_eq!(reply.error_message(), "unexpected response (status 502)");
        assert!(reply.into_success().is_err());
    }

    #[test]
    fn url_segments_are_encoded() {
        let client = AgentClient::new("http://127.0.0.1:8737").unwrap();
        let url = client.url(&["api", "credentials", "team/prod dev"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8737/api/credentials/team%2Fprod%20dev");
        assert_eq!(client.base_url(), "http://127.0.0.1:8737");
    }

    #[tokio::test]
    async fn health_and_requests_against_live_agent() {
        let router = axum::Router::new()
            .route("/api/system/health", get(|| async { Json(json!({"status": "healthy", "version": "1.2.3"})) }))
            .route(
                "/api/credentials/:profile",
                delete(|axum::extract::Path(profile): axum::extract::Path<String>| async move {
                    (AxumStatus::NOT_FOUND, Json(json!({"error": format!("no {}", profile)})))
                }),
            );
        let client = AgentClient::new(&serve(router).await).unwrap();

        client.ensure_running().await.unwrap();
        assert_eq!(client.health().await.unwrap()["version"], "1.2.3");
        assert!(client.wait_for(true, Duration::from_secs(1)).await);

        let reply = client
            .request(Method::DELETE, &["api", "credentials", "a b"], None)
            .await
            .unwrap();
        assert_eq!(reply.status, StatusCode::NOT_FOUND);
        assert_eq!(reply.error_message(), "no a b");
    }

    #[tokio::test]
    async fn stopped_agent_is_reported() {
        let client = AgentClient::new(&closed_port_url()).unwrap();

        let err = client.ensure_running().await.unwrap_err();
        assert!(err.to_string().contains("ark agent start"));
        assert!(client.wait_for(false, Duration::from_secs(1)).await);
        assert!(!client.wait_for(true, Duration::from_millis(300)).await);
    }
}
