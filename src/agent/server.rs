use anyhow::{Context, Result};
use axum::Router;
use axum::http::{HeaderValue, Method, header};
use axum::routing::{delete, get, post};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::handlers;
use super::store::Store;
use crate::aws::BucketProvider;
use crate::backend::{self, AuditEmitter, PolicyGate};
use crate::settings::Settings;

/// Time in-flight requests get to finish once shutdown starts
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Everything a request handler may touch
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub gate: PolicyGate,
    pub audit: AuditEmitter,
    pub provider: Arc<dyn BucketProvider>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(settings: Settings, store: Arc<Store>, provider: Arc<dyn BucketProvider>) -> Result<Self> {
        let client = backend::http_client(settings.backend_timeout)?;

        Ok(Self {
            gate: PolicyGate::new(client.clone(), &settings.backend_url),
            audit: AuditEmitter::new(client, &settings.backend_url, &settings.user_id),
            store,
            provider,
            settings: Arc::new(settings),
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/system/health", get(handlers::system::health))
        .route("/api/system/version", get(handlers::system::version))
        .route(
            "/api/credentials",
            post(handlers::credentials::set).get(handlers::credentials::list),
        )
        .route("/api/credentials/:profile", delete(handlers::credentials::delete))
        .route("/api/s3/buckets", post(handlers::s3::create_bucket))
        .layer(cors())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _| {
            origin.to_str().map(is_local_origin).unwrap_or(false)
        }))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::ACCEPT, header::AUTHORIZATION, header::CONTENT_TYPE])
        .expose_headers([header::LINK])
        .allow_credentials(true)
        .max_age(Duration::from_secs(300))
}

/// `http://localhost:<port>` or `http://127.0.0.1:<port>`
fn is_local_origin(origin: &str) -> bool {
    let Ok(url) = url::Url::parse(origin) else {
        return false;
    };

    url.scheme() == "http"
        && matches!(url.host_str(), Some("localhost") | Some("127.0.0.1"))
        && origin.rsplit_once(':').is_some_and(|(_, port)| port.parse::<u16>().is_ok())
}

/// Serve until `shutdown` fires, then drain for at most `grace`
///
/// The listener stops accepting as soon as shutdown starts.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
    grace: Duration,
) -> Result<()> {
    let signal = shutdown.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await
    });

    tokio::select! {
        result = &mut server => {
            return result
                .context("HTTP server task failed")?
                .context("HTTP server error");
        }
        _ = shutdown.cancelled() => {}
    }

    tracing::info!("Shutting down HTTP server, draining for up to {:?}", grace);

    match tokio::time::timeout(grace, &mut server).await {
        Ok(result) => result
            .context("HTTP server task failed")?
            .context("HTTP server error"),
        Err(_) => {
            tracing::warn!("Requests still in flight after {:?}, abandoning them", grace);
            server.abort();
            Ok(())
        }
    }
}
