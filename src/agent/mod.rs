// The background agent
//
// One agent runs per data directory, guarded by a PID lock file. It keeps
// credentials in an embedded store and serves them to the CLI over a
// loopback HTTP API, asking the policy service before gated operations and
// reporting their outcome to the audit service.

pub mod daemon;
pub mod error;
mod handlers;
pub mod lockfile;
pub mod server;
pub mod store;

pub use daemon::Launcher;
pub use error::ApiError;
pub use handlers::credentials::ProfileSummary;
pub use lockfile::{LockError, LockFile};
pub use server::{AppState, SHUTDOWN_GRACE};
pub use store::{CacheEntry, Credential, Namespace, Store, StoreError};

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::aws::{BucketProvider, S3Provider};
use crate::config;
use crate::platform;
use crate::settings::Settings;

/// How long queued audit entries may hold up exit
pub const AUDIT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Printed when startup finds another agent holding the lock
pub const STATUS_HINT: &str = "Use 'ark agent status' to check agent status.";

/// Run the agent until SIGINT or SIGTERM
pub async fn run(settings: Settings) -> Result<()> {
    let provider = Arc::new(S3Provider::new(settings.s3_endpoint.as_deref())?);

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    run_until(settings, provider, shutdown).await
}

/// Run the agent until `shutdown` is cancelled
///
/// The lock is held for the whole run and released only after the HTTP
/// server has stopped. Lock contention surfaces as [`LockError`].
pub async fn run_until(
    settings: Settings,
    provider: Arc<dyn BucketProvider>,
    shutdown: CancellationToken,
) -> Result<()> {
    platform::ensure_private_directory(&settings.data_dir)?;

    let lock = LockFile::new(config::lock_path(&settings.data_dir));
    lock.acquire()?;
    tracing::info!("Acquired {} for PID {}", lock.path().display(), lock.pid());

    let result = serve_locked(settings, provider, shutdown).await;

    match lock.release() {
        Ok(()) => tracing::info!("Released {}", lock.path().display()),
        Err(e) => tracing::warn!("Failed to release lock: {}", e),
    }

    result
}

async fn serve_locked(
    settings: Settings,
    provider: Arc<dyn BucketProvider>,
    shutdown: CancellationToken,
) -> Result<()> {
    let db_path = config::db_path(&settings.data_dir);
    let store = Store::open(&db_path)
        .with_context(|| format!("Failed to open store: {}", db_path.display()))?;

    let addr = settings.resolve_bind_addr().await?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!(
        "Agent {} listening on http://{} (backend {})",
        settings.build.version,
        listener.local_addr().context("Failed to read listener address")?,
        settings.backend_url
    );

    let state = AppState::new(settings, Arc::new(store), provider)?;
    let audit = state.audit.clone();

    server::serve(listener, server::router(state), shutdown, SHUTDOWN_GRACE).await?;

    if audit.pending() > 0 {
        tracing::info!("Flushing {} pending audit entries", audit.pending());
    }
    audit.shutdown(AUDIT_FLUSH_TIMEOUT).await;

    tracing::info!("Agent stopped");
    Ok(())
}

async fn shutdown_on_signal(shutdown: CancellationToken) {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => tracing::info!("Received interrupt, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
        _ = shutdown.cancelled() => return,
    }

    shutdown.cancel();
}
