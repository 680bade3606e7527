use clinic_auth::{
    build_router,
    config::{AuthConfig, StoreBackend},
    db,
    services::{LogNotifier, RoleResolver, SessionCleanupWorker},
    store::{MemoryStore, PgStore},
    utils::{Argon2Hasher, SystemClock},
    AppState, Dependencies,
};
use service_core::error::AppError;
use service_core::observability::logging::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = AuthConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;

    clinic_auth::services::metrics::init_metrics();

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        store = ?config.store.backend,
        "Starting clinic authentication service"
    );

    let deps = Dependencies {
        hasher: Arc::new(Argon2Hasher::new(config.hashing.clone())?),
        notifier: Arc::new(LogNotifier),
        clock: Arc::new(SystemClock),
        resolver: Arc::new(RoleResolver::new()),
    };

    let state = match (&config.store.backend, &config.store.database) {
        (StoreBackend::Postgres, Some(database)) => {
            let pool = db::create_pool(database)
                .await
                .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
            db::run_migrations(&pool)
                .await
                .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

            let store = Arc::new(PgStore::new(pool.clone()));
            AppState::new(config.clone(), store, deps, Some(pool))
        }
        (StoreBackend::Postgres, None) => {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_URL is required for the postgres store"
            )));
        }
        (StoreBackend::Memory, _) => {
            tracing::warn!("Using in-memory store; all data is lost on shutdown");
            AppState::new(config.clone(), Arc::new(MemoryStore::new()), deps, None)
        }
    };

    // Refuse to serve on top of a tampered ledger
    let report = state.ledger.ensure_integrity().await?;
    tracing::info!(entries = report.total_entries, "Audit chain verified");

    let cleanup = SessionCleanupWorker::new(
        state.auth.sessions().clone(),
        Duration::from_secs(config.security.session_cleanup_interval_seconds),
    );
    cleanup.start();

    let app = build_router(state);

    let addr = config.common.socket_addr();

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    cleanup.shutdown().await;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
