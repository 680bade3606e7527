//! PostgreSQL pool, schema migrations and the readiness check.

use crate::config::DatabaseConfig;
use serde::Serialize;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Per-connection cap on statement runtime.
const STATEMENT_TIMEOUT: &str = "15s";

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Connecting to PostgreSQL"
    );

    let options = PgConnectOptions::from_str(&config.url)?
        .application_name("clinic-auth")
        .options([("statement_timeout", STATEMENT_TIMEOUT)]);

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .test_before_acquire(true)
        .connect_with(options)
        .await?;

    tracing::info!("PostgreSQL pool ready");
    Ok(pool)
}

/// Apply the embedded schema (accounts, sessions, ledger, reset tokens).
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Schema migrations applied");
    Ok(())
}

/// Result of a readiness check against the store.
#[derive(Debug, Clone, Serialize)]
pub struct StoreHealth {
    pub latency_ms: u128,
    /// Highest ledger sequence, `None` on an empty ledger.
    pub ledger_tail: Option<i64>,
}

/// Round-trip the pool and read the ledger tail in one query.
pub async fn health_check(pool: &PgPool) -> Result<StoreHealth, sqlx::Error> {
    let started = Instant::now();
    let ledger_tail: Option<i64> = sqlx::query_scalar("SELECT MAX(sequence) FROM audit_events")
        .fetch_one(pool)
        .await?;

    Ok(StoreHealth {
        latency_ms: started.elapsed().as_millis(),
        ledger_tail,
    })
}
