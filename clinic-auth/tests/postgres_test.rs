//! Runs the core flows against a real PostgreSQL database.
//!
//! Requires `DATABASE_URL`; run with `cargo test -- --ignored`.

mod common;

use clinic_auth::{
    config::DatabaseConfig,
    db,
    models::{AuditEventType, Profile},
    services::{MockNotifier, RoleResolver, ServiceError},
    store::PgStore,
    utils::{Argon2Hasher, Password, SystemClock},
    AppState, Dependencies,
};
use common::{client, test_config, test_hashing_params, STRONG_PASSWORD};
use std::sync::Arc;
use uuid::Uuid;

async fn pg_state() -> AppState {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = db::create_pool(&DatabaseConfig {
        url,
        max_connections: 5,
        min_connections: 1,
    })
    .await
    .expect("Failed to connect to database");
    db::run_migrations(&pool).await.expect("Failed to migrate");

    AppState::new(
        test_config(Default::default()),
        Arc::new(PgStore::new(pool.clone())),
        Dependencies {
            hasher: Arc::new(Argon2Hasher::new(test_hashing_params()).expect("hasher")),
            notifier: Arc::new(MockNotifier::new()),
            clock: Arc::new(SystemClock),
            resolver: Arc::new(RoleResolver::new()),
        },
        Some(pool),
    )
}

fn unique_email() -> String {
    format!("pg-{}@example.com", Uuid::new_v4())
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_register_login_and_lockout_round_trip() {
    let state = pg_state().await;
    let email = unique_email();

    let registered = state
        .auth
        .register(
            &email,
            Password::new(STRONG_PASSWORD),
            Profile {
                name: "Postgres Patient".to_string(),
                ..Profile::default()
            },
            &client(),
        )
        .await
        .expect("register failed");

    let duplicate = state
        .auth
        .register(
            &email.to_uppercase(),
            Password::new(STRONG_PASSWORD),
            Profile::default(),
            &client(),
        )
        .await;
    assert!(matches!(duplicate, Err(ServiceError::Conflict(_))));

    for _ in 0..2 {
        let _ = state
            .auth
            .login(&email, Password::new("wrong"), &client())
            .await;
    }
    let locked = state
        .auth
        .login(&email, Password::new("wrong"), &client())
        .await;
    assert!(matches!(locked, Err(ServiceError::Locked { .. })));

    let events = state
        .ledger
        .find_by_account(registered.account.account_id, &Default::default())
        .await
        .expect("audit lookup failed");
    assert!(events
        .iter()
        .any(|e| e.event_type == AuditEventType::AccountLocked));
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_ledger_stays_valid_under_concurrent_writers() {
    let state = pg_state().await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            let _ = state
                .auth
                .login(&unique_email(), Password::new("whatever"), &client())
                .await;
        }));
    }
    for handle in handles {
        handle.await.expect("task panicked");
    }

    let report = state.ledger.verify_integrity().await.expect("verify failed");
    assert!(report.is_valid, "broken links: {:?}", report.broken_links);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_sessions_survive_a_round_trip() {
    let state = pg_state().await;
    let email = unique_email();

    let outcome = state
        .auth
        .register(
            &email,
            Password::new(STRONG_PASSWORD),
            Profile::default(),
            &client(),
        )
        .await
        .expect("register failed");

    let auth = state
        .auth
        .validate_session(&outcome.session.token)
        .await
        .expect("session should be valid");
    assert_eq!(auth.principal.account_id, outcome.account.account_id);

    state
        .auth
        .logout(&outcome.session.token, &client())
        .await
        .expect("logout failed");
    assert!(state
        .auth
        .validate_session(&outcome.session.token)
        .await
        .is_err());
}
