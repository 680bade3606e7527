//! Login state machine: credentials, lockout, lazy unlock and fail-closed auditing.

mod common;

use chrono::Duration;
use clinic_auth::{
    config::SecurityConfig,
    models::{AuditEventType, AuditOutcome, Profile},
    services::{LockoutPolicy, ServiceError},
    store::SessionStore,
    utils::Password,
};
use common::{client, start_time, FlakyApp, TestApp, OTHER_STRONG_PASSWORD, STRONG_PASSWORD};
use std::collections::BTreeSet;
use tokio::task::JoinSet;

const EMAIL: &str = "alice@example.com";

async fn attempt(app: &TestApp, password: &str) -> Result<(), ServiceError> {
    app.state
        .auth
        .login(EMAIL, Password::new(password), &client())
        .await
        .map(|_| ())
}

#[tokio::test]
async fn test_successful_login_resets_the_failure_counter() {
    let app = TestApp::spawn();
    app.register(EMAIL, STRONG_PASSWORD).await;

    assert!(matches!(
        attempt(&app, "wrong").await,
        Err(ServiceError::InvalidCredentials)
    ));
    attempt(&app, STRONG_PASSWORD).await.expect("login failed");

    let account = app
        .state
        .auth
        .accounts()
        .find_by_email(EMAIL)
        .await
        .unwrap()
        .expect("account");
    assert_eq!(account.failed_login_attempts, 0);

    let successes = app.events_of_type(AuditEventType::LoginSuccess).await;
    // registration logs in once, then the explicit login
    assert_eq!(successes.len(), 2);
    assert_eq!(successes[1].account_id, Some(account.account_id));
}

#[tokio::test]
async fn test_email_lookup_is_case_insensitive() {
    let app = TestApp::spawn();
    app.register("Alice@Example.com", STRONG_PASSWORD).await;

    app.state
        .auth
        .login("  ALICE@example.COM ", Password::new(STRONG_PASSWORD), &client())
        .await
        .expect("login failed");
}

#[tokio::test]
async fn test_third_failure_locks_the_account() {
    let app = TestApp::spawn();
    app.register(EMAIL, STRONG_PASSWORD).await;

    for _ in 0..2 {
        assert!(matches!(
            attempt(&app, "wrong").await,
            Err(ServiceError::InvalidCredentials)
        ));
    }

    let expected_until = start_time() + Duration::minutes(15);
    match attempt(&app, "wrong").await {
        Err(ServiceError::Locked { until }) => assert_eq!(until, expected_until),
        other => panic!("expected lock, got {:?}", other.err()),
    }

    let locks = app.events_of_type(AuditEventType::AccountLocked).await;
    assert_eq!(locks.len(), 1);
    assert_eq!(locks[0].details["failed_attempts"], 3);

    let failures = app.events_of_type(AuditEventType::LoginFailure).await;
    assert_eq!(failures.len(), 3);
    assert!(failures
        .iter()
        .all(|e| e.outcome == AuditOutcome::Failure && e.details["reason"] == "invalid_password"));
}

#[tokio::test]
async fn test_locked_account_refuses_without_checking_the_password() {
    let app = TestApp::spawn();
    app.register(EMAIL, STRONG_PASSWORD).await;
    for _ in 0..3 {
        let _ = attempt(&app, "wrong").await;
    }

    let verifications = app.hasher.verifications();
    app.advance(Duration::minutes(5));

    // Even the right password is refused while locked
    assert!(matches!(
        attempt(&app, STRONG_PASSWORD).await,
        Err(ServiceError::Locked { .. })
    ));
    assert_eq!(app.hasher.verifications(), verifications);

    let account = app
        .state
        .auth
        .accounts()
        .find_by_email(EMAIL)
        .await
        .unwrap()
        .expect("account");
    assert_eq!(account.failed_login_attempts, 3);

    let last_failure = app
        .events_of_type(AuditEventType::LoginFailure)
        .await
        .pop()
        .expect("failure event");
    assert_eq!(last_failure.details["reason"], "account_locked");
}

#[tokio::test]
async fn test_lock_lifts_once_the_duration_passes() {
    let app = TestApp::spawn();
    app.register(EMAIL, STRONG_PASSWORD).await;
    for _ in 0..3 {
        let _ = attempt(&app, "wrong").await;
    }

    app.advance(Duration::minutes(14));
    assert!(app.state.auth.locked_until(EMAIL).await.unwrap().is_some());

    app.advance(Duration::minutes(1));
    assert!(app.state.auth.locked_until(EMAIL).await.unwrap().is_none());

    attempt(&app, STRONG_PASSWORD)
        .await
        .expect("login after lapse failed");

    let account = app
        .state
        .auth
        .accounts()
        .find_by_email(EMAIL)
        .await
        .unwrap()
        .expect("account");
    assert_eq!(account.failed_login_attempts, 0);
    assert!(account.locked_until.is_none());
}

#[tokio::test]
async fn test_failures_after_a_lapsed_lock_count_from_one() {
    let app = TestApp::spawn();
    app.register(EMAIL, STRONG_PASSWORD).await;
    for _ in 0..3 {
        let _ = attempt(&app, "wrong").await;
    }
    app.advance(Duration::minutes(16));

    assert!(matches!(
        attempt(&app, "wrong").await,
        Err(ServiceError::InvalidCredentials)
    ));
    let failure = app
        .events_of_type(AuditEventType::LoginFailure)
        .await
        .pop()
        .expect("failure event");
    assert_eq!(failure.details["failed_attempts"], 1);
}

#[tokio::test]
async fn test_lockout_threshold_and_duration_are_configurable() {
    let app = TestApp::with_security(SecurityConfig {
        lockout_threshold: 5,
        lockout_duration_minutes: 60,
        ..SecurityConfig::default()
    });
    app.register(EMAIL, STRONG_PASSWORD).await;

    for _ in 0..4 {
        assert!(matches!(
            attempt(&app, "wrong").await,
            Err(ServiceError::InvalidCredentials)
        ));
    }
    match attempt(&app, "wrong").await {
        Err(ServiceError::Locked { until }) => {
            assert_eq!(until, start_time() + Duration::minutes(60))
        }
        other => panic!("expected lock, got {:?}", other.err()),
    }
}

#[tokio::test]
async fn test_unknown_email_burns_a_dummy_verification() {
    let app = TestApp::spawn();

    let result = app
        .state
        .auth
        .login("ghost@example.com", Password::new(STRONG_PASSWORD), &client())
        .await;
    assert!(matches!(result, Err(ServiceError::InvalidCredentials)));
    assert_eq!(app.hasher.dummy_verifications(), 1);

    let failures = app.events_of_type(AuditEventType::LoginFailure).await;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].account_id, None);
    assert_eq!(failures[0].details["reason"], "user_not_found");
}

#[tokio::test]
async fn test_wrong_password_and_unknown_email_look_the_same() {
    let app = TestApp::spawn();
    app.register(EMAIL, STRONG_PASSWORD).await;

    let wrong = attempt(&app, OTHER_STRONG_PASSWORD).await.unwrap_err();
    let unknown = app
        .state
        .auth
        .login("ghost@example.com", Password::new(OTHER_STRONG_PASSWORD), &client())
        .await
        .unwrap_err();
    assert_eq!(wrong.to_string(), unknown.to_string());
}

/// Fire `n` wrong-password logins at once and collect their results.
async fn concurrent_failures(app: &TestApp, n: usize) -> Vec<Result<(), ServiceError>> {
    let mut attempts = JoinSet::new();
    for _ in 0..n {
        let auth = app.state.auth.clone();
        attempts.spawn(async move {
            auth.login(EMAIL, Password::new("wrong"), &client())
                .await
                .map(|_| ())
        });
    }

    let mut results = Vec::with_capacity(n);
    while let Some(joined) = attempts.join_next().await {
        results.push(joined.expect("login task panicked"));
    }
    results
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failures_up_to_the_threshold_count_exactly() {
    let app = TestApp::with_security(SecurityConfig {
        lockout_threshold: 5,
        ..SecurityConfig::default()
    });
    app.register(EMAIL, STRONG_PASSWORD).await;

    let results = concurrent_failures(&app, 5).await;

    let locked = results
        .iter()
        .filter(|r| matches!(r, Err(ServiceError::Locked { .. })))
        .count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(ServiceError::InvalidCredentials)))
        .count();
    assert_eq!((locked, rejected), (1, 4));

    let account = app
        .state
        .auth
        .accounts()
        .find_by_email(EMAIL)
        .await
        .unwrap()
        .expect("account");
    assert_eq!(account.failed_login_attempts, 5);
    assert!(account.locked_until.is_some());

    let locks = app.events_of_type(AuditEventType::AccountLocked).await;
    assert_eq!(locks.len(), 1);
    assert_eq!(locks[0].details["failed_attempts"], 5);

    // Every increment was seen by exactly one attempt
    let counts: BTreeSet<i64> = app
        .events_of_type(AuditEventType::LoginFailure)
        .await
        .iter()
        .filter_map(|e| e.details["failed_attempts"].as_i64())
        .collect();
    assert_eq!(counts, (1..=5).collect::<BTreeSet<i64>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failures_past_the_threshold_stay_consistent() {
    const ATTEMPTS: usize = 12;
    let app = TestApp::spawn();
    app.register(EMAIL, STRONG_PASSWORD).await;

    let results = concurrent_failures(&app, ATTEMPTS).await;

    // Only the first two counted failures are answered without a lock
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(ServiceError::InvalidCredentials)))
        .count();
    assert_eq!(rejected, 2);
    assert!(results
        .iter()
        .all(|r| matches!(r, Err(ServiceError::InvalidCredentials | ServiceError::Locked { .. }))));

    let account = app
        .state
        .auth
        .accounts()
        .find_by_email(EMAIL)
        .await
        .unwrap()
        .expect("account");
    let counted = account.failed_login_attempts as usize;
    assert!((3..=ATTEMPTS).contains(&counted));

    let failures = app.events_of_type(AuditEventType::LoginFailure).await;
    let invalid: BTreeSet<i64> = failures
        .iter()
        .filter(|e| e.details["reason"] == "invalid_password")
        .filter_map(|e| e.details["failed_attempts"].as_i64())
        .collect();
    assert_eq!(invalid, (1..=counted as i64).collect::<BTreeSet<i64>>());

    let refused = failures
        .iter()
        .filter(|e| e.details["reason"] == "account_locked")
        .count();
    assert_eq!(refused, ATTEMPTS - counted);

    // Each counted failure at or past the threshold locked (or re-locked)
    let locks = app.events_of_type(AuditEventType::AccountLocked).await;
    assert_eq!(locks.len(), counted - 2);
}

#[tokio::test]
async fn test_registration_is_removed_when_it_cannot_be_audited() {
    let app = FlakyApp::spawn();

    app.audit.fail_writes(true);
    let result = app
        .auth
        .register(EMAIL, Password::new(STRONG_PASSWORD), Profile::default(), &client())
        .await;
    assert!(matches!(result, Err(ServiceError::AuditWrite(_))));
    assert!(app.accounts.find_by_email(EMAIL).await.unwrap().is_none());

    // A retry is a fresh registration, not a conflict
    app.audit.fail_writes(false);
    let outcome = app.register(EMAIL, STRONG_PASSWORD).await;

    let created = app.events_of_type(AuditEventType::AccountCreated).await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].account_id, Some(outcome.account.account_id));
}

#[tokio::test]
async fn test_failure_is_not_counted_when_it_cannot_be_audited() {
    let app = FlakyApp::spawn();
    app.register(EMAIL, STRONG_PASSWORD).await;

    app.audit.fail_writes(true);
    let result = app.auth.login(EMAIL, Password::new("wrong"), &client()).await;
    assert!(matches!(result, Err(ServiceError::AuditWrite(_))));
    assert_eq!(app.account(EMAIL).await.failed_login_attempts, 0);

    app.audit.fail_writes(false);
    let result = app.auth.login(EMAIL, Password::new("wrong"), &client()).await;
    assert!(matches!(result, Err(ServiceError::InvalidCredentials)));

    let failures = app.events_of_type(AuditEventType::LoginFailure).await;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].details["failed_attempts"], 1);
}

#[tokio::test]
async fn test_lock_and_its_failure_are_rolled_back_when_unaudited() {
    let app = FlakyApp::spawn();
    app.register(EMAIL, STRONG_PASSWORD).await;

    for _ in 0..2 {
        let _ = app.auth.login(EMAIL, Password::new("wrong"), &client()).await;
    }

    app.audit.fail_writes(true);
    let result = app.auth.login(EMAIL, Password::new("wrong"), &client()).await;
    assert!(matches!(result, Err(ServiceError::AuditWrite(_))));

    let account = app.account(EMAIL).await;
    assert!(account.locked_until.is_none());
    assert_eq!(account.failed_login_attempts, 2);

    // The next audited failure is the one that locks
    app.audit.fail_writes(false);
    let result = app.auth.login(EMAIL, Password::new("wrong"), &client()).await;
    assert!(matches!(result, Err(ServiceError::Locked { .. })));

    let locks = app.events_of_type(AuditEventType::AccountLocked).await;
    assert_eq!(locks.len(), 1);
    assert_eq!(locks[0].details["failed_attempts"], 3);
}

#[tokio::test]
async fn test_audited_lock_survives_a_lost_failure_record() {
    let app = FlakyApp::with_policy(LockoutPolicy {
        threshold: 1,
        ..LockoutPolicy::default()
    });
    app.register(EMAIL, STRONG_PASSWORD).await;

    // account_locked is written, the login_failure after it is not
    app.audit.fail_after(1);
    let result = app.auth.login(EMAIL, Password::new("wrong"), &client()).await;
    assert!(matches!(result, Err(ServiceError::AuditWrite(_))));

    let account = app.account(EMAIL).await;
    assert!(account.locked_until.is_some());
    assert_eq!(account.failed_login_attempts, 1);

    let locks = app.events_of_type(AuditEventType::AccountLocked).await;
    assert_eq!(locks.len(), 1);
    assert_eq!(locks[0].details["failed_attempts"], 1);
}

#[tokio::test]
async fn test_session_is_discarded_when_login_cannot_be_audited() {
    let app = FlakyApp::spawn();
    let registered = app.register(EMAIL, STRONG_PASSWORD).await;
    app.auth
        .logout(&registered.session.token, &client())
        .await
        .unwrap();

    app.audit.fail_writes(true);
    let result = app
        .auth
        .login(EMAIL, Password::new(STRONG_PASSWORD), &client())
        .await;
    assert!(matches!(result, Err(ServiceError::AuditWrite(_))));

    let active = app
        .store
        .list_active_sessions(registered.account.account_id, start_time())
        .await
        .unwrap();
    assert!(active.is_empty());
}
