//! Session lifecycle: sliding expiry, logout and password-change fan-out.

mod common;

use chrono::Duration;
use clinic_auth::{
    models::{AuditEventType, AuditOutcome, Profile},
    services::{AuthContext, ServiceError},
    utils::Password,
};
use common::{client, start_time, FlakyApp, TestApp, OTHER_STRONG_PASSWORD, STRONG_PASSWORD};

const EMAIL: &str = "bob@example.com";

async fn context(app: &TestApp, token: &str) -> AuthContext {
    app.state
        .auth
        .validate_session(token)
        .await
        .expect("session should be valid")
}

#[tokio::test]
async fn test_validation_slides_the_expiry() {
    let app = TestApp::spawn();
    let token = app.register(EMAIL, STRONG_PASSWORD).await.session.token;

    app.advance(Duration::minutes(20));
    let auth = context(&app, &token).await;
    assert_eq!(
        auth.session.expires_at,
        start_time() + Duration::minutes(50)
    );

    // 40 minutes after issue, but only 20 since the last use
    app.advance(Duration::minutes(20));
    context(&app, &token).await;

    app.advance(Duration::minutes(31));
    assert!(matches!(
        app.state.auth.validate_session(&token).await,
        Err(ServiceError::Unauthorized(_))
    ));
}

#[tokio::test]
async fn test_expiry_is_audited_once_as_a_timeout() {
    let app = TestApp::spawn();
    let token = app.register(EMAIL, STRONG_PASSWORD).await.session.token;

    app.advance(Duration::minutes(31));
    for _ in 0..2 {
        assert!(app.state.auth.validate_session(&token).await.is_err());
    }

    let logouts = app.events_of_type(AuditEventType::Logout).await;
    assert_eq!(logouts.len(), 1);
    assert_eq!(logouts[0].details["reason"], "timeout");
}

#[tokio::test]
async fn test_logout_invalidates_and_audits() {
    let app = TestApp::spawn();
    let token = app.register(EMAIL, STRONG_PASSWORD).await.session.token;

    app.state.auth.logout(&token, &client()).await.unwrap();
    assert!(app.state.auth.validate_session(&token).await.is_err());

    // Second logout of the same token is a no-op
    app.state.auth.logout(&token, &client()).await.unwrap();

    let logouts = app.events_of_type(AuditEventType::Logout).await;
    assert_eq!(logouts.len(), 1);
    assert_eq!(logouts[0].details["reason"], "explicit");
    assert_eq!(logouts[0].outcome, AuditOutcome::Success);
}

#[tokio::test]
async fn test_password_change_ends_every_other_session() {
    let app = TestApp::spawn();
    let current = app.register(EMAIL, STRONG_PASSWORD).await.session.token;
    let laptop = app.login(EMAIL, STRONG_PASSWORD).await;
    let phone = app.login(EMAIL, STRONG_PASSWORD).await;

    let auth = context(&app, &current).await;
    app.state
        .auth
        .change_password(
            &auth,
            Password::new(STRONG_PASSWORD),
            Password::new(OTHER_STRONG_PASSWORD),
            &client(),
        )
        .await
        .expect("password change failed");

    context(&app, &current).await;
    assert!(app.state.auth.validate_session(&laptop).await.is_err());
    assert!(app.state.auth.validate_session(&phone).await.is_err());

    let changed = app.events_of_type(AuditEventType::PasswordChanged).await;
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].details["sessions_invalidated"], 2);
    assert_eq!(changed[0].details["reason"], "password_change");
    assert!(app.events_of_type(AuditEventType::Logout).await.is_empty());

    assert!(app
        .state
        .auth
        .login(EMAIL, Password::new(STRONG_PASSWORD), &client())
        .await
        .is_err());
    app.login(EMAIL, OTHER_STRONG_PASSWORD).await;
}

#[tokio::test]
async fn test_password_change_requires_the_current_password() {
    let app = TestApp::spawn();
    let token = app.register(EMAIL, STRONG_PASSWORD).await.session.token;
    let auth = context(&app, &token).await;

    let result = app
        .state
        .auth
        .change_password(
            &auth,
            Password::new("Wr0ng!Guess"),
            Password::new(OTHER_STRONG_PASSWORD),
            &client(),
        )
        .await;
    assert!(matches!(result, Err(ServiceError::InvalidCredentials)));

    let changed = app.events_of_type(AuditEventType::PasswordChanged).await;
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].outcome, AuditOutcome::Failure);
}

#[tokio::test]
async fn test_password_change_rejects_reuse_and_weak_passwords() {
    let app = TestApp::spawn();
    let token = app.register(EMAIL, STRONG_PASSWORD).await.session.token;
    let auth = context(&app, &token).await;

    let reuse = app
        .state
        .auth
        .change_password(
            &auth,
            Password::new(STRONG_PASSWORD),
            Password::new(STRONG_PASSWORD),
            &client(),
        )
        .await;
    assert!(matches!(reuse, Err(ServiceError::Validation(_))));

    let weak = app
        .state
        .auth
        .change_password(
            &auth,
            Password::new(STRONG_PASSWORD),
            Password::new("short"),
            &client(),
        )
        .await;
    match weak {
        Err(ServiceError::WeakPassword(reasons)) => assert!(reasons.len() >= 3),
        other => panic!("expected weak password, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cleanup_removes_dead_sessions_only() {
    let app = TestApp::spawn();
    let stale = app.register(EMAIL, STRONG_PASSWORD).await.session.token;

    app.advance(Duration::minutes(31));
    let fresh = app.login(EMAIL, STRONG_PASSWORD).await;

    let removed = app.state.auth.sessions().cleanup_expired().await.unwrap();
    assert_eq!(removed, 1);

    assert!(app.state.auth.validate_session(&stale).await.is_err());
    context(&app, &fresh).await;
}

#[tokio::test]
async fn test_active_sessions_are_listed_per_account() {
    let app = TestApp::spawn();
    let outcome = app.register(EMAIL, STRONG_PASSWORD).await;
    app.login(EMAIL, STRONG_PASSWORD).await;
    app.register("carol@example.com", STRONG_PASSWORD).await;

    let sessions = app
        .state
        .auth
        .sessions()
        .list_active(outcome.account.account_id)
        .await
        .unwrap();
    assert_eq!(sessions.len(), 2);
    assert!(sessions
        .iter()
        .all(|s| s.account_id == outcome.account.account_id));
}

#[tokio::test]
async fn test_logout_is_undone_when_it_cannot_be_audited() {
    let app = FlakyApp::spawn();
    let token = app.register(EMAIL, STRONG_PASSWORD).await.session.token;

    app.audit.fail_writes(true);
    let result = app.auth.logout(&token, &client()).await;
    assert!(matches!(result, Err(ServiceError::AuditWrite(_))));
    app.audit.fail_writes(false);

    app.auth
        .validate_session(&token)
        .await
        .expect("session should still be live");

    app.auth.logout(&token, &client()).await.unwrap();
    let logouts = app.events_of_type(AuditEventType::Logout).await;
    assert_eq!(logouts.len(), 1);
    assert_eq!(logouts[0].details["reason"], "explicit");
}

#[tokio::test]
async fn test_timeout_is_recorded_on_the_next_check_after_an_audit_failure() {
    let app = FlakyApp::spawn();
    let token = app.register(EMAIL, STRONG_PASSWORD).await.session.token;
    app.clock.advance(Duration::minutes(31));

    app.audit.fail_writes(true);
    assert!(matches!(
        app.auth.validate_session(&token).await,
        Err(ServiceError::AuditWrite(_))
    ));
    app.audit.fail_writes(false);

    assert!(matches!(
        app.auth.validate_session(&token).await,
        Err(ServiceError::Unauthorized(_))
    ));
    let logouts = app.events_of_type(AuditEventType::Logout).await;
    assert_eq!(logouts.len(), 1);
    assert_eq!(logouts[0].details["reason"], "timeout");
}

#[tokio::test]
async fn test_password_change_is_undone_when_it_cannot_be_audited() {
    let app = FlakyApp::spawn();
    let current = app.register(EMAIL, STRONG_PASSWORD).await.session.token;
    let laptop = app
        .auth
        .login(EMAIL, Password::new(STRONG_PASSWORD), &client())
        .await
        .unwrap()
        .session
        .token;
    let auth = app.auth.validate_session(&current).await.unwrap();

    app.audit.fail_writes(true);
    let result = app
        .auth
        .change_password(
            &auth,
            Password::new(STRONG_PASSWORD),
            Password::new(OTHER_STRONG_PASSWORD),
            &client(),
        )
        .await;
    assert!(matches!(result, Err(ServiceError::AuditWrite(_))));
    app.audit.fail_writes(false);

    app.auth
        .validate_session(&laptop)
        .await
        .expect("other session should be restored");
    app.auth
        .login(EMAIL, Password::new(STRONG_PASSWORD), &client())
        .await
        .expect("old password should still work");
    assert!(app
        .events_of_type(AuditEventType::PasswordChanged)
        .await
        .is_empty());
}

#[tokio::test]
async fn test_password_change_completes_after_the_caller_goes_away() {
    let app = TestApp::spawn();
    let current = app.register(EMAIL, STRONG_PASSWORD).await.session.token;
    let laptop = app.login(EMAIL, STRONG_PASSWORD).await;
    let auth = context(&app, &current).await;

    // Poll the change once, then drop it
    let client_info = client();
    let change = app.state.auth.change_password(
        &auth,
        Password::new(STRONG_PASSWORD),
        Password::new(OTHER_STRONG_PASSWORD),
        &client_info,
    );
    let _ = tokio::time::timeout(std::time::Duration::ZERO, change).await;

    let mut changed = Vec::new();
    for _ in 0..500 {
        changed = app.events_of_type(AuditEventType::PasswordChanged).await;
        if !changed.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].outcome, AuditOutcome::Success);

    assert!(app.state.auth.validate_session(&laptop).await.is_err());
    app.login(EMAIL, OTHER_STRONG_PASSWORD).await;
}

#[tokio::test]
async fn test_profile_update_is_undone_when_it_cannot_be_audited() {
    let app = FlakyApp::spawn();
    let token = app.register(EMAIL, STRONG_PASSWORD).await.session.token;
    let auth = app.auth.validate_session(&token).await.unwrap();

    app.audit.fail_writes(true);
    let result = app
        .auth
        .update_profile(
            &auth,
            Profile {
                name: "Renamed".to_string(),
                ..Profile::default()
            },
            &client(),
        )
        .await;
    assert!(matches!(result, Err(ServiceError::AuditWrite(_))));

    assert_eq!(app.account(EMAIL).await.profile, Profile::default());
}
