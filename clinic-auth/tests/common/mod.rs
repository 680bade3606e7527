//! Shared harness for clinic-auth integration tests.
//!
//! Everything runs in process: an in-memory store, a manual clock and a
//! cheap Argon2 configuration.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use clinic_auth::{
    build_router,
    config::{AuthConfig, Environment, SecurityConfig, StoreBackend, StoreConfig},
    models::{Account, AuditEvent, AuditEventType, ClientContext, Profile, Role},
    services::{
        AccountService, AdminService, AuditLedger, AuthService, LockoutPolicy, LoginOutcome,
        MockNotifier, RoleResolver, SessionManager,
    },
    store::{AuditQuery, AuditStore, MemoryStore, StoreError},
    utils::{
        Argon2Hasher, CredentialHasher, HashingParams, ManualClock, Password, PasswordHashString,
    },
    AppState, Dependencies,
};
use http_body_util::BodyExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

pub const STRONG_PASSWORD: &str = "Str0ng!Pass";
pub const OTHER_STRONG_PASSWORD: &str = "N3w!Passw0rd";

pub fn test_hashing_params() -> HashingParams {
    HashingParams {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    }
}

pub fn test_config(security: SecurityConfig) -> AuthConfig {
    AuthConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "clinic-auth-test".to_string(),
        service_version: "test".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        store: StoreConfig {
            backend: StoreBackend::Memory,
            database: None,
        },
        security,
        hashing: test_hashing_params(),
    }
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0)
        .single()
        .expect("valid start time")
}

pub fn client() -> ClientContext {
    ClientContext::new("203.0.113.10", "integration-test")
}

/// Counts every credential check so tests can prove the hasher was skipped.
pub struct CountingHasher {
    inner: Argon2Hasher,
    verifications: AtomicUsize,
    dummy_verifications: AtomicUsize,
}

impl CountingHasher {
    pub fn new() -> Self {
        Self {
            inner: Argon2Hasher::new(test_hashing_params()).expect("Failed to build hasher"),
            verifications: AtomicUsize::new(0),
            dummy_verifications: AtomicUsize::new(0),
        }
    }

    pub fn verifications(&self) -> usize {
        self.verifications.load(Ordering::SeqCst)
    }

    pub fn dummy_verifications(&self) -> usize {
        self.dummy_verifications.load(Ordering::SeqCst)
    }
}

impl CredentialHasher for CountingHasher {
    fn hash(&self, password: &Password) -> Result<PasswordHashString, anyhow::Error> {
        self.inner.hash(password)
    }

    fn verify(&self, password: &Password, password_hash: &PasswordHashString) -> bool {
        self.verifications.fetch_add(1, Ordering::SeqCst);
        self.inner.verify(password, password_hash)
    }

    fn verify_dummy(&self, password: &Password) {
        self.dummy_verifications.fetch_add(1, Ordering::SeqCst);
        self.inner.verify_dummy(password)
    }
}

/// Audit store that can be told to reject writes, for fail-closed tests.
pub struct FlakyAuditStore {
    inner: Arc<MemoryStore>,
    /// Writes still accepted; `usize::MAX` means no limit.
    budget: AtomicUsize,
}

impl FlakyAuditStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            budget: AtomicUsize::new(usize::MAX),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        let budget = if fail { 0 } else { usize::MAX };
        self.budget.store(budget, Ordering::SeqCst);
    }

    /// Accept `writes` more audit records, then reject the rest.
    pub fn fail_after(&self, writes: usize) {
        self.budget.store(writes, Ordering::SeqCst);
    }

    fn take_write(&self) -> bool {
        self.budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                usize::MAX => Some(usize::MAX),
                left => Some(left - 1),
            })
            .is_ok()
    }
}

#[async_trait]
impl AuditStore for FlakyAuditStore {
    async fn last_audit_event(&self) -> Result<Option<AuditEvent>, StoreError> {
        self.inner.last_audit_event().await
    }

    async fn insert_audit_event(&self, event: &AuditEvent) -> Result<(), StoreError> {
        if !self.take_write() {
            return Err(StoreError::Backend(anyhow::anyhow!("audit storage offline")));
        }
        self.inner.insert_audit_event(event).await
    }

    async fn find_audit_by_account(
        &self,
        account_id: Uuid,
        query: &AuditQuery,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        self.inner.find_audit_by_account(account_id, query).await
    }

    async fn find_audit_by_type(
        &self,
        event_type: AuditEventType,
        query: &AuditQuery,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        self.inner.find_audit_by_type(event_type, query).await
    }

    async fn scan_audit(
        &self,
        after_sequence: i64,
        limit: i64,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        self.inner.scan_audit(after_sequence, limit).await
    }
}

/// Services wired by hand onto a [`FlakyAuditStore`], so tests can make the
/// ledger refuse writes and check that nothing unaudited is left behind.
pub struct FlakyApp {
    pub auth: AuthService,
    pub admin: AdminService,
    pub accounts: AccountService,
    pub audit: Arc<FlakyAuditStore>,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<MockNotifier>,
}

impl FlakyApp {
    pub fn spawn() -> Self {
        Self::with_policy(LockoutPolicy::default())
    }

    pub fn with_policy(policy: LockoutPolicy) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let audit = Arc::new(FlakyAuditStore::new(store.clone()));
        let notifier = Arc::new(MockNotifier::new());

        let ledger = AuditLedger::new(audit.clone(), clock.clone());
        let accounts = AccountService::new(store.clone(), clock.clone(), policy);
        let sessions = SessionManager::new(
            store.clone(),
            ledger.clone(),
            clock.clone(),
            Duration::minutes(30),
        );
        let auth = AuthService::new(
            accounts.clone(),
            sessions.clone(),
            ledger.clone(),
            store.clone(),
            Arc::new(CountingHasher::new()),
            notifier.clone(),
            clock.clone(),
            Duration::minutes(60),
        );
        let admin = AdminService::new(accounts.clone(), sessions, ledger);

        Self {
            auth,
            admin,
            accounts,
            audit,
            store,
            clock,
            notifier,
        }
    }

    pub async fn register(&self, email: &str, password: &str) -> LoginOutcome {
        self.auth
            .register(email, Password::new(password), Profile::default(), &client())
            .await
            .expect("Failed to register account")
    }

    pub async fn account(&self, email: &str) -> Account {
        self.accounts
            .find_by_email(email)
            .await
            .expect("Account lookup failed")
            .expect("Account missing")
    }

    pub async fn audit_trail(&self) -> Vec<AuditEvent> {
        self.store
            .scan_audit(0, i64::MAX)
            .await
            .expect("Failed to scan audit ledger")
    }

    pub async fn events_of_type(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.audit_trail()
            .await
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }
}

/// Fully wired application over in-process collaborators.
pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub hasher: Arc<CountingHasher>,
    pub notifier: Arc<MockNotifier>,
    pub resolver: Arc<RoleResolver>,
}

impl TestApp {
    /// Must be called inside a Tokio runtime.
    pub fn spawn() -> Self {
        Self::with_security(SecurityConfig::default())
    }

    pub fn with_security(security: SecurityConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let hasher = Arc::new(CountingHasher::new());
        let notifier = Arc::new(MockNotifier::new());
        let resolver = Arc::new(RoleResolver::new());

        let state = AppState::new(
            test_config(security),
            store.clone(),
            Dependencies {
                hasher: hasher.clone(),
                notifier: notifier.clone(),
                clock: clock.clone(),
                resolver: resolver.clone(),
            },
            None,
        );

        Self {
            state,
            store,
            clock,
            hasher,
            notifier,
            resolver,
        }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    pub async fn register(&self, email: &str, password: &str) -> LoginOutcome {
        self.state
            .auth
            .register(
                email,
                Password::new(password),
                Profile {
                    name: "Test Patient".to_string(),
                    ..Profile::default()
                },
                &client(),
            )
            .await
            .expect("Failed to register account")
    }

    /// Registered account promoted straight through the store.
    pub async fn account_with_role(&self, email: &str, role: Role) -> Account {
        let outcome = self.register(email, STRONG_PASSWORD).await;
        self.state
            .auth
            .accounts()
            .update_role(outcome.account.account_id, role)
            .await
            .expect("Failed to set role");
        self.state
            .auth
            .accounts()
            .get(outcome.account.account_id)
            .await
            .expect("Account vanished")
    }

    /// Fresh session token for an already registered account.
    pub async fn login(&self, email: &str, password: &str) -> String {
        self.state
            .auth
            .login(email, Password::new(password), &client())
            .await
            .expect("Failed to log in")
            .session
            .token
    }

    /// Every ledger row in sequence order.
    pub async fn audit_trail(&self) -> Vec<AuditEvent> {
        self.store
            .scan_audit(0, i64::MAX)
            .await
            .expect("Failed to scan audit ledger")
    }

    pub async fn events_of_type(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.audit_trail()
            .await
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }
}

/// Send one request through the router and decode the JSON body (Null when empty).
pub async fn send(
    router: &Router,
    request: Request<Body>,
) -> (StatusCode, axum::http::HeaderMap, serde_json::Value) {
    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("Failed to execute request");

    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();

    let body = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };

    (status, headers, body)
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::USER_AGENT, "integration-test")
        .body(Body::from(body.to_string()))
        .expect("Failed to build request")
}

pub fn authed_request(
    method: &str,
    uri: &str,
    token: &str,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::USER_AGENT, "integration-test");

    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("Failed to build request")
}
