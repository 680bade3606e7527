pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Json, Router,
};
use chrono::Duration;
use service_core::error::AppError;
use service_core::middleware::{
    security_headers::security_headers_middleware, tracing::request_id_middleware,
};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{openapi::security::SecurityScheme, Modify, OpenApi};

use crate::config::AuthConfig;
use crate::services::{
    AccessGate, AccountService, AdminService, AuditLedger, AuthService, LockoutPolicy,
    ResetNotifier, RoleResolver, SessionManager,
};
use crate::store::{AccountStore, AuditStore, ResetTokenStore, SessionStore};
use crate::utils::{Clock, CredentialHasher};

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::metrics::metrics,
        handlers::auth::registration::register,
        handlers::auth::session::login,
        handlers::auth::session::logout,
        handlers::auth::password::request_password_reset,
        handlers::auth::password::confirm_password_reset,
        handlers::user::get_me,
        handlers::user::update_me,
        handlers::user::change_password,
        handlers::user::list_sessions,
        handlers::admin::accounts::set_role,
        handlers::admin::accounts::unlock_account,
        handlers::admin::accounts::revoke_sessions,
        handlers::audit::events_for_account,
        handlers::audit::events_by_type,
        handlers::audit::verify_integrity,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::MessageResponse,
            dtos::auth::RegisterRequest,
            dtos::auth::LoginRequest,
            dtos::auth::SessionResponse,
            dtos::auth::ChangePasswordRequest,
            dtos::auth::PasswordResetRequest,
            dtos::auth::PasswordResetConfirm,
            dtos::auth::UpdateProfileRequest,
            dtos::admin::SetRoleRequest,
            dtos::admin::RevokeSessionsResponse,
            dtos::admin::AuditEventsResponse,
            models::AccountResponse,
            models::Profile,
            models::PostalAddress,
            models::Role,
            models::SessionInfo,
            models::AuditEvent,
            models::AuditEventType,
            models::AuditOutcome,
            services::IntegrityReport,
            services::BrokenLink,
            services::BreakKind,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication", description = "Registration, login and password reset"),
        (name = "User", description = "Profile and session management for the session holder"),
        (name = "Admin", description = "Role assignment, unlocks and session revocation"),
        (name = "Audit", description = "Hash-chained audit ledger queries and verification"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .build(),
                ),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: AuthConfig,
    pub auth: AuthService,
    pub admin: AdminService,
    pub gate: AccessGate,
    pub ledger: AuditLedger,
    pub pool: Option<PgPool>,
}

/// Collaborators chosen by the binary and replaced in tests.
pub struct Dependencies {
    pub hasher: Arc<dyn CredentialHasher>,
    pub notifier: Arc<dyn ResetNotifier>,
    pub clock: Arc<dyn Clock>,
    pub resolver: Arc<RoleResolver>,
}

impl AppState {
    /// Wire every service onto one backing store. Starts the audit
    /// sequencer, so it must run inside a Tokio runtime.
    pub fn new<S>(
        config: AuthConfig,
        store: Arc<S>,
        deps: Dependencies,
        pool: Option<PgPool>,
    ) -> Self
    where
        S: AccountStore + SessionStore + AuditStore + ResetTokenStore + 'static,
    {
        let security = &config.security;

        let ledger = AuditLedger::new(store.clone(), deps.clock.clone());
        let accounts = AccountService::new(
            store.clone(),
            deps.clock.clone(),
            LockoutPolicy::from(security),
        );
        let sessions = SessionManager::new(
            store.clone(),
            ledger.clone(),
            deps.clock.clone(),
            Duration::minutes(security.session_ttl_minutes),
        );
        let auth = AuthService::new(
            accounts.clone(),
            sessions.clone(),
            ledger.clone(),
            store,
            deps.hasher,
            deps.notifier,
            deps.clock,
            Duration::minutes(security.password_reset_ttl_minutes),
        );
        let admin = AdminService::new(accounts, sessions, ledger.clone());
        let gate = AccessGate::new(ledger.clone(), deps.resolver);

        Self {
            config,
            auth,
            admin,
            gate,
            ledger,
            pool,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    // Session holder routes
    let session_routes = Router::new()
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/password", post(handlers::user::change_password))
        .route(
            "/users/me",
            get(handlers::user::get_me).patch(handlers::user::update_me),
        )
        .route("/users/me/sessions", get(handlers::user::list_sessions))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::session_middleware,
        ));

    // Admin routes: the session layer is outermost so the role gate sees a principal
    let admin_routes = Router::new()
        .route(
            "/admin/accounts/:account_id/role",
            post(handlers::admin::set_role),
        )
        .route(
            "/admin/accounts/:account_id/unlock",
            post(handlers::admin::unlock_account),
        )
        .route(
            "/admin/accounts/:account_id/sessions/revoke",
            post(handlers::admin::revoke_sessions),
        )
        .route(
            "/admin/audit/accounts/:account_id",
            get(handlers::audit::events_for_account),
        )
        .route(
            "/admin/audit/types/:event_type",
            get(handlers::audit::events_by_type),
        )
        .route(
            "/admin/audit/integrity",
            get(handlers::audit::verify_integrity),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::require_system_admin,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::session_middleware,
        ));

    let allowed_origins = state
        .config
        .security
        .allowed_origins
        .iter()
        // Credentialed CORS cannot use a wildcard origin
        .filter(|o| o.as_str() != "*")
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(origin) => Some(origin),
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}. Skipping.", o, e);
                None
            }
        })
        .collect::<Vec<HeaderValue>>();

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route(
            "/auth/password-reset/request",
            post(handlers::auth::request_password_reset),
        )
        .route(
            "/auth/password-reset/confirm",
            post(handlers::auth::confirm_password_reset),
        )
        .merge(session_routes)
        .merge(admin_routes)
        .with_state(state)
        .layer(from_fn(middleware::metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri().path(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(allowed_origins)
                .allow_credentials(true)
                .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
                .allow_headers([
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    HeaderName::from_static("x-request-id"),
                ]),
        )
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 503, description = "Service is unhealthy")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let (store, health) = match &state.pool {
        Some(pool) => {
            let health = db::health_check(pool).await.map_err(|e| {
                tracing::error!(error = %e, "PostgreSQL health check failed");
                AppError::ServiceUnavailable
            })?;
            ("postgres", Some(health))
        }
        None => ("memory", None),
    };

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "store": store,
            "postgres": health,
        }
    })))
}
