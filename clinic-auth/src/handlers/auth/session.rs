use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use axum_extra::extract::cookie::CookieJar;
use service_core::error::AppError;

use crate::{
    dtos::{
        auth::{LoginRequest, SessionResponse},
        MessageResponse,
    },
    middleware::{AuthSession, Client},
    utils::{Password, ValidatedJson},
    AppState,
};

use super::{with_session_cookie, without_session_cookie};

/// Login with email and password
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = SessionResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 423, description = "Account locked", body = ErrorResponse),
        (status = 503, description = "Audit ledger unavailable", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    Client(client): Client,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .auth
        .login(&req.email, Password::new(req.password), &client)
        .await?;

    let jar = with_session_cookie(jar, &outcome);
    Ok((StatusCode::OK, jar, Json(SessionResponse::from(outcome))))
}

/// End the current session
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Logged out successfully", body = MessageResponse),
        (status = 401, description = "Invalid session", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn logout(
    State(state): State<AppState>,
    AuthSession(auth): AuthSession,
    Client(client): Client,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    state.auth.logout(&auth.session.token, &client).await?;

    Ok((
        StatusCode::OK,
        without_session_cookie(jar),
        Json(MessageResponse::new("Logged out successfully")),
    ))
}
