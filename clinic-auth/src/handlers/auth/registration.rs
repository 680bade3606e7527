use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use axum_extra::extract::cookie::CookieJar;
use service_core::error::AppError;

use crate::{
    dtos::auth::{RegisterRequest, SessionResponse},
    middleware::Client,
    utils::{Password, ValidatedJson},
    AppState,
};

use super::with_session_cookie;

/// Register a patient account and start a session
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created and logged in", body = SessionResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse),
        (status = 422, description = "Validation error or weak password", body = ErrorResponse),
        (status = 503, description = "Audit ledger unavailable", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn register(
    State(state): State<AppState>,
    Client(client): Client,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let profile = req.profile();
    let outcome = state
        .auth
        .register(&req.email, Password::new(req.password), profile, &client)
        .await?;

    let jar = with_session_cookie(jar, &outcome);
    Ok((StatusCode::CREATED, jar, Json(SessionResponse::from(outcome))))
}
