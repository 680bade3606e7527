use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::{
        auth::{PasswordResetConfirm, PasswordResetRequest},
        MessageResponse,
    },
    middleware::Client,
    utils::{Password, ValidatedJson},
    AppState,
};

/// Request a password reset email
#[utoipa::path(
    post,
    path = "/auth/password-reset/request",
    request_body = PasswordResetRequest,
    responses(
        (status = 202, description = "Reset email sent if the account exists",
            body = MessageResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn request_password_reset(
    State(state): State<AppState>,
    Client(client): Client,
    ValidatedJson(req): ValidatedJson<PasswordResetRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth
        .request_password_reset(&req.email, &client)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse::new(
            "If the email is registered, a reset link has been sent",
        )),
    ))
}

/// Complete a password reset
#[utoipa::path(
    post,
    path = "/auth/password-reset/confirm",
    request_body = PasswordResetConfirm,
    responses(
        (status = 200, description = "Password reset", body = MessageResponse),
        (status = 400, description = "Invalid or expired token", body = ErrorResponse),
        (status = 422, description = "Weak password", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn confirm_password_reset(
    State(state): State<AppState>,
    Client(client): Client,
    ValidatedJson(req): ValidatedJson<PasswordResetConfirm>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth
        .confirm_password_reset(&req.token, Password::new(req.new_password), &client)
        .await?;

    Ok((
        StatusCode::OK,
        Json(MessageResponse::new("Password has been reset")),
    ))
}
