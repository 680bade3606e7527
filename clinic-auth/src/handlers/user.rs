use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::{
        auth::{ChangePasswordRequest, UpdateProfileRequest},
        MessageResponse,
    },
    middleware::{AuthSession, Client},
    models::{AccountResponse, SessionInfo},
    utils::{Password, ValidatedJson},
    AppState,
};

/// Profile of the session holder
#[utoipa::path(
    get,
    path = "/users/me",
    responses(
        (status = 200, description = "Current account", body = AccountResponse),
        (status = 401, description = "Invalid session", body = ErrorResponse)
    ),
    tag = "User",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_me(
    State(state): State<AppState>,
    AuthSession(auth): AuthSession,
) -> Result<Json<AccountResponse>, AppError> {
    let account = state
        .auth
        .accounts()
        .get(auth.principal.account_id)
        .await?;
    Ok(Json(account.sanitized()))
}

/// Update profile fields of the session holder
#[utoipa::path(
    patch,
    path = "/users/me",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = AccountResponse),
        (status = 401, description = "Invalid session", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "User",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn update_me(
    State(state): State<AppState>,
    AuthSession(auth): AuthSession,
    Client(client): Client,
    ValidatedJson(req): ValidatedJson<UpdateProfileRequest>,
) -> Result<Json<AccountResponse>, AppError> {
    let current = state
        .auth
        .accounts()
        .get(auth.principal.account_id)
        .await?;

    let profile = req.apply_to(current.profile);
    let updated = state.auth.update_profile(&auth, profile, &client).await?;

    Ok(Json(updated.sanitized()))
}

/// Change the password; other sessions of the account are ended
#[utoipa::path(
    post,
    path = "/auth/password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 401, description = "Current password incorrect", body = ErrorResponse),
        (status = 422, description = "Weak password", body = ErrorResponse)
    ),
    tag = "User",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn change_password(
    State(state): State<AppState>,
    AuthSession(auth): AuthSession,
    Client(client): Client,
    ValidatedJson(req): ValidatedJson<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth
        .change_password(
            &auth,
            Password::new(req.current_password),
            Password::new(req.new_password),
            &client,
        )
        .await?;

    Ok((
        StatusCode::OK,
        Json(MessageResponse::new("Password changed successfully")),
    ))
}

/// Active sessions of the session holder
#[utoipa::path(
    get,
    path = "/users/me/sessions",
    responses(
        (status = 200, description = "Active sessions", body = [SessionInfo]),
        (status = 401, description = "Invalid session", body = ErrorResponse)
    ),
    tag = "User",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn list_sessions(
    State(state): State<AppState>,
    AuthSession(auth): AuthSession,
) -> Result<Json<Vec<SessionInfo>>, AppError> {
    let sessions = state
        .auth
        .sessions()
        .list_active(auth.principal.account_id)
        .await?;

    Ok(Json(sessions.iter().map(SessionInfo::from).collect()))
}
