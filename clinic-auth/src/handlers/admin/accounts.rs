use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::{
        admin::{RevokeSessionsResponse, SetRoleRequest},
        MessageResponse,
    },
    middleware::{AuthSession, Client},
    models::AccountResponse,
    AppState,
};

/// Assign a role to an account
#[utoipa::path(
    post,
    path = "/admin/accounts/{account_id}/role",
    params(
        ("account_id" = Uuid, Path, description = "Target account")
    ),
    request_body = SetRoleRequest,
    responses(
        (status = 200, description = "Role assigned", body = AccountResponse),
        (status = 403, description = "Actor does not outrank the roles involved",
            body = ErrorResponse),
        (status = 404, description = "Account not found", body = ErrorResponse)
    ),
    tag = "Admin",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn set_role(
    State(state): State<AppState>,
    AuthSession(auth): AuthSession,
    Client(client): Client,
    Path(account_id): Path<Uuid>,
    Json(req): Json<SetRoleRequest>,
) -> Result<Json<AccountResponse>, AppError> {
    let account = state
        .admin
        .set_role(&auth.principal, account_id, req.role, &client)
        .await?;
    Ok(Json(account.sanitized()))
}

/// Clear a lockout and the failed attempt counter
#[utoipa::path(
    post,
    path = "/admin/accounts/{account_id}/unlock",
    params(
        ("account_id" = Uuid, Path, description = "Target account")
    ),
    responses(
        (status = 200, description = "Account unlocked", body = MessageResponse),
        (status = 404, description = "Account not found", body = ErrorResponse)
    ),
    tag = "Admin",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn unlock_account(
    State(state): State<AppState>,
    AuthSession(auth): AuthSession,
    Client(client): Client,
    Path(account_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state
        .admin
        .unlock_account(&auth.principal, account_id, &client)
        .await?;

    Ok((
        StatusCode::OK,
        Json(MessageResponse::new("Account unlocked")),
    ))
}

/// End every session of an account
#[utoipa::path(
    post,
    path = "/admin/accounts/{account_id}/sessions/revoke",
    params(
        ("account_id" = Uuid, Path, description = "Target account")
    ),
    responses(
        (status = 200, description = "Sessions revoked", body = RevokeSessionsResponse),
        (status = 404, description = "Account not found", body = ErrorResponse)
    ),
    tag = "Admin",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn revoke_sessions(
    State(state): State<AppState>,
    AuthSession(auth): AuthSession,
    Client(client): Client,
    Path(account_id): Path<Uuid>,
) -> Result<Json<RevokeSessionsResponse>, AppError> {
    let sessions_revoked = state
        .admin
        .revoke_sessions(&auth.principal, account_id, &client)
        .await?;
    Ok(Json(RevokeSessionsResponse { sessions_revoked }))
}
