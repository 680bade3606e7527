use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;

use crate::{middleware::auth::client_context, models::Role, services::AuthContext, AppState};

/// Middleware to require at least `required` for the wrapped routes.
/// Runs after [`session_middleware`](super::session_middleware); both the
/// grant and the denial are audited.
pub async fn require_role(
    State(state): State<AppState>,
    required: Role,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let method = req.method().as_str().to_lowercase();
    let resource = req.uri().path().to_string();

    let principal = req
        .extensions()
        .get::<AuthContext>()
        .map(|auth| auth.principal.clone())
        .ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "Session missing from request extensions"
            ))
        })?;

    let (parts, body) = req.into_parts();
    let client = client_context(&parts);

    state
        .gate
        .authorize(&principal, required, &method, &resource, &client)
        .await?;

    Ok(next.run(Request::from_parts(parts, body)).await)
}

/// Gate for the administrative routes.
pub async fn require_system_admin(
    state: State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    require_role(state, Role::SystemAdmin, req, next).await
}
