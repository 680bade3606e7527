use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use service_core::error::AppError;
use std::net::SocketAddr;

use crate::{models::ClientContext, services::AuthContext, AppState};

pub const SESSION_COOKIE: &str = "session";

/// Bearer token from `Authorization: Bearer …`, falling back to the session cookie.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty());

    bearer.or_else(|| {
        CookieJar::from_headers(headers)
            .get(SESSION_COOKIE)
            .map(|cookie| cookie.value().to_string())
            .filter(|token| !token.is_empty())
    })
}

/// Middleware to require a live session. Validation slides the expiry.
pub async fn session_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = session_token(req.headers()).ok_or_else(|| {
        AppError::Unauthorized(anyhow::anyhow!("Missing session token"))
    })?;

    let auth = state.auth.validate_session(&token).await?;

    // Store the session so handlers and the role gate can access it
    req.extensions_mut().insert(auth);

    Ok(next.run(req).await)
}

/// Extractor for the authenticated session placed by [`session_middleware`].
pub struct AuthSession(pub AuthContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthSession
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let auth = parts.extensions.get::<AuthContext>().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "Session missing from request extensions"
            ))
        })?;

        Ok(AuthSession(auth.clone()))
    }
}

/// Origin IP and user agent of the request.
pub struct Client(pub ClientContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Client
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Client(client_context(parts)))
    }
}

pub fn client_context(parts: &Parts) -> ClientContext {
    let ip_address = parts
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string());

    let user_agent = parts
        .headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    ClientContext::new(ip_address, user_agent)
}
