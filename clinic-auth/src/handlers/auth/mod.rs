pub mod password;
pub mod registration;
pub mod session;

pub use password::{confirm_password_reset, request_password_reset};
pub use registration::register;
pub use session::{login, logout};

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use crate::{
    dtos::auth::SessionResponse, middleware::SESSION_COOKIE, services::LoginOutcome,
};

/// Attach the session cookie for browser clients. The token is also returned
/// in the body for bearer use.
pub(crate) fn with_session_cookie(jar: CookieJar, outcome: &LoginOutcome) -> CookieJar {
    jar.add(
        Cookie::build((SESSION_COOKIE, outcome.session.token.clone()))
            .path("/")
            .http_only(true)
            .secure(true)
            .same_site(SameSite::Strict),
    )
}

pub(crate) fn without_session_cookie(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(SESSION_COOKIE).path("/"))
}

impl From<LoginOutcome> for SessionResponse {
    fn from(outcome: LoginOutcome) -> Self {
        Self {
            token: outcome.session.token.clone(),
            expires_at: outcome.session.expires_at,
            account: outcome.account.sanitized(),
        }
    }
}
