//! Session model - opaque bearer sessions with sliding expiration.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session entity. The token is both the lookup key and the bearer credential.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub account_id: Uuid,
    pub ip_address: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub invalidated: bool,
}

impl Session {
    /// Create a new session expiring `ttl` after `now`.
    pub fn new(
        token: String,
        account_id: Uuid,
        client: &ClientContext,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            token,
            account_id,
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
            created_at: now,
            expires_at: now + ttl,
            invalidated: false,
        }
    }

    /// Usable iff not invalidated and not yet expired.
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        !self.invalidated && self.expires_at > now
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Short, non-reversible reference for logs.
    pub fn token_ref(&self) -> &str {
        token_ref(&self.token)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("token", &format_args!("{}…", self.token_ref()))
            .field("account_id", &self.account_id)
            .field("ip_address", &self.ip_address)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .field("invalidated", &self.invalidated)
            .finish()
    }
}

pub(crate) fn token_ref(token: &str) -> &str {
    token.get(..8).unwrap_or("")
}

/// Why a session was ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutReason {
    Explicit,
    Timeout,
    PasswordChange,
    AdminAction,
}

impl LogoutReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogoutReason::Explicit => "explicit",
            LogoutReason::Timeout => "timeout",
            LogoutReason::PasswordChange => "password_change",
            LogoutReason::AdminAction => "admin_action",
        }
    }
}

/// Where a request came from: origin IP and client signature (user agent).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientContext {
    pub ip_address: String,
    pub user_agent: String,
}

impl ClientContext {
    pub fn new(ip_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip_address: ip_address.into(),
            user_agent: user_agent.into(),
        }
    }

    /// Context for actions the system takes on its own (cleanup, startup).
    pub fn system() -> Self {
        Self::new("internal", "clinic-auth")
    }
}

/// Session info for API responses (never includes the token).
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SessionInfo {
    pub account_id: Uuid,
    pub ip_address: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<&Session> for SessionInfo {
    fn from(s: &Session) -> Self {
        Self {
            account_id: s.account_id,
            ip_address: s.ip_address.clone(),
            created_at: s.created_at,
            expires_at: s.expires_at,
        }
    }
}
