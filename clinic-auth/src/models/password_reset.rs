//! Password reset token model - single-use, time-boxed reset credentials.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Reset token record. Only the SHA-256 of the token is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordResetToken {
    pub token_hash: String,
    pub account_id: Uuid,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub superseded: bool,
}

impl PasswordResetToken {
    pub fn new(
        token_hash: String,
        account_id: Uuid,
        email: String,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            token_hash,
            account_id,
            email,
            created_at: now,
            expires_at: now + ttl,
            used_at: None,
            superseded: false,
        }
    }

    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none() && !self.superseded && self.expires_at > now
    }
}
