//! Persistent store contract for the security core.
//!
//! The services only see these traits. [`PgStore`] backs them with
//! PostgreSQL; [`MemoryStore`] keeps everything in process for tests and
//! local development.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Account, AuditEvent, AuditEventType, PasswordResetToken, Profile, Role, Session,
};

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write (email, token, sequence).
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found")]
    NotFound,

    #[error("Store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                StoreError::Conflict(db_err.message().to_string())
            }
            other => StoreError::Backend(anyhow::Error::new(other)),
        }
    }
}

/// Filters and paging for audit lookups. Results are always newest first.
#[derive(Debug, Clone, Copy)]
pub struct AuditQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl AuditQuery {
    pub const MAX_LIMIT: i64 = 1000;

    pub fn new(limit: i64, offset: i64) -> Self {
        Self {
            from: None,
            to: None,
            limit: limit.clamp(1, Self::MAX_LIMIT),
            offset: offset.max(0),
        }
    }

    pub fn between(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub(crate) fn matches(&self, timestamp: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| timestamp >= from)
            && self.to.map_or(true, |to| timestamp <= to)
    }
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self::new(100, 0)
    }
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Fails with `Conflict` when the email is already registered.
    async fn insert_account(&self, account: &Account) -> Result<(), StoreError>;

    /// Remove an account that no audit event refers to. Returns `false` if
    /// the account is missing or already referenced by the ledger.
    async fn delete_account(&self, account_id: Uuid) -> Result<bool, StoreError>;

    async fn find_account_by_id(&self, account_id: Uuid) -> Result<Option<Account>, StoreError>;

    /// `email` must already be normalised.
    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    /// Single atomic increment. Returns the new count, `None` if no such account.
    async fn increment_failed_attempts(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<i32>, StoreError>;

    async fn reset_failed_attempts(&self, email: &str, now: DateTime<Utc>)
        -> Result<(), StoreError>;

    /// Take back one counted failure (never below zero), optionally clearing
    /// the lock it caused.
    async fn revert_failed_attempt(
        &self,
        email: &str,
        clear_lock: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Put the counter and lock back to previously read values.
    async fn restore_lockout(
        &self,
        email: &str,
        failed_attempts: i32,
        locked_until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Set or clear `locked_until` without touching the counter.
    async fn set_locked_until(
        &self,
        email: &str,
        until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Clear the lock and reset the counter.
    async fn unlock_account(&self, email: &str, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Unlock only if the stored lock has already lapsed at `now`.
    /// Returns whether a lapsed lock was cleared.
    async fn clear_lapsed_lock(&self, email: &str, now: DateTime<Utc>) -> Result<bool, StoreError>;

    async fn update_password_hash(
        &self,
        account_id: Uuid,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn update_profile(
        &self,
        account_id: Uuid,
        profile: &Profile,
        now: DateTime<Utc>,
    ) -> Result<Option<Account>, StoreError>;

    async fn update_role(
        &self,
        account_id: Uuid,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: &Session) -> Result<(), StoreError>;

    async fn find_session(&self, token: &str) -> Result<Option<Session>, StoreError>;

    /// Move `expires_at` forward if the session is still usable at `now`.
    async fn extend_session(
        &self,
        token: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError>;

    /// Mark invalidated. Returns the session if this call invalidated it.
    async fn invalidate_session(&self, token: &str) -> Result<Option<Session>, StoreError>;

    /// Invalidate every live session of the account except `keep_token`.
    /// Returns the tokens this call invalidated.
    async fn invalidate_account_sessions(
        &self,
        account_id: Uuid,
        keep_token: Option<&str>,
    ) -> Result<Vec<String>, StoreError>;

    /// Clear the invalidated flag on the given tokens.
    async fn restore_sessions(&self, tokens: &[String]) -> Result<u64, StoreError>;

    async fn list_active_sessions(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, StoreError>;

    /// Physically remove expired or invalidated rows.
    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Highest-sequence event, if any.
    async fn last_audit_event(&self) -> Result<Option<AuditEvent>, StoreError>;

    /// Fails with `Conflict` when the sequence number is already taken.
    async fn insert_audit_event(&self, event: &AuditEvent) -> Result<(), StoreError>;

    async fn find_audit_by_account(
        &self,
        account_id: Uuid,
        query: &AuditQuery,
    ) -> Result<Vec<AuditEvent>, StoreError>;

    async fn find_audit_by_type(
        &self,
        event_type: AuditEventType,
        query: &AuditQuery,
    ) -> Result<Vec<AuditEvent>, StoreError>;

    /// Ascending page of events with `sequence > after_sequence`.
    async fn scan_audit(
        &self,
        after_sequence: i64,
        limit: i64,
    ) -> Result<Vec<AuditEvent>, StoreError>;
}

#[async_trait]
pub trait ResetTokenStore: Send + Sync {
    /// Insert and supersede every older token of the same account.
    async fn insert_reset_token(&self, token: &PasswordResetToken) -> Result<(), StoreError>;

    async fn find_reset_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<PasswordResetToken>, StoreError>;

    /// Atomically mark a usable token as used. `None` if it was not usable.
    async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PasswordResetToken>, StoreError>;

    /// Make a consumed token usable again, unless it has been superseded.
    async fn release_reset_token(&self, token_hash: &str) -> Result<bool, StoreError>;
}
