use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use tracing::instrument;
use uuid::Uuid;

use super::{
    AccountStore, AuditQuery, AuditStore, ResetTokenStore, SessionStore, StoreError,
};
use crate::models::{
    Account, AuditEvent, AuditEventType, PasswordResetToken, Profile, Role, Session,
};

const ACCOUNT_COLUMNS: &str = "account_id, email, password_hash, profile, role, \
    failed_login_attempts, locked_until, created_at, updated_at";

const SESSION_COLUMNS: &str =
    "token, account_id, ip_address, user_agent, created_at, expires_at, invalidated";

const AUDIT_COLUMNS: &str = "sequence, account_id, event_type, timestamp, ip_address, \
    user_agent, outcome, details, previous_hash, hash";

const RESET_COLUMNS: &str =
    "token_hash, account_id, email, created_at, expires_at, used_at, superseded";

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    account_id: Uuid,
    email: String,
    password_hash: String,
    profile: String,
    role: String,
    failed_login_attempts: i32,
    locked_until: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        let profile: Profile = serde_json::from_str(&row.profile)
            .map_err(|e| anyhow::anyhow!("Corrupt profile for {}: {}", row.account_id, e))?;
        let role: Role = row.role.parse().map_err(anyhow::Error::msg)?;
        Ok(Account {
            account_id: row.account_id,
            email: row.email,
            password_hash: row.password_hash,
            profile,
            role,
            failed_login_attempts: row.failed_login_attempts,
            locked_until: row.locked_until,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    token: String,
    account_id: Uuid,
    ip_address: String,
    user_agent: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    invalidated: bool,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Session {
            token: row.token,
            account_id: row.account_id,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            created_at: row.created_at,
            expires_at: row.expires_at,
            invalidated: row.invalidated,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    sequence: i64,
    account_id: Option<Uuid>,
    event_type: String,
    timestamp: DateTime<Utc>,
    ip_address: String,
    user_agent: String,
    outcome: String,
    details: String,
    previous_hash: String,
    hash: String,
}

impl TryFrom<AuditRow> for AuditEvent {
    type Error = StoreError;

    // Rows that no longer decode still have to reach the integrity check, so
    // unparseable details are kept as a raw JSON string rather than rejected.
    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        let details = serde_json::from_str(&row.details)
            .unwrap_or(serde_json::Value::String(row.details));
        Ok(AuditEvent {
            sequence: row.sequence,
            account_id: row.account_id,
            event_type: row.event_type.parse().map_err(anyhow::Error::msg)?,
            timestamp: row.timestamp,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            outcome: row.outcome.parse().map_err(anyhow::Error::msg)?,
            details,
            previous_hash: row.previous_hash,
            hash: row.hash,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ResetRow {
    token_hash: String,
    account_id: Uuid,
    email: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    used_at: Option<DateTime<Utc>>,
    superseded: bool,
}

impl From<ResetRow> for PasswordResetToken {
    fn from(row: ResetRow) -> Self {
        PasswordResetToken {
            token_hash: row.token_hash,
            account_id: row.account_id,
            email: row.email,
            created_at: row.created_at,
            expires_at: row.expires_at,
            used_at: row.used_at,
            superseded: row.superseded,
        }
    }
}

fn encode_profile(profile: &Profile) -> Result<String, StoreError> {
    serde_json::to_string(profile).map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))
}

fn collect_audit(rows: Vec<AuditRow>) -> Result<Vec<AuditEvent>, StoreError> {
    rows.into_iter().map(AuditEvent::try_from).collect()
}

#[async_trait]
impl AccountStore for PgStore {
    #[instrument(skip(self, account), fields(account_id = %account.account_id))]
    async fn insert_account(&self, account: &Account) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (account_id, email, password_hash, profile, role,
                                  failed_login_attempts, locked_until, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(account.account_id)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(encode_profile(&account.profile)?)
        .bind(account.role.as_str())
        .bind(account.failed_login_attempts)
        .bind(account.locked_until)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_account(&self, account_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM accounts
            WHERE account_id = $1
              AND NOT EXISTS (SELECT 1 FROM audit_events WHERE account_id = $1)
            "#,
        )
        .bind(account_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_account_by_id(&self, account_id: Uuid) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE account_id = $1"
        ))
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Account::try_from).transpose()
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Account::try_from).transpose()
    }

    async fn increment_failed_attempts(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<i32>, StoreError> {
        let count = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE accounts
            SET failed_login_attempts = failed_login_attempts + 1, updated_at = $2
            WHERE email = $1
            RETURNING failed_login_attempts
            "#,
        )
        .bind(email)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(count)
    }

    async fn reset_failed_attempts(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE accounts SET failed_login_attempts = 0, updated_at = $2 WHERE email = $1",
        )
        .bind(email)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn revert_failed_attempt(
        &self,
        email: &str,
        clear_lock: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET failed_login_attempts = GREATEST(failed_login_attempts - 1, 0),
                locked_until = CASE WHEN $2 THEN NULL ELSE locked_until END,
                updated_at = $3
            WHERE email = $1
            "#,
        )
        .bind(email)
        .bind(clear_lock)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn restore_lockout(
        &self,
        email: &str,
        failed_attempts: i32,
        locked_until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET failed_login_attempts = $2, locked_until = $3, updated_at = $4
            WHERE email = $1
            "#,
        )
        .bind(email)
        .bind(failed_attempts)
        .bind(locked_until)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_locked_until(
        &self,
        email: &str,
        until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE accounts SET locked_until = $2, updated_at = $3 WHERE email = $1")
                .bind(email)
                .bind(until)
                .bind(now)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn unlock_account(&self, email: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET locked_until = NULL, failed_login_attempts = 0, updated_at = $2
            WHERE email = $1
            "#,
        )
        .bind(email)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_lapsed_lock(&self, email: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET locked_until = NULL, failed_login_attempts = 0, updated_at = $2
            WHERE email = $1 AND locked_until IS NOT NULL AND locked_until <= $2
            "#,
        )
        .bind(email)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_password_hash(
        &self,
        account_id: Uuid,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE accounts SET password_hash = $2, updated_at = $3 WHERE account_id = $1",
        )
        .bind(account_id)
        .bind(password_hash)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_profile(
        &self,
        account_id: Uuid,
        profile: &Profile,
        now: DateTime<Utc>,
    ) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "UPDATE accounts SET profile = $2, updated_at = $3 WHERE account_id = $1 \
             RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(account_id)
        .bind(encode_profile(profile)?)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Account::try_from).transpose()
    }

    async fn update_role(
        &self,
        account_id: Uuid,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE accounts SET role = $2, updated_at = $3 WHERE account_id = $1")
                .bind(account_id)
                .bind(role.as_str())
                .bind(now)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SessionStore for PgStore {
    #[instrument(skip(self, session), fields(account_id = %session.account_id))]
    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (token, account_id, ip_address, user_agent,
                                  created_at, expires_at, invalidated)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&session.token)
        .bind(session.account_id)
        .bind(&session.ip_address)
        .bind(&session.user_agent)
        .bind(session.created_at)
        .bind(session.expires_at)
        .bind(session.invalidated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_session(&self, token: &str) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Session::from))
    }

    async fn extend_session(
        &self,
        token: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "UPDATE sessions SET expires_at = $2 \
             WHERE token = $1 AND NOT invalidated AND expires_at > $3 \
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(token)
        .bind(expires_at)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Session::from))
    }

    async fn invalidate_session(&self, token: &str) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "UPDATE sessions SET invalidated = TRUE \
             WHERE token = $1 AND NOT invalidated \
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Session::from))
    }

    #[instrument(skip(self, keep_token))]
    async fn invalidate_account_sessions(
        &self,
        account_id: Uuid,
        keep_token: Option<&str>,
    ) -> Result<Vec<String>, StoreError> {
        let tokens = sqlx::query_scalar::<_, String>(
            r#"
            UPDATE sessions SET invalidated = TRUE
            WHERE account_id = $1 AND NOT invalidated
              AND ($2::TEXT IS NULL OR token <> $2)
            RETURNING token
            "#,
        )
        .bind(account_id)
        .bind(keep_token)
        .fetch_all(&self.pool)
        .await?;
        Ok(tokens)
    }

    #[instrument(skip_all, fields(count = tokens.len()))]
    async fn restore_sessions(&self, tokens: &[String]) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE sessions SET invalidated = FALSE WHERE token = ANY($1) AND invalidated",
        )
        .bind(tokens)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_active_sessions(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, StoreError> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE account_id = $1 AND NOT invalidated AND expires_at > $2 \
             ORDER BY created_at DESC"
        ))
        .bind(account_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Session::from).collect())
    }

    #[instrument(skip(self))]
    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE invalidated OR expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AuditStore for PgStore {
    async fn last_audit_event(&self) -> Result<Option<AuditEvent>, StoreError> {
        let row = sqlx::query_as::<_, AuditRow>(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_events ORDER BY sequence DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        row.map(AuditEvent::try_from).transpose()
    }

    #[instrument(
        skip(self, event),
        fields(sequence = event.sequence, event_type = %event.event_type)
    )]
    async fn insert_audit_event(&self, event: &AuditEvent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO audit_events (sequence, account_id, event_type, timestamp, ip_address,
                                      user_agent, outcome, details, previous_hash, hash)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(event.sequence)
        .bind(event.account_id)
        .bind(event.event_type.as_str())
        .bind(event.timestamp)
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .bind(event.outcome.as_str())
        .bind(crate::models::audit_event::serialize_details(&event.details))
        .bind(&event.previous_hash)
        .bind(&event.hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_audit_by_account(
        &self,
        account_id: Uuid,
        query: &AuditQuery,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        let rows = sqlx::query_as::<_, AuditRow>(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_events \
             WHERE account_id = $1 \
               AND ($2::TIMESTAMPTZ IS NULL OR timestamp >= $2) \
               AND ($3::TIMESTAMPTZ IS NULL OR timestamp <= $3) \
             ORDER BY sequence DESC LIMIT $4 OFFSET $5"
        ))
        .bind(account_id)
        .bind(query.from)
        .bind(query.to)
        .bind(query.limit)
        .bind(query.offset)
        .fetch_all(&self.pool)
        .await?;
        collect_audit(rows)
    }

    async fn find_audit_by_type(
        &self,
        event_type: AuditEventType,
        query: &AuditQuery,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        let rows = sqlx::query_as::<_, AuditRow>(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_events \
             WHERE event_type = $1 \
               AND ($2::TIMESTAMPTZ IS NULL OR timestamp >= $2) \
               AND ($3::TIMESTAMPTZ IS NULL OR timestamp <= $3) \
             ORDER BY sequence DESC LIMIT $4 OFFSET $5"
        ))
        .bind(event_type.as_str())
        .bind(query.from)
        .bind(query.to)
        .bind(query.limit)
        .bind(query.offset)
        .fetch_all(&self.pool)
        .await?;
        collect_audit(rows)
    }

    async fn scan_audit(
        &self,
        after_sequence: i64,
        limit: i64,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        let rows = sqlx::query_as::<_, AuditRow>(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_events \
             WHERE sequence > $1 ORDER BY sequence ASC LIMIT $2"
        ))
        .bind(after_sequence)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        collect_audit(rows)
    }
}

#[async_trait]
impl ResetTokenStore for PgStore {
    async fn insert_reset_token(&self, token: &PasswordResetToken) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE password_reset_tokens SET superseded = TRUE \
             WHERE account_id = $1 AND NOT superseded",
        )
        .bind(token.account_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO password_reset_tokens (token_hash, account_id, email, created_at,
                                               expires_at, used_at, superseded)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&token.token_hash)
        .bind(token.account_id)
        .bind(&token.email)
        .bind(token.created_at)
        .bind(token.expires_at)
        .bind(token.used_at)
        .bind(token.superseded)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_reset_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<PasswordResetToken>, StoreError> {
        let row = sqlx::query_as::<_, ResetRow>(&format!(
            "SELECT {RESET_COLUMNS} FROM password_reset_tokens WHERE token_hash = $1"
        ))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(PasswordResetToken::from))
    }

    async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PasswordResetToken>, StoreError> {
        let row = sqlx::query_as::<_, ResetRow>(&format!(
            "UPDATE password_reset_tokens SET used_at = $2 \
             WHERE token_hash = $1 AND used_at IS NULL AND NOT superseded AND expires_at > $2 \
             RETURNING {RESET_COLUMNS}"
        ))
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(PasswordResetToken::from))
    }

    async fn release_reset_token(&self, token_hash: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE password_reset_tokens SET used_at = NULL \
             WHERE token_hash = $1 AND used_at IS NOT NULL AND NOT superseded",
        )
        .bind(token_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
