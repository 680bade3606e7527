//! Session manager: opaque bearer sessions with sliding expiration.

use chrono::Duration;
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use super::audit::AuditLedger;
use super::error::ServiceError;
use super::run_detached;
use crate::models::{AuditEventType, AuditOutcome, ClientContext, LogoutReason, Session};
use crate::store::{SessionStore, StoreError};
use crate::utils::{generate_token, Clock};

pub const DEFAULT_SESSION_TTL_MINUTES: i64 = 30;

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    ledger: AuditLedger,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        ledger: AuditLedger,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            clock,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a fresh session expiring one TTL from now.
    #[instrument(skip(self, client))]
    pub async fn create(
        &self,
        account_id: Uuid,
        client: &ClientContext,
    ) -> Result<Session, ServiceError> {
        let session = Session::new(
            generate_token(),
            account_id,
            client,
            self.clock.now(),
            self.ttl,
        );

        self.store.insert_session(&session).await.map_err(|e| match e {
            StoreError::Conflict(_) => {
                ServiceError::Internal(anyhow::anyhow!("session token collision"))
            }
            other => ServiceError::Store(other),
        })?;

        tracing::info!(
            account_id = %account_id,
            session = session.token_ref(),
            expires_at = %session.expires_at,
            "Session created"
        );
        Ok(session)
    }

    /// Usable session with its expiry pushed to one TTL from now, or `None`.
    ///
    /// A session found past its expiry is closed here and audited as a
    /// timeout logout, once.
    pub async fn validate_and_extend(&self, token: &str) -> Result<Option<Session>, ServiceError> {
        let now = self.clock.now();

        let Some(session) = self.store.find_session(token).await? else {
            return Ok(None);
        };

        if session.invalidated {
            return Ok(None);
        }

        if session.is_expired_at(now) {
            self.invalidate(token, LogoutReason::Timeout, &ClientContext::system())
                .await?;
            return Ok(None);
        }

        Ok(self.store.extend_session(token, now + self.ttl, now).await?)
    }

    /// Invalidate one session and audit the logout. Returns `false` if the
    /// token was unknown or already invalidated. If the logout cannot be
    /// audited the session is put back and the error returned.
    #[instrument(skip(self, token, client))]
    pub async fn invalidate(
        &self,
        token: &str,
        reason: LogoutReason,
        client: &ClientContext,
    ) -> Result<bool, ServiceError> {
        let this = self.clone();
        let token = token.to_string();
        let client = client.clone();

        run_detached("logout", async move {
            this.run_invalidate(&token, reason, &client).await
        })
        .await
    }

    async fn run_invalidate(
        &self,
        token: &str,
        reason: LogoutReason,
        client: &ClientContext,
    ) -> Result<bool, ServiceError> {
        let Some(session) = self.store.invalidate_session(token).await? else {
            return Ok(false);
        };

        if let Err(e) = self.audit_logout(&session, reason, client).await {
            self.restore(std::slice::from_ref(&session.token)).await;
            return Err(e);
        }
        Ok(true)
    }

    /// Invalidate without an audit record. Used to undo a session whose
    /// issuance could not be audited.
    pub(crate) async fn discard(&self, token: &str) -> Result<(), ServiceError> {
        self.store.invalidate_session(token).await?;
        Ok(())
    }

    /// Invalidate every other live session of the account. Returns the
    /// tokens ended, so the caller can [`restore`](Self::restore) them.
    #[instrument(skip(self, keep_token))]
    pub async fn invalidate_all_except(
        &self,
        account_id: Uuid,
        keep_token: &str,
    ) -> Result<Vec<String>, ServiceError> {
        let tokens = self
            .store
            .invalidate_account_sessions(account_id, Some(keep_token))
            .await?;
        tracing::info!(
            account_id = %account_id,
            count = tokens.len(),
            "Other sessions invalidated"
        );
        Ok(tokens)
    }

    #[instrument(skip(self))]
    pub async fn invalidate_all(&self, account_id: Uuid) -> Result<Vec<String>, ServiceError> {
        let tokens = self
            .store
            .invalidate_account_sessions(account_id, None)
            .await?;
        tracing::info!(
            account_id = %account_id,
            count = tokens.len(),
            "All sessions invalidated"
        );
        Ok(tokens)
    }

    /// Bring back sessions ended by a write that could not be audited.
    /// Failures are logged, not returned.
    pub(crate) async fn restore(&self, tokens: &[String]) {
        if tokens.is_empty() {
            return;
        }
        match self.store.restore_sessions(tokens).await {
            Ok(restored) => tracing::warn!(restored, "Unaudited session invalidation undone"),
            Err(e) => tracing::error!(error = %e, "Failed to restore sessions"),
        }
    }

    pub async fn list_active(&self, account_id: Uuid) -> Result<Vec<Session>, ServiceError> {
        Ok(self
            .store
            .list_active_sessions(account_id, self.clock.now())
            .await?)
    }

    /// Delete expired and invalidated rows.
    pub async fn cleanup_expired(&self) -> Result<u64, ServiceError> {
        let removed = self.store.delete_expired_sessions(self.clock.now()).await?;
        if removed > 0 {
            tracing::info!(removed, "Expired sessions cleaned up");
        }
        Ok(removed)
    }

    async fn audit_logout(
        &self,
        session: &Session,
        reason: LogoutReason,
        client: &ClientContext,
    ) -> Result<(), ServiceError> {
        self.ledger
            .append(
                Some(session.account_id),
                AuditEventType::Logout,
                client,
                AuditOutcome::Success,
                json!({ "reason": reason.as_str() }),
            )
            .await?;
        Ok(())
    }
}
