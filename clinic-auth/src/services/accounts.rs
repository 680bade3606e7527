//! Account store facade and lockout policy.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use super::error::ServiceError;
use crate::config::SecurityConfig;
use crate::models::{normalize_email, Account, Profile, Role};
use crate::store::{AccountStore, StoreError};
use crate::utils::Clock;

/// Consecutive failures that trigger a lock, and how long it lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub threshold: i32,
    pub duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            threshold: 3,
            duration: Duration::minutes(15),
        }
    }
}

impl From<&SecurityConfig> for LockoutPolicy {
    fn from(config: &SecurityConfig) -> Self {
        Self {
            threshold: config.lockout_threshold,
            duration: Duration::minutes(config.lockout_duration_minutes),
        }
    }
}

/// Result of recording one failed credential check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    pub attempts: i32,
    /// Set when this failure crossed the threshold.
    pub locked_until: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
    policy: LockoutPolicy,
}

impl AccountService {
    pub fn new(store: Arc<dyn AccountStore>, clock: Arc<dyn Clock>, policy: LockoutPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> LockoutPolicy {
        self.policy
    }

    pub async fn create(&self, account: &Account) -> Result<(), ServiceError> {
        self.store.insert_account(account).await.map_err(|e| match e {
            StoreError::Conflict(_) => {
                ServiceError::Conflict("Email already registered".to_string())
            }
            other => ServiceError::Store(other),
        })
    }

    /// Remove an account the ledger has never mentioned. Used to take back a
    /// registration whose creation could not be audited.
    pub async fn delete_unaudited(&self, account_id: Uuid) -> Result<bool, ServiceError> {
        Ok(self.store.delete_account(account_id).await?)
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<Account>, ServiceError> {
        Ok(self
            .store
            .find_account_by_email(&normalize_email(email))
            .await?)
    }

    pub async fn find_by_id(&self, account_id: Uuid) -> Result<Option<Account>, ServiceError> {
        Ok(self.store.find_account_by_id(account_id).await?)
    }

    pub async fn get(&self, account_id: Uuid) -> Result<Account, ServiceError> {
        self.find_by_id(account_id)
            .await?
            .ok_or(ServiceError::NotFound("Account"))
    }

    /// Atomic increment; `NotFound` if no such account.
    pub async fn increment_failed_attempts(&self, email: &str) -> Result<i32, ServiceError> {
        self.store
            .increment_failed_attempts(&normalize_email(email), self.clock.now())
            .await?
            .ok_or(ServiceError::NotFound("Account"))
    }

    /// No-op for unknown accounts.
    pub async fn reset_failed_attempts(&self, email: &str) -> Result<(), ServiceError> {
        Ok(self
            .store
            .reset_failed_attempts(&normalize_email(email), self.clock.now())
            .await?)
    }

    pub async fn lock(&self, email: &str, until: DateTime<Utc>) -> Result<(), ServiceError> {
        self.set_lock(email, Some(until)).await
    }

    /// Overwrite `locked_until` without touching the counter.
    pub async fn set_lock(
        &self,
        email: &str,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), ServiceError> {
        let found = self
            .store
            .set_locked_until(&normalize_email(email), until, self.clock.now())
            .await?;
        if found {
            Ok(())
        } else {
            Err(ServiceError::NotFound("Account"))
        }
    }

    /// Clear the lock and reset the failure counter.
    pub async fn unlock(&self, email: &str) -> Result<(), ServiceError> {
        let found = self
            .store
            .unlock_account(&normalize_email(email), self.clock.now())
            .await?;
        if found {
            Ok(())
        } else {
            Err(ServiceError::NotFound("Account"))
        }
    }

    /// Take back a failure from [`register_failure`](Self::register_failure)
    /// that could not be audited, together with the lock it set if any.
    pub async fn revert_failure(&self, email: &str, clear_lock: bool) -> Result<(), ServiceError> {
        let found = self
            .store
            .revert_failed_attempt(&normalize_email(email), clear_lock, self.clock.now())
            .await?;
        if found {
            Ok(())
        } else {
            Err(ServiceError::NotFound("Account"))
        }
    }

    /// Put back the counter and lock of a previously loaded account.
    pub async fn restore_lockout(&self, account: &Account) -> Result<(), ServiceError> {
        let found = self
            .store
            .restore_lockout(
                &account.email,
                account.failed_login_attempts,
                account.locked_until,
                self.clock.now(),
            )
            .await?;
        if found {
            Ok(())
        } else {
            Err(ServiceError::NotFound("Account"))
        }
    }

    /// Whether the account is locked now. A lapsed lock is cleared as a side
    /// effect, together with the failure counter.
    pub async fn is_locked(&self, email: &str) -> Result<bool, ServiceError> {
        match self.find_by_email(email).await? {
            Some(account) => Ok(self.active_lock(&account).await?.is_some()),
            None => Ok(false),
        }
    }

    /// The lock in force on an already loaded account, applying lazy unlock.
    #[instrument(skip(self, account), fields(account_id = %account.account_id))]
    pub async fn active_lock(
        &self,
        account: &Account,
    ) -> Result<Option<DateTime<Utc>>, ServiceError> {
        let now = self.clock.now();
        match account.locked_until {
            Some(until) if until > now => Ok(Some(until)),
            Some(_) => {
                if self.store.clear_lapsed_lock(&account.email, now).await? {
                    tracing::info!(account_id = %account.account_id, "Lapsed lock cleared");
                }
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Count one failed credential check and lock the account once the
    /// threshold is reached.
    #[instrument(skip(self))]
    pub async fn register_failure(&self, email: &str) -> Result<FailureOutcome, ServiceError> {
        let attempts = self.increment_failed_attempts(email).await?;

        if attempts < self.policy.threshold {
            return Ok(FailureOutcome {
                attempts,
                locked_until: None,
            });
        }

        let until = self.clock.now() + self.policy.duration;
        self.lock(email, until).await?;

        tracing::warn!(attempts, locked_until = %until, "Account locked after repeated failures");

        Ok(FailureOutcome {
            attempts,
            locked_until: Some(until),
        })
    }

    pub async fn update_password_hash(
        &self,
        account_id: Uuid,
        password_hash: &str,
    ) -> Result<(), ServiceError> {
        let found = self
            .store
            .update_password_hash(account_id, password_hash, self.clock.now())
            .await?;
        if found {
            Ok(())
        } else {
            Err(ServiceError::NotFound("Account"))
        }
    }

    pub async fn update_profile(
        &self,
        account_id: Uuid,
        profile: &Profile,
    ) -> Result<Account, ServiceError> {
        self.store
            .update_profile(account_id, profile, self.clock.now())
            .await?
            .ok_or(ServiceError::NotFound("Account"))
    }

    pub async fn update_role(&self, account_id: Uuid, role: Role) -> Result<(), ServiceError> {
        let found = self
            .store
            .update_role(account_id, role, self.clock.now())
            .await?;
        if found {
            Ok(())
        } else {
            Err(ServiceError::NotFound("Account"))
        }
    }
}
