//! Authentication orchestrator.
//!
//! Login walks `lookup -> lock check -> credential check -> success | failure`.
//! Every branch writes its audit record before answering; a failed audit
//! write fails the operation and takes back the writes made before it.
//! Flows that mutate state run detached from the caller, so a dropped
//! request cannot stop one between its writes and its audit record.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use super::accounts::AccountService;
use super::audit::AuditLedger;
use super::error::ServiceError;
use super::metrics;
use super::notifier::ResetNotifier;
use super::policy::check_strength;
use super::run_detached;
use super::sessions::SessionManager;
use crate::models::{
    normalize_email, Account, AuditEventType, AuditOutcome, ClientContext, LogoutReason,
    PasswordResetToken, Principal, Profile, Role, Session,
};
use crate::store::{ResetTokenStore, StoreError};
use crate::utils::{
    generate_token, hash_token, Clock, CredentialHasher, Password, PasswordHashString,
};

pub const DEFAULT_RESET_TTL_MINUTES: i64 = 60;

/// A successful login: the new session and the account it belongs to.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub session: Session,
    pub account: Account,
}

/// A validated, freshly extended session and who holds it.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub session: Session,
    pub principal: Principal,
}

#[derive(Clone)]
pub struct AuthService {
    accounts: AccountService,
    sessions: SessionManager,
    ledger: AuditLedger,
    reset_tokens: Arc<dyn ResetTokenStore>,
    hasher: Arc<dyn CredentialHasher>,
    notifier: Arc<dyn ResetNotifier>,
    clock: Arc<dyn Clock>,
    reset_ttl: Duration,
}

impl AuthService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        accounts: AccountService,
        sessions: SessionManager,
        ledger: AuditLedger,
        reset_tokens: Arc<dyn ResetTokenStore>,
        hasher: Arc<dyn CredentialHasher>,
        notifier: Arc<dyn ResetNotifier>,
        clock: Arc<dyn Clock>,
        reset_ttl: Duration,
    ) -> Self {
        Self {
            accounts,
            sessions,
            ledger,
            reset_tokens,
            hasher,
            notifier,
            clock,
            reset_ttl,
        }
    }

    pub fn accounts(&self) -> &AccountService {
        &self.accounts
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn ledger(&self) -> &AuditLedger {
        &self.ledger
    }

    /// Create a patient account and log it in.
    pub async fn register(
        &self,
        email: &str,
        password: Password,
        profile: Profile,
        client: &ClientContext,
    ) -> Result<LoginOutcome, ServiceError> {
        let email = normalize_email(email);

        let this = self.clone();
        let owned_email = email.clone();
        let secret = password.clone();
        let owned_client = client.clone();
        run_detached("registration", async move {
            this.create_account(&owned_email, secret, profile, &owned_client)
                .await
        })
        .await?;

        self.login(&email, password, client).await
    }

    /// Insert the account and its `account_created` record. An account whose
    /// creation cannot be audited is removed again.
    #[instrument(skip(self, password, profile, client))]
    async fn create_account(
        &self,
        email: &str,
        password: Password,
        profile: Profile,
        client: &ClientContext,
    ) -> Result<(), ServiceError> {
        if self.accounts.find_by_email(email).await?.is_some() {
            return Err(ServiceError::Conflict("Email already registered".to_string()));
        }

        let strength = check_strength(password.as_str());
        if !strength.valid {
            return Err(ServiceError::WeakPassword(strength.reasons()));
        }

        let password_hash = self.hash_password(password).await?;
        let account = Account::new(
            email,
            password_hash.into_string(),
            profile,
            Role::Patient,
            self.clock.now(),
        );
        self.accounts.create(&account).await?;

        let audited = self
            .ledger
            .append(
                Some(account.account_id),
                AuditEventType::AccountCreated,
                client,
                AuditOutcome::Success,
                json!({ "email": account.email, "role": account.role.as_str() }),
            )
            .await;

        if let Err(e) = audited {
            let account_id = account.account_id;
            match self.accounts.delete_unaudited(account_id).await {
                Ok(true) => tracing::warn!(%account_id, "Unaudited registration removed"),
                Ok(false) => {
                    tracing::error!(%account_id, "Unaudited registration could not be removed")
                }
                Err(undo) => {
                    tracing::error!(error = %undo, "Failed to remove unaudited registration")
                }
            }
            return Err(e);
        }

        tracing::info!(account_id = %account.account_id, "Account registered");
        Ok(())
    }

    /// Run the login state machine.
    ///
    /// The work happens on its own task: a caller that disconnects midway
    /// does not leave a lock or a session without its audit record.
    pub async fn login(
        &self,
        email: &str,
        password: Password,
        client: &ClientContext,
    ) -> Result<LoginOutcome, ServiceError> {
        let this = self.clone();
        let email = normalize_email(email);
        let client = client.clone();

        let result =
            run_detached("login", async move { this.run_login(&email, password, &client).await })
                .await;

        metrics::record_login(match &result {
            Ok(_) => "success",
            Err(ServiceError::Locked { .. }) => "locked",
            Err(ServiceError::InvalidCredentials) => "invalid_credentials",
            Err(_) => "error",
        });

        result
    }

    #[instrument(skip(self, password, client), fields(account_id = tracing::field::Empty))]
    async fn run_login(
        &self,
        email: &str,
        password: Password,
        client: &ClientContext,
    ) -> Result<LoginOutcome, ServiceError> {
        // Account lookup
        let Some(account) = self.accounts.find_by_email(email).await? else {
            self.burn_dummy_verification(password).await?;
            self.audit_login_failure(
                None,
                client,
                json!({ "reason": "user_not_found", "email": email }),
            )
            .await?;
            tracing::info!("Login failed: unknown email");
            return Err(ServiceError::InvalidCredentials);
        };
        tracing::Span::current().record("account_id", tracing::field::display(account.account_id));

        // Lock check
        if let Some(until) = self.accounts.active_lock(&account).await? {
            self.audit_login_failure(
                Some(account.account_id),
                client,
                json!({ "reason": "account_locked", "locked_until": until }),
            )
            .await?;
            tracing::info!(locked_until = %until, "Login refused: account locked");
            return Err(ServiceError::Locked { until });
        }

        // Credential check
        let verified = self
            .verify_password(password, PasswordHashString::new(account.password_hash.clone()))
            .await?;

        if !verified {
            return self.handle_bad_password(&account, client).await;
        }

        self.accounts.reset_failed_attempts(&account.email).await?;
        let session = self.sessions.create(account.account_id, client).await?;

        let audited = self
            .ledger
            .append(
                Some(account.account_id),
                AuditEventType::LoginSuccess,
                client,
                AuditOutcome::Success,
                json!({ "method": "password" }),
            )
            .await;

        if let Err(e) = audited {
            if let Err(undo) = self.sessions.discard(&session.token).await {
                tracing::error!(error = %undo, "Failed to discard unaudited session");
            }
            return Err(e);
        }

        tracing::info!("Login succeeded");
        Ok(LoginOutcome { session, account })
    }

    async fn handle_bad_password(
        &self,
        account: &Account,
        client: &ClientContext,
    ) -> Result<LoginOutcome, ServiceError> {
        let failure = self.accounts.register_failure(&account.email).await?;

        if let Some(until) = failure.locked_until {
            let audited = self
                .ledger
                .append(
                    Some(account.account_id),
                    AuditEventType::AccountLocked,
                    client,
                    AuditOutcome::Failure,
                    json!({ "failed_attempts": failure.attempts, "locked_until": until }),
                )
                .await;

            if let Err(e) = audited {
                self.revert_failure(account, true).await;
                return Err(e);
            }
            metrics::record_lockout();
        }

        let audited = self
            .audit_login_failure(
                Some(account.account_id),
                client,
                json!({ "reason": "invalid_password", "failed_attempts": failure.attempts }),
            )
            .await;

        if let Err(e) = audited {
            // An audited lock already records this attempt
            if failure.locked_until.is_none() {
                self.revert_failure(account, false).await;
            }
            return Err(e);
        }

        match failure.locked_until {
            Some(until) => Err(ServiceError::Locked { until }),
            None => Err(ServiceError::InvalidCredentials),
        }
    }

    async fn revert_failure(&self, account: &Account, clear_lock: bool) {
        tracing::error!(
            account_id = %account.account_id,
            clear_lock,
            "Failed attempt could not be audited, rolling back"
        );
        if let Err(e) = self.accounts.revert_failure(&account.email, clear_lock).await {
            tracing::error!(error = %e, "Failed to roll back unaudited failed attempt");
        }
    }

    async fn audit_login_failure(
        &self,
        account_id: Option<Uuid>,
        client: &ClientContext,
        details: serde_json::Value,
    ) -> Result<(), ServiceError> {
        self.ledger
            .append(
                account_id,
                AuditEventType::LoginFailure,
                client,
                AuditOutcome::Failure,
                details,
            )
            .await?;
        Ok(())
    }

    /// End a session at the holder's request. Unknown tokens are ignored.
    pub async fn logout(&self, token: &str, client: &ClientContext) -> Result<(), ServiceError> {
        self.sessions
            .invalidate(token, LogoutReason::Explicit, client)
            .await?;
        Ok(())
    }

    /// Validate and slide a bearer session.
    pub async fn validate_session(&self, token: &str) -> Result<AuthContext, ServiceError> {
        let session = self
            .sessions
            .validate_and_extend(token)
            .await?
            .ok_or_else(|| ServiceError::Unauthorized("Session expired or invalid".to_string()))?;

        let account = self
            .accounts
            .find_by_id(session.account_id)
            .await?
            .ok_or_else(|| ServiceError::Unauthorized("Session expired or invalid".to_string()))?;

        Ok(AuthContext {
            session,
            principal: account.principal(),
        })
    }

    /// Change the password of the session holder. Every other session of the
    /// account is invalidated; the calling session stays usable.
    pub async fn change_password(
        &self,
        auth: &AuthContext,
        current_password: Password,
        new_password: Password,
        client: &ClientContext,
    ) -> Result<(), ServiceError> {
        let this = self.clone();
        let auth = auth.clone();
        let client = client.clone();
        run_detached("password change", async move {
            this.run_change_password(&auth, current_password, new_password, &client)
                .await
        })
        .await
    }

    #[instrument(skip_all, fields(account_id = %auth.principal.account_id))]
    async fn run_change_password(
        &self,
        auth: &AuthContext,
        current_password: Password,
        new_password: Password,
        client: &ClientContext,
    ) -> Result<(), ServiceError> {
        let account = self.accounts.get(auth.principal.account_id).await?;

        let verified = self
            .verify_password(
                current_password.clone(),
                PasswordHashString::new(account.password_hash.clone()),
            )
            .await?;

        if !verified {
            self.ledger
                .append(
                    Some(account.account_id),
                    AuditEventType::PasswordChanged,
                    client,
                    AuditOutcome::Failure,
                    json!({ "reason": "invalid_current_password" }),
                )
                .await?;
            return Err(ServiceError::InvalidCredentials);
        }

        if current_password.as_str() == new_password.as_str() {
            return Err(ServiceError::Validation(
                "New password must differ from the current password".to_string(),
            ));
        }

        let strength = check_strength(new_password.as_str());
        if !strength.valid {
            return Err(ServiceError::WeakPassword(strength.reasons()));
        }

        let password_hash = self.hash_password(new_password).await?;

        let change = PasswordChange {
            password_hash,
            keep_session: Some(auth.session.token.clone()),
            clear_lockout: false,
            method: "change",
        };
        let mut undo = PasswordRollback::new(account);
        match self.replace_password(change, &mut undo, client).await {
            Ok(invalidated) => {
                tracing::info!(sessions_invalidated = invalidated, "Password changed");
                Ok(())
            }
            Err(e) => {
                self.roll_back_password(undo).await;
                Err(e)
            }
        }
    }

    /// Apply a new password hash, end sessions and write the
    /// `password_changed` record. Every write is noted in `undo` as it lands.
    async fn replace_password(
        &self,
        change: PasswordChange,
        undo: &mut PasswordRollback,
        client: &ClientContext,
    ) -> Result<usize, ServiceError> {
        let account_id = undo.account.account_id;

        self.accounts
            .update_password_hash(account_id, change.password_hash.as_str())
            .await?;
        undo.hash_replaced = true;

        undo.sessions = match &change.keep_session {
            Some(token) => self.sessions.invalidate_all_except(account_id, token).await?,
            None => self.sessions.invalidate_all(account_id).await?,
        };

        if change.clear_lockout {
            self.accounts.unlock(&undo.account.email).await?;
            undo.lockout_cleared = true;
        }

        self.ledger
            .append(
                Some(account_id),
                AuditEventType::PasswordChanged,
                client,
                AuditOutcome::Success,
                json!({
                    "method": change.method,
                    "reason": LogoutReason::PasswordChange.as_str(),
                    "sessions_invalidated": undo.sessions.len(),
                }),
            )
            .await?;

        Ok(undo.sessions.len())
    }

    /// Take back, newest first, the writes of a password change that failed.
    async fn roll_back_password(&self, undo: PasswordRollback) {
        let account = &undo.account;
        tracing::error!(
            account_id = %account.account_id,
            "Password change could not be completed, rolling back"
        );

        if undo.lockout_cleared {
            if let Err(e) = self.accounts.restore_lockout(account).await {
                tracing::error!(error = %e, "Failed to restore lockout state");
            }
        }

        self.sessions.restore(&undo.sessions).await;

        if undo.hash_replaced {
            if let Err(e) = self
                .accounts
                .update_password_hash(account.account_id, &account.password_hash)
                .await
            {
                tracing::error!(error = %e, "Failed to restore previous password hash");
            }
        }

        if let Some(token_hash) = &undo.reset_token_hash {
            self.release_reset_token(token_hash).await;
        }
    }

    async fn release_reset_token(&self, token_hash: &str) {
        if let Err(e) = self.reset_tokens.release_reset_token(token_hash).await {
            tracing::error!(error = %e, "Failed to release reset token");
        }
    }

    /// Start a password reset. The answer is the same whether or not the
    /// email is registered.
    #[instrument(skip_all)]
    pub async fn request_password_reset(
        &self,
        email: &str,
        client: &ClientContext,
    ) -> Result<(), ServiceError> {
        let email = normalize_email(email);

        let Some(account) = self.accounts.find_by_email(&email).await? else {
            self.ledger
                .append(
                    None,
                    AuditEventType::PasswordResetRequested,
                    client,
                    AuditOutcome::Failure,
                    json!({ "reason": "user_not_found", "email": email }),
                )
                .await?;
            return Ok(());
        };

        let token = generate_token();
        let now = self.clock.now();
        let record = PasswordResetToken::new(
            hash_token(&token),
            account.account_id,
            account.email.clone(),
            now,
            self.reset_ttl,
        );

        self.reset_tokens
            .insert_reset_token(&record)
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => {
                    ServiceError::Internal(anyhow::anyhow!("reset token collision"))
                }
                other => ServiceError::Store(other),
            })?;

        self.ledger
            .append(
                Some(account.account_id),
                AuditEventType::PasswordResetRequested,
                client,
                AuditOutcome::Success,
                json!({ "expires_at": record.expires_at }),
            )
            .await?;

        if let Err(e) = self
            .notifier
            .send_password_reset(&account.email, &token)
            .await
        {
            tracing::error!(
                account_id = %account.account_id,
                error = %e,
                "Failed to deliver password reset"
            );
        }

        Ok(())
    }

    /// Complete a reset with a token from [`request_password_reset`](Self::request_password_reset).
    ///
    /// Consumes the token, replaces the password, ends every session of the
    /// account and clears any lockout. If the change cannot be audited all
    /// of that is undone and the token stays usable.
    pub async fn confirm_password_reset(
        &self,
        token: &str,
        new_password: Password,
        client: &ClientContext,
    ) -> Result<(), ServiceError> {
        let strength = check_strength(new_password.as_str());
        if !strength.valid {
            return Err(ServiceError::WeakPassword(strength.reasons()));
        }

        let this = self.clone();
        let token_hash = hash_token(token);
        let client = client.clone();
        run_detached("password reset", async move {
            this.run_confirm_reset(&token_hash, new_password, &client)
                .await
        })
        .await
    }

    #[instrument(skip_all)]
    async fn run_confirm_reset(
        &self,
        token_hash: &str,
        new_password: Password,
        client: &ClientContext,
    ) -> Result<(), ServiceError> {
        let record = self
            .reset_tokens
            .consume_reset_token(token_hash, self.clock.now())
            .await?
            .ok_or_else(|| ServiceError::Validation("Invalid or expired reset token".to_string()))?;

        let prepared = async {
            let account = self.accounts.get(record.account_id).await?;
            let password_hash = self.hash_password(new_password).await?;
            Ok::<_, ServiceError>((account, password_hash))
        }
        .await;

        let (account, password_hash) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                self.release_reset_token(token_hash).await;
                return Err(e);
            }
        };

        let change = PasswordChange {
            password_hash,
            keep_session: None,
            clear_lockout: true,
            method: "reset",
        };
        let mut undo = PasswordRollback::new(account);
        undo.reset_token_hash = Some(token_hash.to_string());

        match self.replace_password(change, &mut undo, client).await {
            Ok(_) => {
                tracing::info!(account_id = %undo.account.account_id, "Password reset completed");
                Ok(())
            }
            Err(e) => {
                self.roll_back_password(undo).await;
                Err(e)
            }
        }
    }

    /// Replace the profile of the session holder.
    pub async fn update_profile(
        &self,
        auth: &AuthContext,
        profile: Profile,
        client: &ClientContext,
    ) -> Result<Account, ServiceError> {
        let this = self.clone();
        let account_id = auth.principal.account_id;
        let client = client.clone();
        run_detached("profile update", async move {
            this.run_update_profile(account_id, profile, &client).await
        })
        .await
    }

    async fn run_update_profile(
        &self,
        account_id: Uuid,
        profile: Profile,
        client: &ClientContext,
    ) -> Result<Account, ServiceError> {
        let before = self.accounts.get(account_id).await?;
        let changed = changed_profile_fields(&before.profile, &profile);

        let updated = self.accounts.update_profile(account_id, &profile).await?;

        let audited = self
            .ledger
            .append(
                Some(account_id),
                AuditEventType::ProfileUpdated,
                client,
                AuditOutcome::Success,
                json!({ "fields": changed }),
            )
            .await;

        if let Err(e) = audited {
            if let Err(undo) = self.accounts.update_profile(account_id, &before.profile).await {
                tracing::error!(error = %undo, "Failed to restore unaudited profile change");
            }
            return Err(e);
        }

        Ok(updated)
    }

    async fn hash_password(&self, password: Password) -> Result<PasswordHashString, ServiceError> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("hashing task failed: {}", e)))?
            .map_err(ServiceError::Internal)
    }

    async fn verify_password(
        &self,
        password: Password,
        password_hash: PasswordHashString,
    ) -> Result<bool, ServiceError> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &password_hash))
            .await
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("verify task failed: {}", e)))
    }

    async fn burn_dummy_verification(&self, password: Password) -> Result<(), ServiceError> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.verify_dummy(&password))
            .await
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("verify task failed: {}", e)))
    }

    /// When the lock on an account lifts, for callers that only have the email.
    pub async fn locked_until(&self, email: &str) -> Result<Option<DateTime<Utc>>, ServiceError> {
        match self.accounts.find_by_email(email).await? {
            Some(account) => self.accounts.active_lock(&account).await,
            None => Ok(None),
        }
    }
}

/// A new password and what else goes with it.
struct PasswordChange {
    password_hash: PasswordHashString,
    /// Session left alive; `None` ends every session.
    keep_session: Option<String>,
    clear_lockout: bool,
    method: &'static str,
}

/// Writes already applied on behalf of one password change.
struct PasswordRollback {
    /// The account as loaded before any write.
    account: Account,
    hash_replaced: bool,
    sessions: Vec<String>,
    lockout_cleared: bool,
    reset_token_hash: Option<String>,
}

impl PasswordRollback {
    fn new(account: Account) -> Self {
        Self {
            account,
            hash_replaced: false,
            sessions: Vec::new(),
            lockout_cleared: false,
            reset_token_hash: None,
        }
    }
}

fn changed_profile_fields(before: &Profile, after: &Profile) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if before.name != after.name {
        fields.push("name");
    }
    if before.date_of_birth != after.date_of_birth {
        fields.push("date_of_birth");
    }
    if before.phone != after.phone {
        fields.push("phone");
    }
    if before.address != after.address {
        fields.push("address");
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changed_profile_fields() {
        let before = Profile::default();
        let after = Profile {
            name: "Alice".to_string(),
            phone: Some("555-0100".to_string()),
            ..Profile::default()
        };
        assert_eq!(changed_profile_fields(&before, &after), vec!["name", "phone"]);
        assert!(changed_profile_fields(&after, &after).is_empty());
    }
}
