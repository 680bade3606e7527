use serde_json::json;
use tracing::instrument;
use uuid::Uuid;

use super::accounts::AccountService;
use super::audit::AuditLedger;
use super::error::ServiceError;
use super::run_detached;
use super::sessions::SessionManager;
use crate::models::{
    Account, AuditEventType, AuditOutcome, ClientContext, LogoutReason, Principal, Role,
};

/// Administrative actions on accounts. Callers are gated on `system_admin`
/// before reaching here; each action is still checked against the actor's
/// own role so nobody grants more than they hold.
///
/// Each action runs detached from the caller and is undone if its audit
/// record cannot be written.
#[derive(Clone)]
pub struct AdminService {
    accounts: AccountService,
    sessions: SessionManager,
    ledger: AuditLedger,
}

impl AdminService {
    pub fn new(accounts: AccountService, sessions: SessionManager, ledger: AuditLedger) -> Self {
        Self {
            accounts,
            sessions,
            ledger,
        }
    }

    pub async fn set_role(
        &self,
        actor: &Principal,
        account_id: Uuid,
        role: Role,
        client: &ClientContext,
    ) -> Result<Account, ServiceError> {
        let this = self.clone();
        let actor = actor.clone();
        let client = client.clone();
        run_detached("role change", async move {
            this.run_set_role(&actor, account_id, role, &client).await
        })
        .await
    }

    #[instrument(skip(self, actor, client), fields(actor_id = %actor.account_id))]
    async fn run_set_role(
        &self,
        actor: &Principal,
        account_id: Uuid,
        role: Role,
        client: &ClientContext,
    ) -> Result<Account, ServiceError> {
        let target = self.accounts.get(account_id).await?;

        if !actor.role.dominates(role) || !actor.role.dominates(target.role) {
            self.ledger
                .append(
                    Some(account_id),
                    AuditEventType::RoleChanged,
                    client,
                    AuditOutcome::Failure,
                    json!({
                        "reason": "insufficient_privilege",
                        "actor_id": actor.account_id,
                        "from": target.role.as_str(),
                        "to": role.as_str(),
                    }),
                )
                .await?;
            return Err(ServiceError::Forbidden(
                "Cannot assign or modify a role above your own".to_string(),
            ));
        }

        self.accounts.update_role(account_id, role).await?;

        let audited = self
            .ledger
            .append(
                Some(account_id),
                AuditEventType::RoleChanged,
                client,
                AuditOutcome::Success,
                json!({
                    "actor_id": actor.account_id,
                    "from": target.role.as_str(),
                    "to": role.as_str(),
                }),
            )
            .await;

        if let Err(e) = audited {
            if let Err(undo) = self.accounts.update_role(account_id, target.role).await {
                tracing::error!(error = %undo, "Failed to restore unaudited role change");
            }
            return Err(e);
        }

        tracing::info!(account_id = %account_id, from = %target.role, to = %role, "Role changed");

        self.accounts.get(account_id).await
    }

    pub async fn unlock_account(
        &self,
        actor: &Principal,
        account_id: Uuid,
        client: &ClientContext,
    ) -> Result<(), ServiceError> {
        let this = self.clone();
        let actor = actor.clone();
        let client = client.clone();
        run_detached("unlock", async move {
            this.run_unlock(&actor, account_id, &client).await
        })
        .await
    }

    #[instrument(skip(self, actor, client), fields(actor_id = %actor.account_id))]
    async fn run_unlock(
        &self,
        actor: &Principal,
        account_id: Uuid,
        client: &ClientContext,
    ) -> Result<(), ServiceError> {
        let target = self.accounts.get(account_id).await?;
        self.accounts.unlock(&target.email).await?;

        let audited = self
            .ledger
            .append(
                Some(account_id),
                AuditEventType::AccountUnlocked,
                client,
                AuditOutcome::Success,
                json!({
                    "actor_id": actor.account_id,
                    "was_locked_until": target.locked_until,
                    "failed_attempts": target.failed_login_attempts,
                }),
            )
            .await;

        if let Err(e) = audited {
            if let Err(undo) = self.accounts.restore_lockout(&target).await {
                tracing::error!(error = %undo, "Failed to restore unaudited unlock");
            }
            return Err(e);
        }

        tracing::info!(account_id = %account_id, "Account unlocked by administrator");
        Ok(())
    }

    /// End every session of the account. Returns how many were live.
    pub async fn revoke_sessions(
        &self,
        actor: &Principal,
        account_id: Uuid,
        client: &ClientContext,
    ) -> Result<u64, ServiceError> {
        let this = self.clone();
        let actor = actor.clone();
        let client = client.clone();
        run_detached("session revocation", async move {
            this.run_revoke_sessions(&actor, account_id, &client).await
        })
        .await
    }

    #[instrument(skip(self, actor, client), fields(actor_id = %actor.account_id))]
    async fn run_revoke_sessions(
        &self,
        actor: &Principal,
        account_id: Uuid,
        client: &ClientContext,
    ) -> Result<u64, ServiceError> {
        self.accounts.get(account_id).await?;
        let tokens = self.sessions.invalidate_all(account_id).await?;
        let revoked = tokens.len() as u64;

        let audited = self
            .ledger
            .append(
                Some(account_id),
                AuditEventType::Logout,
                client,
                AuditOutcome::Success,
                json!({
                    "reason": LogoutReason::AdminAction.as_str(),
                    "actor_id": actor.account_id,
                    "sessions_revoked": revoked,
                }),
            )
            .await;

        if let Err(e) = audited {
            self.sessions.restore(&tokens).await;
            return Err(e);
        }

        Ok(revoked)
    }
}
