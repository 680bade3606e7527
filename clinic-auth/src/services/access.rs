//! Role/permission resolution and the audited access gate.

use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use super::audit::AuditLedger;
use super::error::ServiceError;
use super::metrics;
use crate::models::{AuditEventType, AuditOutcome, ClientContext, Principal, Role};

pub fn get_level(role: Role) -> u8 {
    role.level()
}

/// `user` satisfies `required` if it is that role or sits on a strictly
/// higher level. Lateral peers (nurse, billing clerk) do not satisfy each other.
pub fn has_minimum_role(user: Role, required: Role) -> bool {
    user.dominates(required)
}

/// A dynamic entitlement: `role` may perform `action` on `resource`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Permission {
    pub role: Role,
    pub action: String,
    pub resource: String,
}

impl Permission {
    pub fn new(role: Role, action: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            role,
            action: action.into(),
            resource: resource.into(),
        }
    }
}

/// Per-deployment permission table layered on top of the hierarchy.
///
/// Grants are additive only: a grant to a role is inherited by every role
/// that dominates it, and nothing here can take away what the hierarchy
/// already allows.
#[derive(Debug, Default)]
pub struct RoleResolver {
    permissions: RwLock<HashSet<Permission>>,
}

impl RoleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_permissions(permissions: impl IntoIterator<Item = Permission>) -> Self {
        Self {
            permissions: RwLock::new(permissions.into_iter().collect()),
        }
    }

    /// Returns `false` if the triple was already granted.
    pub fn grant(&self, permission: Permission) -> bool {
        self.permissions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(permission)
    }

    pub fn revoke(&self, permission: &Permission) -> bool {
        self.permissions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(permission)
    }

    /// Explicit grant to `role` or to any role it dominates.
    pub fn is_permitted(&self, role: Role, action: &str, resource: &str) -> bool {
        self.permissions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|p| p.action == action && p.resource == resource && role.dominates(p.role))
    }

    /// Hierarchy check, falling back to the permission table.
    pub fn allows(&self, role: Role, required: Role, action: &str, resource: &str) -> bool {
        has_minimum_role(role, required) || self.is_permitted(role, action, resource)
    }
}

/// Gate in front of protected operations. Every decision is written to the
/// ledger before it takes effect; if that write fails the request is refused.
#[derive(Clone)]
pub struct AccessGate {
    ledger: AuditLedger,
    resolver: Arc<RoleResolver>,
}

impl AccessGate {
    pub fn new(ledger: AuditLedger, resolver: Arc<RoleResolver>) -> Self {
        Self { ledger, resolver }
    }

    pub fn resolver(&self) -> &RoleResolver {
        &self.resolver
    }

    /// Require at least `required` (or an explicit grant for `action` on
    /// `resource`). `Forbidden` on denial.
    pub async fn authorize(
        &self,
        principal: &Principal,
        required: Role,
        action: &str,
        resource: &str,
        client: &ClientContext,
    ) -> Result<(), ServiceError> {
        let granted = self
            .resolver
            .allows(principal.role, required, action, resource);

        let (event_type, outcome) = if granted {
            (AuditEventType::AccessGranted, AuditOutcome::Success)
        } else {
            (AuditEventType::AccessDenied, AuditOutcome::Failure)
        };

        self.ledger
            .append(
                Some(principal.account_id),
                event_type,
                client,
                outcome,
                json!({
                    "resource": resource,
                    "action": action,
                    "user_role": principal.role.as_str(),
                    "required_role": required.as_str(),
                }),
            )
            .await?;

        metrics::record_access_decision(granted);

        if granted {
            Ok(())
        } else {
            tracing::warn!(
                account_id = %principal.account_id,
                role = %principal.role,
                required = %required,
                resource,
                "Access denied"
            );
            Err(ServiceError::Forbidden(format!(
                "Requires role {} or higher",
                required
            )))
        }
    }
}
