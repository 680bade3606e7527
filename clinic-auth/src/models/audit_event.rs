//! Audit event model - entries of the hash-chained security ledger.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;
use uuid::Uuid;

use super::ClientContext;

/// Audit event types, stored verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    AccountCreated,
    LoginSuccess,
    LoginFailure,
    Logout,
    PasswordChanged,
    PasswordResetRequested,
    ProfileUpdated,
    RoleChanged,
    AccessGranted,
    AccessDenied,
    AccountLocked,
    AccountUnlocked,
    MfaSetup,
    MfaEnabled,
    MfaDisabled,
    MfaVerificationSuccess,
    MfaVerificationFailure,
    MfaBackupCodesRegenerated,
    TrustedDeviceRemoved,
}

impl AuditEventType {
    pub const ALL: [AuditEventType; 19] = [
        AuditEventType::AccountCreated,
        AuditEventType::LoginSuccess,
        AuditEventType::LoginFailure,
        AuditEventType::Logout,
        AuditEventType::PasswordChanged,
        AuditEventType::PasswordResetRequested,
        AuditEventType::ProfileUpdated,
        AuditEventType::RoleChanged,
        AuditEventType::AccessGranted,
        AuditEventType::AccessDenied,
        AuditEventType::AccountLocked,
        AuditEventType::AccountUnlocked,
        AuditEventType::MfaSetup,
        AuditEventType::MfaEnabled,
        AuditEventType::MfaDisabled,
        AuditEventType::MfaVerificationSuccess,
        AuditEventType::MfaVerificationFailure,
        AuditEventType::MfaBackupCodesRegenerated,
        AuditEventType::TrustedDeviceRemoved,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::AccountCreated => "account_created",
            AuditEventType::LoginSuccess => "login_success",
            AuditEventType::LoginFailure => "login_failure",
            AuditEventType::Logout => "logout",
            AuditEventType::PasswordChanged => "password_changed",
            AuditEventType::PasswordResetRequested => "password_reset_requested",
            AuditEventType::ProfileUpdated => "profile_updated",
            AuditEventType::RoleChanged => "role_changed",
            AuditEventType::AccessGranted => "access_granted",
            AuditEventType::AccessDenied => "access_denied",
            AuditEventType::AccountLocked => "account_locked",
            AuditEventType::AccountUnlocked => "account_unlocked",
            AuditEventType::MfaSetup => "mfa_setup",
            AuditEventType::MfaEnabled => "mfa_enabled",
            AuditEventType::MfaDisabled => "mfa_disabled",
            AuditEventType::MfaVerificationSuccess => "mfa_verification_success",
            AuditEventType::MfaVerificationFailure => "mfa_verification_failure",
            AuditEventType::MfaBackupCodesRegenerated => "mfa_backup_codes_regenerated",
            AuditEventType::TrustedDeviceRemoved => "trusted_device_removed",
        }
    }
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuditEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AuditEventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Invalid audit event type: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failure,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Failure => "failure",
        }
    }
}

impl std::str::FromStr for AuditOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(AuditOutcome::Success),
            "failure" => Ok(AuditOutcome::Failure),
            _ => Err(format!("Invalid audit outcome: {}", s)),
        }
    }
}

/// An event that has not been sequenced or hashed yet.
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub account_id: Option<Uuid>,
    pub event_type: AuditEventType,
    pub ip_address: String,
    pub user_agent: String,
    pub outcome: AuditOutcome,
    pub details: serde_json::Value,
}

impl NewAuditEvent {
    pub fn new(
        account_id: Option<Uuid>,
        event_type: AuditEventType,
        client: &ClientContext,
        outcome: AuditOutcome,
        details: serde_json::Value,
    ) -> Self {
        Self {
            account_id,
            event_type,
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
            outcome,
            details,
        }
    }
}

/// A sealed ledger entry. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AuditEvent {
    pub sequence: i64,
    pub account_id: Option<Uuid>,
    pub event_type: AuditEventType,
    pub timestamp: DateTime<Utc>,
    pub ip_address: String,
    pub user_agent: String,
    pub outcome: AuditOutcome,
    #[schema(value_type = Object)]
    pub details: serde_json::Value,
    pub previous_hash: String,
    pub hash: String,
}

impl AuditEvent {
    /// Assign position and link the draft to its predecessor.
    pub fn seal(
        draft: NewAuditEvent,
        sequence: i64,
        previous_hash: String,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let mut event = Self {
            sequence,
            account_id: draft.account_id,
            event_type: draft.event_type,
            timestamp,
            ip_address: draft.ip_address,
            user_agent: draft.user_agent,
            outcome: draft.outcome,
            details: draft.details,
            previous_hash,
            hash: String::new(),
        };
        event.hash = event.expected_hash();
        event
    }

    /// Recompute this event's hash from its stored fields.
    pub fn expected_hash(&self) -> String {
        chain_hash(
            &self.previous_hash,
            self.account_id,
            self.event_type,
            self.timestamp,
            &self.ip_address,
            &self.user_agent,
            self.outcome,
            &self.details,
        )
    }
}

/// `SHA-256(previous ∥ account ∥ type ∥ timestamp ∥ ip ∥ client ∥ outcome ∥ details)`,
/// hex encoded. A missing account contributes the empty string.
#[allow(clippy::too_many_arguments)]
pub fn chain_hash(
    previous_hash: &str,
    account_id: Option<Uuid>,
    event_type: AuditEventType,
    timestamp: DateTime<Utc>,
    ip_address: &str,
    user_agent: &str,
    outcome: AuditOutcome,
    details: &serde_json::Value,
) -> String {
    let account = account_id.map(|id| id.to_string()).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(previous_hash.as_bytes());
    hasher.update(account.as_bytes());
    hasher.update(event_type.as_str().as_bytes());
    hasher.update(format_timestamp(timestamp).as_bytes());
    hasher.update(ip_address.as_bytes());
    hasher.update(user_agent.as_bytes());
    hasher.update(outcome.as_str().as_bytes());
    hasher.update(serialize_details(details).as_bytes());
    hex::encode(hasher.finalize())
}

/// RFC 3339 with microsecond precision, the resolution every store keeps.
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Canonical JSON text of the details map (object keys are sorted).
pub fn serialize_details(details: &serde_json::Value) -> String {
    serde_json::to_string(details).unwrap_or_default()
}
