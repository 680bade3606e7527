//! Services layer for clinic-auth.
//!
//! The security core: audit ledger, account lockout, sessions, the login
//! orchestrator, and role-based access decisions.

pub mod access;
mod accounts;
mod admin;
pub mod audit;
mod auth;
mod cleanup;
pub mod error;
pub mod metrics;
mod notifier;
pub mod policy;
mod sessions;

pub use access::{get_level, has_minimum_role, AccessGate, Permission, RoleResolver};
pub use accounts::{AccountService, FailureOutcome, LockoutPolicy};
pub use admin::AdminService;
pub use audit::{AuditLedger, BreakKind, BrokenLink, IntegrityReport};
pub use auth::{AuthContext, AuthService, LoginOutcome, DEFAULT_RESET_TTL_MINUTES};
pub use cleanup::SessionCleanupWorker;
pub use error::ServiceError;
pub use notifier::{LogNotifier, MockNotifier, ResetNotifier};
pub use policy::{check_strength, PolicyError, StrengthReport};
pub use sessions::{SessionManager, DEFAULT_SESSION_TTL_MINUTES};

use std::future::Future;

/// Drive `work` to completion on its own task. Dropping the caller's future
/// no longer stops the sequence between a write and its audit record.
pub(crate) async fn run_detached<T, F>(name: &'static str, work: F) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(work)
        .await
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("{} task failed: {}", name, e)))?
}
