use chrono::{DateTime, Utc};
use service_core::error::AppError;
use thiserror::Error;

use crate::store::StoreError;

/// Failures at the security-core boundary.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Password does not meet the strength requirements")]
    WeakPassword(Vec<String>),

    #[error("{0} not found")]
    NotFound(&'static str),

    /// Same message for unknown email and wrong password.
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Account locked until {until}")]
    Locked { until: DateTime<Utc> },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Audit integrity violation: {0}")]
    IntegrityViolation(String),

    /// The audit record for a security decision could not be written.
    #[error("Audit write failed: {0}")]
    AuditWrite(anyhow::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(e) => AppError::BadRequest(anyhow::anyhow!(e)),
            ServiceError::WeakPassword(reasons) => AppError::Unprocessable {
                message: "Password does not meet the strength requirements".to_string(),
                reasons,
            },
            ServiceError::NotFound(what) => {
                AppError::NotFound(anyhow::anyhow!("{} not found", what))
            }
            ServiceError::InvalidCredentials => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid email or password"))
            }
            ServiceError::Unauthorized(e) => AppError::Unauthorized(anyhow::anyhow!(e)),
            ServiceError::Locked { until } => AppError::Locked {
                message: "Account is temporarily locked".to_string(),
                until,
            },
            ServiceError::Conflict(e) => AppError::Conflict(anyhow::anyhow!(e)),
            ServiceError::Forbidden(e) => AppError::Forbidden(anyhow::anyhow!(e)),
            ServiceError::IntegrityViolation(e) => AppError::IntegrityViolation(e),
            ServiceError::AuditWrite(e) => {
                tracing::error!(error = %e, "Rejecting operation: audit write failed");
                AppError::ServiceUnavailable
            }
            ServiceError::Store(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}
