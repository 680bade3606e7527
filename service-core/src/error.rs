use axum::{
    Json,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    /// Request rejected with a list of specific, actionable reasons
    /// (e.g. every password rule that was violated).
    #[error("Unprocessable: {message}")]
    Unprocessable {
        message: String,
        reasons: Vec<String>,
    },

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Unauthorized: {0}")]
    Unauthorized(anyhow::Error),

    #[error("Forbidden: {0}")]
    Forbidden(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    #[error("Locked until {until}")]
    Locked {
        message: String,
        until: DateTime<Utc>,
    },

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Service Unavailable")]
    ServiceUnavailable,

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Audit integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    locked_until: Option<DateTime<Utc>>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut reasons = Vec::new();
        let mut locked_until = None;

        let (status, error_message, details) = match self {
            AppError::ValidationError(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Validation error".to_string(),
                Some(err.to_string()),
            ),
            AppError::BadRequest(err) => (StatusCode::BAD_REQUEST, err.to_string(), None),
            AppError::Unprocessable {
                message,
                reasons: r,
            } => {
                reasons = r;
                (StatusCode::UNPROCESSABLE_ENTITY, message, None)
            }
            AppError::NotFound(err) => (StatusCode::NOT_FOUND, err.to_string(), None),
            AppError::Unauthorized(err) => (StatusCode::UNAUTHORIZED, err.to_string(), None),
            AppError::Forbidden(err) => (StatusCode::FORBIDDEN, err.to_string(), None),
            AppError::Conflict(err) => (StatusCode::CONFLICT, err.to_string(), None),
            AppError::Locked { message, until } => {
                locked_until = Some(until);
                (StatusCode::LOCKED, message, None)
            }
            AppError::InternalError(err) => {
                tracing::error!(error = ?err, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    None,
                )
            }
            AppError::ServiceUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service unavailable".to_string(),
                None,
            ),
            AppError::DatabaseError(err) => {
                tracing::error!(error = %err, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                    None,
                )
            }
            AppError::IntegrityViolation(msg) => {
                tracing::error!(details = %msg, "Audit integrity violation");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Audit integrity violation".to_string(),
                    Some(msg),
                )
            }
            AppError::ConfigError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Configuration error".to_string(),
                Some(err.to_string()),
            ),
        };

        let mut res = (
            status,
            Json(ErrorResponse {
                error: error_message,
                details,
                reasons,
                locked_until,
            }),
        )
            .into_response();

        if let Some(until) = locked_until {
            let retry = (until - Utc::now()).num_seconds().max(0) as u64;
            res.headers_mut()
                .insert(axum::http::header::RETRY_AFTER, HeaderValue::from(retry));
        }

        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(res: Response) -> serde_json::Value {
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_locked_reports_unlock_time() {
        let until = Utc::now() + chrono::Duration::minutes(15);
        let res = AppError::Locked {
            message: "Account temporarily locked".to_string(),
            until,
        }
        .into_response();

        assert_eq!(res.status(), StatusCode::LOCKED);
        assert!(res.headers().contains_key(axum::http::header::RETRY_AFTER));

        let body = body_json(res).await;
        assert_eq!(body["error"], "Account temporarily locked");
        assert!(body["locked_until"].is_string());
    }

    #[tokio::test]
    async fn test_database_error_hides_details() {
        let res = AppError::DatabaseError(anyhow::anyhow!("relation \"accounts\" does not exist"))
            .into_response();

        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(res).await;
        assert_eq!(body["error"], "Database error");
        assert!(body.get("details").is_none());
    }

    #[tokio::test]
    async fn test_unprocessable_lists_every_reason() {
        let res = AppError::Unprocessable {
            message: "Password does not meet strength requirements".to_string(),
            reasons: vec!["too short".to_string(), "missing digit".to_string()],
        }
        .into_response();

        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(res).await;
        assert_eq!(body["reasons"].as_array().unwrap().len(), 2);
    }
}
