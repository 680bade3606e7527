//! Audit ledger queries for administrators.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::admin::{AuditEventsResponse, AuditQueryParams},
    models::AuditEventType,
    services::IntegrityReport,
    AppState,
};

/// Audit trail of one account, newest first
#[utoipa::path(
    get,
    path = "/admin/audit/accounts/{account_id}",
    params(
        ("account_id" = Uuid, Path, description = "Account whose events are listed"),
        AuditQueryParams
    ),
    responses(
        (status = 200, description = "Audit events", body = AuditEventsResponse),
        (status = 403, description = "Insufficient role", body = ErrorResponse),
        (status = 422, description = "Invalid paging", body = ErrorResponse)
    ),
    tag = "Audit",
    security(
        ("bearer_auth" = [])
    )
)]
#[tracing::instrument(skip(state, params))]
pub async fn events_for_account(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    Query(params): Query<AuditQueryParams>,
) -> Result<Json<AuditEventsResponse>, AppError> {
    params.validate()?;

    let events = state
        .ledger
        .find_by_account(account_id, &params.to_query())
        .await?;
    Ok(Json(events.into()))
}

/// Audit events of one type, newest first
#[utoipa::path(
    get,
    path = "/admin/audit/types/{event_type}",
    params(
        ("event_type" = String, Path, description = "Event type, e.g. login_failure"),
        AuditQueryParams
    ),
    responses(
        (status = 200, description = "Audit events", body = AuditEventsResponse),
        (status = 400, description = "Unknown event type", body = ErrorResponse),
        (status = 403, description = "Insufficient role", body = ErrorResponse)
    ),
    tag = "Audit",
    security(
        ("bearer_auth" = [])
    )
)]
#[tracing::instrument(skip(state, params))]
pub async fn events_by_type(
    State(state): State<AppState>,
    Path(event_type): Path<String>,
    Query(params): Query<AuditQueryParams>,
) -> Result<Json<AuditEventsResponse>, AppError> {
    params.validate()?;

    let event_type = event_type
        .parse::<AuditEventType>()
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!(e)))?;

    let events = state
        .ledger
        .find_by_type(event_type, &params.to_query())
        .await?;
    Ok(Json(events.into()))
}

/// Replay the hash chain and report every broken link
#[utoipa::path(
    get,
    path = "/admin/audit/integrity",
    responses(
        (status = 200, description = "Verification report", body = IntegrityReport),
        (status = 403, description = "Insufficient role", body = ErrorResponse)
    ),
    tag = "Audit",
    security(
        ("bearer_auth" = [])
    )
)]
#[tracing::instrument(skip(state))]
pub async fn verify_integrity(
    State(state): State<AppState>,
) -> Result<Json<IntegrityReport>, AppError> {
    let report = state.ledger.verify_integrity().await?;

    if !report.is_valid {
        tracing::error!(
            broken_links = report.broken_links.len(),
            total_entries = report.total_entries,
            "Audit chain verification failed"
        );
    }

    Ok(Json(report))
}
