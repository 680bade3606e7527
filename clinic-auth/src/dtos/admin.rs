use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::models::{AuditEvent, Role};
use crate::store::AuditQuery;

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetRoleRequest {
    #[schema(example = "nurse")]
    pub role: Role,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RevokeSessionsResponse {
    #[schema(example = 2)]
    pub sessions_revoked: u64,
}

/// Date range and paging for audit lookups.
#[derive(Debug, Deserialize, Validate, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuditQueryParams {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    #[validate(range(min = 1, max = 1000, message = "limit must be between 1 and 1000"))]
    #[param(example = 50)]
    pub limit: Option<i64>,
    #[validate(range(min = 0, message = "offset must not be negative"))]
    pub offset: Option<i64>,
}

impl AuditQueryParams {
    pub fn to_query(&self) -> AuditQuery {
        AuditQuery::new(self.limit.unwrap_or(100), self.offset.unwrap_or(0))
            .between(self.from, self.to)
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuditEventsResponse {
    pub count: usize,
    pub events: Vec<AuditEvent>,
}

impl From<Vec<AuditEvent>> for AuditEventsResponse {
    fn from(events: Vec<AuditEvent>) -> Self {
        Self {
            count: events.len(),
            events,
        }
    }
}
