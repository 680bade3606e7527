//! Account model - portal users with credentials and lockout state.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::Role;

/// Postal address stored on an account profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PostalAddress {
    pub street: String,
    pub city: String,
    pub region: String,
    pub postal_code: String,
    pub country: String,
}

/// Mutable, non-security profile fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Profile {
    pub name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub phone: Option<String>,
    pub address: Option<PostalAddress>,
}

/// Account entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub account_id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub profile: Profile,
    pub role: Role,
    pub failed_login_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account. The email is normalised to lowercase.
    pub fn new(
        email: &str,
        password_hash: String,
        profile: Profile,
        role: Role,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            account_id: Uuid::new_v4(),
            email: normalize_email(email),
            password_hash,
            profile,
            role,
            failed_login_attempts: 0,
            locked_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A lock whose `locked_until` has passed counts as no lock.
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.locked_until, Some(until) if until > now)
    }

    pub fn principal(&self) -> Principal {
        Principal {
            account_id: self.account_id,
            email: self.email.clone(),
            role: self.role,
        }
    }

    /// Convert to sanitized response (no credential or lockout fields).
    pub fn sanitized(&self) -> AccountResponse {
        AccountResponse::from(self)
    }
}

/// Canonical form of an email used for uniqueness and lookups.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// The authenticated identity attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub account_id: Uuid,
    pub email: String,
    pub role: Role,
}

/// Account response for API (without sensitive fields).
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AccountResponse {
    pub account_id: Uuid,
    pub email: String,
    pub role: Role,
    pub profile: Profile,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Account> for AccountResponse {
    fn from(a: &Account) -> Self {
        Self {
            account_id: a.account_id,
            email: a.email.clone(),
            role: a.role,
            profile: a.profile.clone(),
            created_at: a.created_at,
            updated_at: a.updated_at,
        }
    }
}
