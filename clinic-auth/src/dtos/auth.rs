use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::models::{AccountResponse, PostalAddress, Profile};

/// Password rules are checked by the service so that every violated rule is
/// reported at once; the DTO only requires presence.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "alice@example.com")]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    #[schema(example = "Str0ng!Pass")]
    pub password: String,

    #[validate(length(min = 1, max = 200, message = "Name is required"))]
    #[schema(example = "Alice Smith")]
    pub name: String,

    #[schema(example = "1990-04-12")]
    pub date_of_birth: Option<NaiveDate>,

    #[validate(length(max = 32, message = "Phone number is too long"))]
    #[schema(example = "+1 555 0100")]
    pub phone: Option<String>,

    pub address: Option<PostalAddress>,
}

impl RegisterRequest {
    pub fn profile(&self) -> Profile {
        Profile {
            name: self.name.trim().to_string(),
            date_of_birth: self.date_of_birth,
            phone: self.phone.clone(),
            address: self.address.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "alice@example.com")]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    #[schema(example = "Str0ng!Pass")]
    pub password: String,
}

/// Issued on login and registration. The token is the bearer credential.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    #[schema(example = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08")]
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub account: AccountResponse,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,

    #[validate(length(min = 1, message = "New password is required"))]
    pub new_password: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PasswordResetRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "alice@example.com")]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PasswordResetConfirm {
    #[validate(length(min = 1, message = "Token is required"))]
    #[schema(example = "a1b2c3d4e5f6...")]
    pub token: String,

    #[validate(length(min = 1, message = "New password is required"))]
    #[schema(example = "N3w!Passw0rd")]
    pub new_password: String,
}

/// Partial profile update; absent fields are left unchanged.
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 200, message = "Name must not be empty"))]
    pub name: Option<String>,

    pub date_of_birth: Option<NaiveDate>,

    #[validate(length(max = 32, message = "Phone number is too long"))]
    pub phone: Option<String>,

    pub address: Option<PostalAddress>,
}

impl UpdateProfileRequest {
    pub fn apply_to(self, mut profile: Profile) -> Profile {
        if let Some(name) = self.name {
            profile.name = name.trim().to_string();
        }
        if let Some(dob) = self.date_of_birth {
            profile.date_of_birth = Some(dob);
        }
        if let Some(phone) = self.phone {
            profile.phone = Some(phone);
        }
        if let Some(address) = self.address {
            profile.address = Some(address);
        }
        profile
    }
}
