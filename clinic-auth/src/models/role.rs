//! Role model - the fixed privilege hierarchy of the clinic portal.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Portal roles, low to high privilege.
///
/// `Nurse` and `BillingClerk` share a level: they are lateral
/// specialisations and neither inherits the other's capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Patient,
    Receptionist,
    Nurse,
    BillingClerk,
    RecordsManager,
    Doctor,
    Specialist,
    ClinicManager,
    SystemAdmin,
    SuperAdmin,
}

impl Role {
    pub const ALL: [Role; 10] = [
        Role::Patient,
        Role::Receptionist,
        Role::Nurse,
        Role::BillingClerk,
        Role::RecordsManager,
        Role::Doctor,
        Role::Specialist,
        Role::ClinicManager,
        Role::SystemAdmin,
        Role::SuperAdmin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Receptionist => "receptionist",
            Role::Nurse => "nurse",
            Role::BillingClerk => "billing_clerk",
            Role::RecordsManager => "records_manager",
            Role::Doctor => "doctor",
            Role::Specialist => "specialist",
            Role::ClinicManager => "clinic_manager",
            Role::SystemAdmin => "system_admin",
            Role::SuperAdmin => "super_admin",
        }
    }

    /// Privilege level (1 = patient, 9 = super admin).
    pub fn level(&self) -> u8 {
        match self {
            Role::Patient => 1,
            Role::Receptionist => 2,
            Role::Nurse | Role::BillingClerk => 3,
            Role::RecordsManager => 4,
            Role::Doctor => 5,
            Role::Specialist => 6,
            Role::ClinicManager => 7,
            Role::SystemAdmin => 8,
            Role::SuperAdmin => 9,
        }
    }

    /// Whether this role holds every capability of `other`.
    ///
    /// A role dominates itself and every role on a strictly lower level.
    /// Roles sharing a level are peers, not ancestors of each other.
    pub fn dominates(&self, other: Role) -> bool {
        *self == other || self.level() > other.level()
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == normalized)
            .ok_or_else(|| format!("Invalid role: {}", s))
    }
}
