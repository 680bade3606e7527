pub mod accounts;

pub use accounts::{revoke_sessions, set_role, unlock_account};
