pub mod account;
pub mod audit_event;
pub mod password_reset;
pub mod role;
pub mod session;

pub use account::{normalize_email, Account, AccountResponse, PostalAddress, Principal, Profile};
pub use audit_event::{AuditEvent, AuditEventType, AuditOutcome, NewAuditEvent};
pub use password_reset::PasswordResetToken;
pub use role::Role;
pub use session::{ClientContext, LogoutReason, Session, SessionInfo};
