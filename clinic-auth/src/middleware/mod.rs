pub mod auth;
pub mod metrics;
pub mod role;

pub use auth::{session_middleware, AuthSession, Client, SESSION_COOKIE};
pub use metrics::metrics_middleware;
pub use role::{require_role, require_system_admin};
