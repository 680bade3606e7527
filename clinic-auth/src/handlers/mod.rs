//! HTTP handlers for clinic-auth.

pub mod admin;
pub mod audit;
pub mod auth;
pub mod metrics;
pub mod user;
