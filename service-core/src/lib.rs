//! service-core: Shared infrastructure for the ldap-sync workspace.
pub mod config;
pub mod error;
pub mod observability;
pub mod retry;

pub use axum;
pub use tokio;
pub use tracing;
