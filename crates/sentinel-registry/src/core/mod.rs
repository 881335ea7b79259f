//! Core logic for the registry

mod authorization;
mod failover;
mod health;

pub use authorization::{AdminAuthorizer, AuthorizationError, DEFAULT_PRINCIPAL};
pub use failover::{FailoverManager, INTERNAL_SOURCE};
pub use health::{HealthMonitor, HealthProbe, HttpProbe};
