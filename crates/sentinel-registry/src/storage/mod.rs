//! Storage abstraction for the registry
//!
//! Registrations, health-check history and failover events live behind the
//! `RegistryStore` trait. The in-memory backend is the default; a durable
//! backend only has to honor the same atomicity guarantees:
//! - `set_active`, `commit_rotation` and `swap_active` leave at most one
//!   active record per `(failover_group, type)`
//! - promotion preconditions are re-checked under the same lock that applies
//!   the promotion

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sentinel_core::{
    FailoverType, HealthCheckResult, ServiceDiscoveryRequest, ServiceFailoverEvent,
    ServiceHealthCheck, ServiceRegistration, ServiceStatus, ServiceType,
};
use std::fmt::Debug;
use tracing::debug;

/// Error type for storage operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("Service not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: ServiceStatus,
        to: ServiceStatus,
    },

    #[error("Storage internal error: {0}")]
    Internal(String),
}

/// How probe results drive registration status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    /// Consecutive failures before a record is marked unhealthy
    pub failure_threshold: u32,
    /// Health-check records retained per service
    pub history_limit: usize,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            history_limit: 100,
        }
    }
}

impl HealthPolicy {
    /// Apply one probe result to a registration's counters and status
    ///
    /// Status only moves along the transition table, so rotating and
    /// decommissioned records keep theirs.
    pub fn apply(&self, registration: &mut ServiceRegistration, result: &HealthCheckResult) {
        registration.last_health_check = Some(result.timestamp);
        registration.health_check_count += 1;

        let next = if result.healthy {
            registration.consecutive_failures = 0;
            ServiceStatus::Healthy
        } else {
            registration.failed_health_check_count += 1;
            registration.consecutive_failures = registration.consecutive_failures.saturating_add(1);
            if registration.consecutive_failures < self.failure_threshold {
                return;
            }
            ServiceStatus::Unhealthy
        };

        if let Err(e) = registration.transition_to(next) {
            debug!(
                service_id = %registration.id,
                error = %e,
                "Health result leaves status unchanged"
            );
        }
    }
}

/// Atomic promotion of a rotation target over its source
#[derive(Debug, Clone)]
pub struct RotationCommit {
    pub old_service_id: String,
    pub new_service_id: String,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Atomic change of the active member of a group (failover or failback)
#[derive(Debug, Clone)]
pub struct ActiveSwap {
    pub failover_group: String,
    pub service_type: ServiceType,
    pub from_service_id: String,
    pub to_service_id: String,
    pub reason: String,
    pub failover_type: FailoverType,
    pub at: DateTime<Utc>,
}

/// Storage backend trait for registry state
///
/// Implementations must be thread-safe and support concurrent access.
/// Soft-deleted records are invisible to every read except the history
/// queries.
#[async_trait]
pub trait RegistryStore: Send + Sync + Debug {
    // =========================================================================
    // Registrations
    // =========================================================================

    /// Insert a registration; becomes active if its group/type has no active member
    ///
    /// Fails with `Conflict` when a live record already uses the id.
    async fn register(
        &self,
        registration: ServiceRegistration,
    ) -> Result<ServiceRegistration, StorageError>;

    /// Get a live registration by id
    async fn get(&self, id: &str) -> Result<ServiceRegistration, StorageError>;

    /// All live registrations ordered by type, priority desc, name
    async fn list(&self) -> Result<Vec<ServiceRegistration>, StorageError>;

    /// Discovery query ordered by priority desc, then health-check count desc
    async fn list_by_type(
        &self,
        query: &ServiceDiscoveryRequest,
    ) -> Result<Vec<ServiceRegistration>, StorageError>;

    /// Replace the editable fields of a live record with those of `patched`
    ///
    /// Editable: version, url, health_check_url, priority, metadata,
    /// public_key, signature. Counters, status and activity are untouched.
    async fn update(
        &self,
        patched: ServiceRegistration,
    ) -> Result<ServiceRegistration, StorageError>;

    /// Retire a live record: decommissioned, inactive, soft-deleted
    async fn decommission(&self, id: &str) -> Result<ServiceRegistration, StorageError>;

    /// Apply a probe result and append it to the health history
    async fn mark_health_check(
        &self,
        id: &str,
        result: HealthCheckResult,
    ) -> Result<ServiceRegistration, StorageError>;

    // =========================================================================
    // Failover groups
    // =========================================================================

    /// Make `id` the only active record of its group/type
    async fn set_active(
        &self,
        failover_group: &str,
        service_type: ServiceType,
        id: &str,
    ) -> Result<(), StorageError>;

    /// Currently active record of a group/type
    async fn active_service(
        &self,
        failover_group: &str,
        service_type: ServiceType,
    ) -> Result<Option<ServiceRegistration>, StorageError>;

    /// Live members of a group/type
    async fn group_members(
        &self,
        failover_group: &str,
        service_type: ServiceType,
    ) -> Result<Vec<ServiceRegistration>, StorageError>;

    /// Retire the rotation source and promote the target in one step
    ///
    /// Re-checks that the source can still rotate and that the target is
    /// still healthy and of the same type.
    async fn commit_rotation(
        &self,
        commit: RotationCommit,
    ) -> Result<ServiceFailoverEvent, StorageError>;

    /// Move the active flag from one member to another
    ///
    /// Fails with `Conflict` if `from` is no longer active or `to` is no
    /// longer a healthy member of the group.
    async fn swap_active(&self, swap: ActiveSwap) -> Result<ServiceFailoverEvent, StorageError>;

    // =========================================================================
    // History
    // =========================================================================

    /// Up to `limit` most recent health checks of a service, newest first
    async fn health_history(
        &self,
        id: &str,
        limit: usize,
    ) -> Result<Vec<ServiceHealthCheck>, StorageError>;

    /// Up to `limit` most recent failover events of a group, newest first
    async fn failover_history(
        &self,
        failover_group: &str,
        limit: usize,
    ) -> Result<Vec<ServiceFailoverEvent>, StorageError>;
}
