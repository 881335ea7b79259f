//! In-memory storage backend
//!
//! Default storage implementation using in-memory hashmaps.
//! Suitable for development and single-instance deployments.
//! Data is lost on restart.
//!
//! All registrations sit behind one lock so that group-wide operations
//! (activation, rotation, failover) are applied atomically.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use sentinel_core::{
    FailoverType, HealthCheckResult, ServiceDiscoveryRequest, ServiceFailoverEvent,
    ServiceHealthCheck, ServiceRegistration, ServiceStatus, ServiceType,
};

use super::{ActiveSwap, HealthPolicy, RegistryStore, RotationCommit, StorageError};

/// In-memory registry store implementation
#[derive(Debug)]
pub struct MemoryStore {
    services: RwLock<HashMap<String, ServiceRegistration>>,
    health_checks: RwLock<HashMap<String, VecDeque<ServiceHealthCheck>>>,
    failover_events: RwLock<Vec<ServiceFailoverEvent>>,
    health_policy: HealthPolicy,
}

impl MemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::with_health_policy(HealthPolicy::default())
    }

    /// Create a store applying a custom health policy
    pub fn with_health_policy(health_policy: HealthPolicy) -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            health_checks: RwLock::new(HashMap::new()),
            failover_events: RwLock::new(Vec::new()),
            health_policy,
        }
    }

    pub fn health_policy(&self) -> HealthPolicy {
        self.health_policy
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, StorageError> {
    lock.read()
        .map_err(|e| StorageError::Internal(format!("lock poisoned: {e}")))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, StorageError> {
    lock.write()
        .map_err(|e| StorageError::Internal(format!("lock poisoned: {e}")))
}

fn live<'a>(
    services: &'a HashMap<String, ServiceRegistration>,
    id: &str,
) -> Result<&'a ServiceRegistration, StorageError> {
    services
        .get(id)
        .filter(|s| !s.deleted)
        .ok_or_else(|| StorageError::NotFound(id.to_string()))
}

fn live_mut<'a>(
    services: &'a mut HashMap<String, ServiceRegistration>,
    id: &str,
) -> Result<&'a mut ServiceRegistration, StorageError> {
    services
        .get_mut(id)
        .filter(|s| !s.deleted)
        .ok_or_else(|| StorageError::NotFound(id.to_string()))
}

fn in_group(service: &ServiceRegistration, failover_group: &str, service_type: ServiceType) -> bool {
    !service.deleted
        && service.failover_group == failover_group
        && service.service_type == service_type
}

/// Clear `is_active` on every member of the group/type, then set it on `id`
fn activate(
    services: &mut HashMap<String, ServiceRegistration>,
    failover_group: &str,
    service_type: ServiceType,
    id: &str,
) {
    for service in services.values_mut() {
        if service.failover_group == failover_group && service.service_type == service_type {
            service.is_active = service.id == id;
        }
    }
}

#[async_trait]
impl RegistryStore for MemoryStore {
    // =========================================================================
    // Registrations
    // =========================================================================

    async fn register(
        &self,
        mut registration: ServiceRegistration,
    ) -> Result<ServiceRegistration, StorageError> {
        let mut services = write(&self.services)?;

        if let Some(existing) = services.get(&registration.id) {
            if existing.status != ServiceStatus::Decommissioned {
                return Err(StorageError::Conflict(format!(
                    "service {} already registered",
                    registration.id
                )));
            }
        }

        let has_active = services.values().any(|s| {
            s.is_active && in_group(s, &registration.failover_group, registration.service_type)
        });
        registration.is_active = !has_active;
        registration.deleted = false;

        info!(
            service_id = %registration.id,
            name = %registration.name,
            service_type = %registration.service_type,
            failover_group = %registration.failover_group,
            is_active = registration.is_active,
            "Registering service"
        );
        services.insert(registration.id.clone(), registration.clone());
        Ok(registration)
    }

    async fn get(&self, id: &str) -> Result<ServiceRegistration, StorageError> {
        let services = read(&self.services)?;
        live(&services, id).cloned()
    }

    async fn list(&self) -> Result<Vec<ServiceRegistration>, StorageError> {
        let services = read(&self.services)?;
        let mut result: Vec<_> = services.values().filter(|s| !s.deleted).cloned().collect();
        result.sort_by(|a, b| {
            a.service_type
                .as_str()
                .cmp(b.service_type.as_str())
                .then(b.priority.cmp(&a.priority))
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(result)
    }

    async fn list_by_type(
        &self,
        query: &ServiceDiscoveryRequest,
    ) -> Result<Vec<ServiceRegistration>, StorageError> {
        let services = read(&self.services)?;
        let mut result: Vec<_> = services
            .values()
            .filter(|s| !s.deleted)
            .filter(|s| query.service_type.map_or(true, |t| s.service_type == t))
            .filter(|s| !query.only_healthy || s.is_healthy())
            .filter(|s| {
                query
                    .min_version
                    .as_deref()
                    .map_or(true, |min| s.version.as_str() >= min)
            })
            .cloned()
            .collect();
        result.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(b.health_check_count.cmp(&a.health_check_count))
        });
        Ok(result)
    }

    async fn update(
        &self,
        patched: ServiceRegistration,
    ) -> Result<ServiceRegistration, StorageError> {
        let mut services = write(&self.services)?;
        let stored = live_mut(&mut services, &patched.id)?;

        stored.version = patched.version;
        stored.url = patched.url;
        stored.health_check_url = patched.health_check_url;
        stored.priority = patched.priority;
        stored.metadata = patched.metadata;
        stored.public_key = patched.public_key;
        stored.signature = patched.signature;

        info!(service_id = %stored.id, "Updated service");
        Ok(stored.clone())
    }

    async fn decommission(&self, id: &str) -> Result<ServiceRegistration, StorageError> {
        let mut services = write(&self.services)?;
        let stored = live_mut(&mut services, id)?;

        stored
            .transition_to(ServiceStatus::Decommissioned)
            .map_err(|_| StorageError::InvalidTransition {
                id: id.to_string(),
                from: stored.status,
                to: ServiceStatus::Decommissioned,
            })?;
        stored.is_active = false;
        stored.deleted = true;

        info!(service_id = %id, "Decommissioned service");
        Ok(stored.clone())
    }

    async fn mark_health_check(
        &self,
        id: &str,
        result: HealthCheckResult,
    ) -> Result<ServiceRegistration, StorageError> {
        let updated = {
            let mut services = write(&self.services)?;
            let stored = live_mut(&mut services, id)?;
            self.health_policy.apply(stored, &result);
            stored.clone()
        };

        let record = ServiceHealthCheck {
            id: uuid::Uuid::new_v4().to_string(),
            service_id: id.to_string(),
            timestamp: result.timestamp,
            status: updated.status,
            response_time_millis: result.response_time_millis,
            status_code: result.status_code,
            error_message: result.error_message,
            checked_by: result.checked_by,
        };

        let mut history = write(&self.health_checks)?;
        let entries = history.entry(id.to_string()).or_default();
        if entries.len() >= self.health_policy.history_limit.max(1) {
            entries.pop_front();
        }
        entries.push_back(record);

        debug!(
            service_id = %id,
            status = %updated.status,
            healthy = result.healthy,
            "Recorded health check"
        );
        Ok(updated)
    }

    // =========================================================================
    // Failover groups
    // =========================================================================

    async fn set_active(
        &self,
        failover_group: &str,
        service_type: ServiceType,
        id: &str,
    ) -> Result<(), StorageError> {
        let mut services = write(&self.services)?;
        let target = live(&services, id)?;
        if !in_group(target, failover_group, service_type) {
            return Err(StorageError::Conflict(format!(
                "service {id} is not a {service_type} member of group '{failover_group}'"
            )));
        }

        activate(&mut services, failover_group, service_type, id);
        info!(
            service_id = %id,
            failover_group = %failover_group,
            service_type = %service_type,
            "Activated service"
        );
        Ok(())
    }

    async fn active_service(
        &self,
        failover_group: &str,
        service_type: ServiceType,
    ) -> Result<Option<ServiceRegistration>, StorageError> {
        let services = read(&self.services)?;
        Ok(services
            .values()
            .find(|s| s.is_active && in_group(s, failover_group, service_type))
            .cloned())
    }

    async fn group_members(
        &self,
        failover_group: &str,
        service_type: ServiceType,
    ) -> Result<Vec<ServiceRegistration>, StorageError> {
        let services = read(&self.services)?;
        Ok(services
            .values()
            .filter(|s| in_group(s, failover_group, service_type))
            .cloned()
            .collect())
    }

    async fn commit_rotation(
        &self,
        commit: RotationCommit,
    ) -> Result<ServiceFailoverEvent, StorageError> {
        if commit.old_service_id == commit.new_service_id {
            return Err(StorageError::Conflict(
                "a service cannot be rotated onto itself".into(),
            ));
        }

        let mut services = write(&self.services)?;

        let old = live(&services, &commit.old_service_id)?.clone();
        let new = live(&services, &commit.new_service_id)?;

        if !old.can_rotate() {
            return Err(StorageError::InvalidTransition {
                id: old.id,
                from: old.status,
                to: ServiceStatus::Rotating,
            });
        }
        if !old.is_active {
            return Err(StorageError::Conflict(format!(
                "service {} is not the active member of '{}'",
                old.id, old.failover_group
            )));
        }
        if !new.is_healthy() {
            return Err(StorageError::Conflict(format!(
                "rotation target {} is {}",
                new.id, new.status
            )));
        }
        if new.service_type != old.service_type {
            return Err(StorageError::Conflict(format!(
                "rotation target {} is {}, source is {}",
                new.id, new.service_type, old.service_type
            )));
        }

        let retired = live_mut(&mut services, &commit.old_service_id)?;
        for next in [ServiceStatus::Rotating, ServiceStatus::Decommissioned] {
            retired
                .transition_to(next)
                .map_err(|_| StorageError::InvalidTransition {
                    id: retired.id.clone(),
                    from: retired.status,
                    to: next,
                })?;
        }
        retired.is_active = false;
        retired.deleted = true;
        retired.last_failover_at = Some(commit.at);

        let promoted = live_mut(&mut services, &commit.new_service_id)?;
        promoted.failover_group = old.failover_group.clone();
        promoted.last_failover_at = Some(commit.at);
        activate(
            &mut services,
            &old.failover_group,
            old.service_type,
            &commit.new_service_id,
        );

        let event = ServiceFailoverEvent::new(
            &old,
            commit.new_service_id.clone(),
            commit.reason,
            FailoverType::Failover,
            false,
            commit.at,
        );
        drop(services);

        write(&self.failover_events)?.push(event.clone());
        info!(
            old_service = %event.old_service_id,
            new_service = %event.new_service_id,
            failover_group = %event.failover_group,
            "Committed service rotation"
        );
        Ok(event)
    }

    async fn swap_active(&self, swap: ActiveSwap) -> Result<ServiceFailoverEvent, StorageError> {
        let mut services = write(&self.services)?;

        let from = live(&services, &swap.from_service_id)?.clone();
        if !from.is_active || !in_group(&from, &swap.failover_group, swap.service_type) {
            return Err(StorageError::Conflict(format!(
                "service {} is no longer the active member of '{}'",
                from.id, swap.failover_group
            )));
        }

        let to = live(&services, &swap.to_service_id)?;
        if !in_group(to, &swap.failover_group, swap.service_type) || !to.is_healthy() {
            return Err(StorageError::Conflict(format!(
                "service {} is not a healthy member of '{}'",
                to.id, swap.failover_group
            )));
        }

        activate(
            &mut services,
            &swap.failover_group,
            swap.service_type,
            &swap.to_service_id,
        );
        for id in [&swap.from_service_id, &swap.to_service_id] {
            if let Some(service) = services.get_mut(id.as_str()) {
                service.last_failover_at = Some(swap.at);
            }
        }
        drop(services);

        let event = ServiceFailoverEvent::new(
            &from,
            swap.to_service_id,
            swap.reason,
            swap.failover_type,
            true,
            swap.at,
        );
        write(&self.failover_events)?.push(event.clone());
        Ok(event)
    }

    // =========================================================================
    // History
    // =========================================================================

    async fn health_history(
        &self,
        id: &str,
        limit: usize,
    ) -> Result<Vec<ServiceHealthCheck>, StorageError> {
        let history = read(&self.health_checks)?;
        Ok(history
            .get(id)
            .map(|entries| entries.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn failover_history(
        &self,
        failover_group: &str,
        limit: usize,
    ) -> Result<Vec<ServiceFailoverEvent>, StorageError> {
        let events = read(&self.failover_events)?;
        Ok(events
            .iter()
            .rev()
            .filter(|e| e.failover_group == failover_group)
            .take(limit)
            .cloned()
            .collect())
    }
}
