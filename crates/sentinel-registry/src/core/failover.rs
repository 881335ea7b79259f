//! Automatic failover and failback
//!
//! Reacts to each applied health check:
//! - the active member of a group turned unhealthy: promote the best
//!   healthy backup (priority desc, then health-check count desc)
//! - an inactive primary stayed healthy for `stability_checks` consecutive
//!   probes and `failback_delay` has passed since its last failover:
//!   hand the group back to it

use chrono::{Duration, Utc};
use sentinel_core::audit::{SERVICE_FAILBACK, SERVICE_FAILOVER};
use sentinel_core::{
    FailoverType, SecurityAuditLog, ServiceFailoverEvent, ServiceRegistration, ServiceRole,
    ServiceStatus,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::storage::{ActiveSwap, RegistryStore, StorageError};

/// Source address recorded for audit events raised by the registry itself
pub const INTERNAL_SOURCE: &str = "internal";

/// Failover decisions driven by health checks
#[derive(Debug)]
pub struct FailoverManager {
    store: Arc<dyn RegistryStore>,
    audit: Arc<SecurityAuditLog>,
    stability_checks: u32,
    failback_delay: Duration,
    consecutive_healthy: Mutex<HashMap<String, u32>>,
}

impl FailoverManager {
    pub fn new(store: Arc<dyn RegistryStore>, audit: Arc<SecurityAuditLog>) -> Self {
        Self {
            store,
            audit,
            stability_checks: 3,
            failback_delay: Duration::minutes(5),
            consecutive_healthy: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_failback(mut self, stability_checks: u32, failback_delay: Duration) -> Self {
        self.stability_checks = stability_checks;
        self.failback_delay = failback_delay;
        self
    }

    fn record_probe(&self, service_id: &str, healthy: bool) -> u32 {
        let mut counts = self
            .consecutive_healthy
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let count = counts.entry(service_id.to_string()).or_insert(0);
        *count = if healthy { count.saturating_add(1) } else { 0 };
        *count
    }

    fn reset(&self, service_id: &str) {
        self.consecutive_healthy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(service_id);
    }

    /// Drop probe counters of services outside `live`
    pub fn retain_tracked<'a>(&self, live: impl IntoIterator<Item = &'a str>) {
        let live: HashSet<&str> = live.into_iter().collect();
        self.consecutive_healthy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|id, _| live.contains(id.as_str()));
    }

    /// React to the state of `service` right after a probe was applied
    pub async fn on_health_check(
        &self,
        service: &ServiceRegistration,
        healthy: bool,
    ) -> Result<Option<ServiceFailoverEvent>, StorageError> {
        if service.deleted || service.status == ServiceStatus::Decommissioned {
            self.reset(&service.id);
            return Ok(None);
        }
        if service.failover_group.is_empty() {
            return Ok(None);
        }

        let consecutive = self.record_probe(&service.id, healthy);

        if service.is_active && !healthy && service.status == ServiceStatus::Unhealthy {
            warn!(
                service_id = %service.id,
                name = %service.name,
                failover_group = %service.failover_group,
                "Active service became unhealthy, initiating failover"
            );
            return self.execute_failover(service).await;
        }

        if service.role == ServiceRole::Primary && !service.is_active && healthy {
            let settled = service
                .last_failover_at
                .map_or(true, |at| Utc::now() - at >= self.failback_delay);
            if consecutive >= self.stability_checks && settled {
                info!(
                    service_id = %service.id,
                    failover_group = %service.failover_group,
                    consecutive_healthy = consecutive,
                    "Primary service recovered and stable, initiating failback"
                );
                return self.execute_failback(service).await;
            }
        }

        Ok(None)
    }

    async fn execute_failover(
        &self,
        failed: &ServiceRegistration,
    ) -> Result<Option<ServiceFailoverEvent>, StorageError> {
        let members = self
            .store
            .group_members(&failed.failover_group, failed.service_type)
            .await?;

        let Some(backup) = best_backup(&members, &failed.id) else {
            warn!(
                failover_group = %failed.failover_group,
                service_type = %failed.service_type,
                "No healthy backup service available for failover"
            );
            return Ok(None);
        };

        let swap = ActiveSwap {
            failover_group: failed.failover_group.clone(),
            service_type: failed.service_type,
            from_service_id: failed.id.clone(),
            to_service_id: backup.id.clone(),
            reason: "Primary service became unhealthy".into(),
            failover_type: FailoverType::Failover,
            at: Utc::now(),
        };
        self.commit(swap, SERVICE_FAILOVER).await
    }

    async fn execute_failback(
        &self,
        primary: &ServiceRegistration,
    ) -> Result<Option<ServiceFailoverEvent>, StorageError> {
        let Some(active) = self
            .store
            .active_service(&primary.failover_group, primary.service_type)
            .await?
        else {
            return Ok(None);
        };

        let swap = ActiveSwap {
            failover_group: primary.failover_group.clone(),
            service_type: primary.service_type,
            from_service_id: active.id,
            to_service_id: primary.id.clone(),
            reason: "Primary service recovered and stable".into(),
            failover_type: FailoverType::Failback,
            at: Utc::now(),
        };
        let event = self.commit(swap, SERVICE_FAILBACK).await?;
        if event.is_some() {
            self.reset(&primary.id);
        }
        Ok(event)
    }

    async fn commit(
        &self,
        swap: ActiveSwap,
        audit_type: &str,
    ) -> Result<Option<ServiceFailoverEvent>, StorageError> {
        match self.store.swap_active(swap).await {
            Ok(event) => {
                info!(
                    failover_group = %event.failover_group,
                    old_service = %event.old_service_id,
                    new_service = %event.new_service_id,
                    failover_type = ?event.failover_type,
                    "Failover completed successfully"
                );
                self.audit.log_security_event(
                    audit_type,
                    INTERNAL_SOURCE,
                    &format!(
                        "group={} old={} new={} reason={}",
                        event.failover_group,
                        event.old_service_id,
                        event.new_service_id,
                        event.failover_reason
                    ),
                );
                Ok(Some(event))
            }
            Err(StorageError::Conflict(reason)) => {
                // Group changed between the decision and the swap
                debug!(reason = %reason, "Skipping stale failover decision");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

/// Healthy inactive backup with the highest priority, then most health checks
fn best_backup<'a>(
    members: &'a [ServiceRegistration],
    exclude_id: &str,
) -> Option<&'a ServiceRegistration> {
    members
        .iter()
        .filter(|s| {
            s.id != exclude_id && s.role == ServiceRole::Backup && s.is_healthy() && !s.is_active
        })
        .max_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.health_check_count.cmp(&b.health_check_count))
        })
}
