//! API request handlers

pub mod audit;
pub mod keys;
pub mod rotation;
pub mod services;

use sentinel_core::{SecurityAuditLog, ServiceSigner};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::RegistryConfig;
use crate::core::{FailoverManager, HealthMonitor, HealthProbe};
use crate::registry::ServiceRegistry;
use crate::storage::MemoryStore;

pub use audit::{
    events_by_ip, events_by_type, recent_events, report_event, security_statistics,
    EventsResponse, ReportEventRequest,
};
pub use keys::{registry_key, RegistryKeyResponse};
pub use rotation::rotate_service;
pub use services::{
    decommission_service, discover_services, failover_history, get_service, list_services,
    register_service, service_health, update_service, FailoverHistoryResponse,
    ListServicesResponse,
};

/// Application state shared across handlers
pub struct AppState {
    /// Registry facade
    pub registry: ServiceRegistry,
    /// Background health prober
    pub monitor: HealthMonitor,
    /// Server configuration
    pub config: RegistryConfig,
}

impl AppState {
    /// Wire an in-memory registry, its failover manager and health monitor
    pub fn new(config: RegistryConfig, signer: ServiceSigner, probe: Arc<dyn HealthProbe>) -> Self {
        let store = Arc::new(MemoryStore::with_health_policy(config.health_policy()));
        let audit = Arc::new(SecurityAuditLog::with_capacity(config.audit_capacity));
        let failover = Arc::new(FailoverManager::new(store.clone(), audit.clone()));
        let monitor = HealthMonitor::new(
            store.clone(),
            probe,
            failover,
            config.health_interval,
            config.health_timeout,
        );
        let registry = ServiceRegistry::new(store, signer, audit)
            .with_authorizer(config.authorizer())
            .with_rotation_policy(config.rotation_policy());

        Self {
            registry,
            monitor,
            config,
        }
    }
}

/// Default page size for history and event listings
pub const DEFAULT_LIMIT: usize = 100;

/// Address recorded in audit events for the caller
pub(crate) fn client_ip(addr: &SocketAddr) -> String {
    addr.ip().to_string()
}
