//! Integration Tests for the Sentinel registry
//!
//! These tests drive the registry the way the server wires it:
//! - registration, discovery and lifecycle through the facade
//! - health probing feeding status changes and automatic failover
//! - rotation followed by health-driven failback bookkeeping

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use sentinel_core::audit::{SERVICE_FAILOVER, SERVICE_REGISTERED, SERVICE_ROTATED};
use sentinel_core::{
    verify_registration, FailoverType, HealthCheckResult, ServiceDecommissionRequest,
    ServiceDiscoveryRequest, ServiceRegistration, ServiceRegistrationRequest, ServiceRole,
    ServiceRotationRequest, ServiceSigner, ServiceStatus, ServiceType, ServiceUpdateRequest,
};
use sentinel_registry::{AppState, HealthProbe, RegistryConfig, RegistryError, StorageError};

// =============================================================================
// Test Helpers
// =============================================================================

const ADMIN_TOKEN: &str = "integration-admin-token-0123456789";

fn signer() -> ServiceSigner {
    static SIGNER: OnceLock<ServiceSigner> = OnceLock::new();
    SIGNER
        .get_or_init(|| ServiceSigner::generate_with_bits(1024).expect("key generation"))
        .clone()
}

/// Probe answering from a table of service name -> healthy
#[derive(Debug, Default)]
struct TableProbe {
    down: Mutex<HashMap<String, bool>>,
}

impl TableProbe {
    fn set_down(&self, name: &str, down: bool) {
        self.down.lock().unwrap().insert(name.to_string(), down);
    }
}

#[async_trait]
impl HealthProbe for TableProbe {
    async fn probe(&self, registration: &ServiceRegistration) -> HealthCheckResult {
        let down = *self
            .down
            .lock()
            .unwrap()
            .get(&registration.name)
            .unwrap_or(&false);
        if down {
            HealthCheckResult::unhealthy(4, Some(503), "Unhealthy status code: 503")
        } else {
            HealthCheckResult::healthy(4, 200)
        }
    }
}

fn create_state(probe: Arc<TableProbe>) -> AppState {
    let config = RegistryConfig {
        min_target_age: Duration::ZERO,
        health_interval: Duration::from_millis(25),
        health_timeout: Duration::from_millis(500),
        ..RegistryConfig::default()
    };
    AppState::new(config, signer(), probe)
}

fn request(name: &str, role: ServiceRole, priority: i32) -> ServiceRegistrationRequest {
    ServiceRegistrationRequest {
        id: None,
        name: name.into(),
        service_type: ServiceType::Permissions,
        version: "2.1.0".into(),
        url: format!("http://{name}:9000"),
        health_check_url: format!("http://{name}:9000/healthz"),
        public_key: String::new(),
        signature: None,
        certificate: None,
        role,
        failover_group: "perm".into(),
        priority,
        metadata: r#"{"region":"eu-west"}"#.into(),
        admin_token: ADMIN_TOKEN.into(),
    }
}

// =============================================================================
// Registration and discovery
// =============================================================================

#[tokio::test]
async fn test_register_discover_and_list() {
    let state = create_state(Arc::new(TableProbe::default()));
    let registry = &state.registry;

    let primary = registry
        .register_service(request("perm-primary", ServiceRole::Primary, 10), "10.1.0.1")
        .await
        .unwrap();
    let backup = registry
        .register_service(request("perm-backup", ServiceRole::Backup, 5), "10.1.0.1")
        .await
        .unwrap();

    assert!(primary.is_active);
    assert!(!backup.is_active);
    assert_eq!(primary.health_check_url, "http://perm-primary:9000/healthz");
    assert!(verify_registration(&primary).is_ok());

    let listed = registry.list_services().await.unwrap();
    assert_eq!(
        listed.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
        vec!["perm-primary", "perm-backup"]
    );

    // Nothing has been probed yet
    let healthy = registry
        .discover(&ServiceDiscoveryRequest {
            service_type: Some(ServiceType::Permissions),
            min_version: None,
            only_healthy: true,
        })
        .await
        .unwrap();
    assert_eq!(healthy.total_count, 0);

    state.monitor.check_all().await.unwrap();
    let healthy = registry
        .discover(&ServiceDiscoveryRequest {
            service_type: Some(ServiceType::Permissions),
            min_version: Some("2.0.0".into()),
            only_healthy: true,
        })
        .await
        .unwrap();
    assert_eq!(healthy.total_count, 2);
    assert_eq!(healthy.services[0].name, "perm-primary");

    assert_eq!(registry.audit().events_by_type(SERVICE_REGISTERED, 10).len(), 2);
}

#[tokio::test]
async fn test_update_and_decommission_lifecycle() {
    let state = create_state(Arc::new(TableProbe::default()));
    let registry = &state.registry;

    let reg = registry
        .register_service(request("perm-a", ServiceRole::Primary, 1), "10.1.0.1")
        .await
        .unwrap();

    let updated = registry
        .update_service(
            ServiceUpdateRequest {
                service_id: reg.id.clone(),
                version: Some("2.2.0".into()),
                metadata: Some(r#"{"region":"eu-central"}"#.into()),
                admin_token: ADMIN_TOKEN.into(),
                ..Default::default()
            },
            "10.1.0.1",
        )
        .await
        .unwrap();
    assert_eq!(updated.version, "2.2.0");
    assert!(verify_registration(&updated).is_ok());
    assert_eq!(updated.registered_at, reg.registered_at);

    let request = ServiceDecommissionRequest {
        service_id: reg.id.clone(),
        reason: "replaced".into(),
        admin_token: ADMIN_TOKEN.into(),
    };
    registry
        .decommission_service(request.clone(), "10.1.0.1")
        .await
        .unwrap();

    assert!(registry.list_services().await.unwrap().is_empty());
    assert!(matches!(
        registry.decommission_service(request, "10.1.0.1").await,
        Err(RegistryError::Storage(StorageError::NotFound(_)))
    ));
}

// =============================================================================
// Health monitoring and failover
// =============================================================================

#[tokio::test]
async fn test_health_failures_trigger_failover() {
    let probe = Arc::new(TableProbe::default());
    let state = create_state(probe.clone());
    let registry = &state.registry;

    let primary = registry
        .register_service(request("perm-primary", ServiceRole::Primary, 10), "10.1.0.1")
        .await
        .unwrap();
    registry
        .register_service(request("perm-backup-1", ServiceRole::Backup, 1), "10.1.0.1")
        .await
        .unwrap();
    let best = registry
        .register_service(request("perm-backup-2", ServiceRole::Backup, 7), "10.1.0.1")
        .await
        .unwrap();
    state.monitor.check_all().await.unwrap();

    probe.set_down("perm-primary", true);
    for _ in 0..3 {
        state.monitor.check_all().await.unwrap();
    }

    let primary = registry.get_service(&primary.id).await.unwrap();
    assert_eq!(primary.status, ServiceStatus::Unhealthy);
    assert!(!primary.is_active);
    assert!(registry.get_service(&best.id).await.unwrap().is_active);

    let history = registry.failover_history("perm", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].failover_type, FailoverType::Failover);
    assert!(history[0].automatic);
    assert_eq!(registry.audit().events_by_type(SERVICE_FAILOVER, 10).len(), 1);

    let report = registry.service_health(&primary.id).await.unwrap();
    assert_eq!(report.consecutive_failures, 3);
    assert_eq!(report.recent_checks.len(), 4);
    assert_eq!(report.recent_checks[0].status_code, Some(503));
}

#[tokio::test]
async fn test_monitor_loop_runs_until_stopped() {
    let probe = Arc::new(TableProbe::default());
    let state = create_state(probe);
    let reg = state
        .registry
        .register_service(request("perm-a", ServiceRole::Primary, 1), "10.1.0.1")
        .await
        .unwrap();

    assert!(state.monitor.start());
    tokio::time::sleep(Duration::from_millis(120)).await;
    state.monitor.stop().await;

    let reg = state.registry.get_service(&reg.id).await.unwrap();
    assert_eq!(reg.status, ServiceStatus::Healthy);
    assert!(reg.health_check_count >= 2);
}

// =============================================================================
// Rotation
// =============================================================================

#[tokio::test]
async fn test_rotation_hands_group_to_new_service() {
    let state = create_state(Arc::new(TableProbe::default()));
    let registry = &state.registry;

    let old = registry
        .register_service(request("perm-v1", ServiceRole::Primary, 1), "10.1.0.1")
        .await
        .unwrap();
    let new = registry
        .register_service(request("perm-v2", ServiceRole::Primary, 1), "10.1.0.1")
        .await
        .unwrap();
    state.monitor.check_all().await.unwrap();

    let response = registry
        .rotate_service(
            ServiceRotationRequest {
                current_service_id: old.id.clone(),
                new_service: new.clone(),
                reason: "upgrade to v2".into(),
                requested_by: String::new(),
                admin_token: ADMIN_TOKEN.into(),
                verification_code: String::new(),
            },
            "10.1.0.1",
        )
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.old_service_id, old.id);
    assert_eq!(response.new_service_id, new.id);
    assert!(!response.verification_hash.is_empty());

    let active = registry.list_services().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, new.id);
    assert!(active[0].is_active);

    let events = registry.audit().events_by_type(SERVICE_ROTATED, 10);
    assert_eq!(events.len(), 1);
    assert!(events[0].details.contains("requested_by=admin"));

    // Rotated-out service no longer probed
    assert_eq!(state.monitor.check_all().await.unwrap(), 1);
}
