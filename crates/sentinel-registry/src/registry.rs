//! Service registry
//!
//! Entry point for every registry operation. Privileged operations
//! (register, update, decommission, rotate) pass the admin authorization
//! gate before touching state. Every rejection and every successful
//! mutation is written to the security audit trail.

use chrono::Utc;
use sentinel_core::audit::{
    INVALID_INPUT, INVALID_TOKEN, REQUEST_BLOCKED, SERVICE_DECOMMISSIONED, SERVICE_REGISTERED,
    SERVICE_ROTATED, SERVICE_UPDATED,
};
use sentinel_core::{
    generate_rotation_code, verify_registration, RotationError, RotationPolicy, SecurityAuditLog,
    SecurityEvent, SentinelError, ServiceDecommissionRequest, ServiceDiscoveryRequest,
    ServiceDiscoveryResponse, ServiceFailoverEvent, ServiceHealthCheck, ServiceRegistration,
    ServiceRegistrationRequest, ServiceRotationRequest, ServiceRotationResponse, ServiceSigner,
    ServiceStatus, ServiceUpdateRequest,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::core::{AdminAuthorizer, AuthorizationError};
use crate::storage::{RegistryStore, RotationCommit, StorageError};

/// Errors returned by registry operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error(transparent)]
    Unauthorized(#[from] AuthorizationError),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Signature verification failed: {0}")]
    Verification(SentinelError),

    #[error("Rotation rejected: {0}")]
    Rotation(#[from] RotationError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RegistryError {
    /// Audit event type recorded when this error rejects a request
    fn audit_event_type(&self) -> Option<&'static str> {
        match self {
            RegistryError::Unauthorized(_) => Some(INVALID_TOKEN),
            RegistryError::Rotation(e) if e.is_authorization_failure() => Some(INVALID_TOKEN),
            RegistryError::Validation(_) => Some(INVALID_INPUT),
            RegistryError::Internal(_) | RegistryError::Storage(StorageError::Internal(_)) => None,
            _ => Some(REQUEST_BLOCKED),
        }
    }
}

/// Health summary of one registration
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealthReport {
    pub service_id: String,
    pub name: String,
    pub status: ServiceStatus,
    pub is_active: bool,
    pub last_health_check: Option<chrono::DateTime<Utc>>,
    pub health_check_count: u64,
    pub failed_health_check_count: u64,
    pub consecutive_failures: u32,
    pub recent_checks: Vec<ServiceHealthCheck>,
}

/// Number of health checks included in a health report
pub const HEALTH_REPORT_CHECKS: usize = 10;

/// Registry facade shared by the HTTP layer and the health monitor
#[derive(Debug)]
pub struct ServiceRegistry {
    store: Arc<dyn RegistryStore>,
    signer: ServiceSigner,
    audit: Arc<SecurityAuditLog>,
    authorizer: AdminAuthorizer,
    rotation_policy: RotationPolicy,
}

impl ServiceRegistry {
    pub fn new(
        store: Arc<dyn RegistryStore>,
        signer: ServiceSigner,
        audit: Arc<SecurityAuditLog>,
    ) -> Self {
        info!("Service registry initialized");
        Self {
            store,
            signer,
            audit,
            authorizer: AdminAuthorizer::new(),
            rotation_policy: RotationPolicy::default(),
        }
    }

    pub fn with_authorizer(mut self, authorizer: AdminAuthorizer) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn with_rotation_policy(mut self, rotation_policy: RotationPolicy) -> Self {
        self.rotation_policy = rotation_policy;
        self
    }

    pub fn store(&self) -> &Arc<dyn RegistryStore> {
        &self.store
    }

    pub fn audit(&self) -> &Arc<SecurityAuditLog> {
        &self.audit
    }

    /// The registry's own signing key, as SPKI PEM
    pub fn public_key_pem(&self) -> &str {
        self.signer.public_key_pem()
    }

    fn reject(&self, operation: &str, ip: &str, err: RegistryError) -> RegistryError {
        if let Some(event_type) = err.audit_event_type() {
            warn!(
                operation = operation,
                ip = %ip,
                event_type = event_type,
                error = %err,
                "SECURITY: Registry request rejected"
            );
            self.audit
                .log_security_event(event_type, ip, &format!("{operation}: {err}"));
        }
        err
    }

    /// Admin gate for operations outside the registry facade, such as audit queries
    pub fn authorize(
        &self,
        admin_token: &str,
        operation: &str,
        ip: &str,
    ) -> Result<String, RegistryError> {
        self.authorizer
            .authorize(admin_token)
            .map_err(|e| self.reject(operation, ip, e.into()))
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register a service, self-signed or signed by the registry
    ///
    /// A request carrying `signature` must also carry `id` and `public_key`
    /// and is verified as is. Otherwise the registry assigns an id and signs
    /// the record with its own key.
    pub async fn register_service(
        &self,
        request: ServiceRegistrationRequest,
        ip: &str,
    ) -> Result<ServiceRegistration, RegistryError> {
        self.register_inner(request, ip)
            .await
            .map_err(|e| self.reject("register", ip, e))
    }

    async fn register_inner(
        &self,
        request: ServiceRegistrationRequest,
        ip: &str,
    ) -> Result<ServiceRegistration, RegistryError> {
        let principal = self.authorizer.authorize(&request.admin_token)?;

        if request.name.trim().is_empty() {
            return Err(RegistryError::Validation("name is required".into()));
        }
        if request.url.trim().is_empty() {
            return Err(RegistryError::Validation("url is required".into()));
        }

        let mut builder = ServiceRegistration::builder()
            .name(request.name)
            .service_type(request.service_type)
            .version(request.version)
            .url(request.url)
            .certificate(request.certificate)
            .status(ServiceStatus::Registering)
            .role(request.role)
            .failover_group(request.failover_group)
            .priority(request.priority)
            .metadata(request.metadata)
            .registered_by(principal);
        if !request.health_check_url.is_empty() {
            builder = builder.health_check_url(request.health_check_url);
        }

        let registration = match request.signature {
            Some(signature) => {
                let id = request.id.filter(|id| !id.is_empty()).ok_or_else(|| {
                    RegistryError::Validation("self-signed registrations must carry an id".into())
                })?;
                let mut registration = builder
                    .id(id)
                    .public_key(request.public_key)
                    .build()
                    .map_err(|e| RegistryError::Validation(e.to_string()))?;
                registration.signature = signature;
                verify_registration(&registration).map_err(RegistryError::Verification)?;
                registration
            }
            None => {
                if !request.public_key.is_empty() {
                    return Err(RegistryError::Validation(
                        "public key supplied without a signature".into(),
                    ));
                }
                if let Some(id) = request.id.filter(|id| !id.is_empty()) {
                    builder = builder.id(id);
                }
                let mut registration = builder
                    .build()
                    .map_err(|e| RegistryError::Validation(e.to_string()))?;
                self.signer
                    .sign(&mut registration)
                    .map_err(|e| RegistryError::Internal(e.to_string()))?;
                registration
            }
        };

        let stored = self.store.register(registration).await?;

        self.audit.log_security_event(
            SERVICE_REGISTERED,
            ip,
            &format!(
                "id={} name={} type={} group={}",
                stored.id, stored.name, stored.service_type, stored.failover_group
            ),
        );
        info!(
            service_id = %stored.id,
            name = %stored.name,
            service_type = %stored.service_type,
            registered_by = %stored.registered_by,
            "Service registered"
        );
        Ok(stored)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Discover services by type, health and minimum version
    pub async fn discover(
        &self,
        request: &ServiceDiscoveryRequest,
    ) -> Result<ServiceDiscoveryResponse, RegistryError> {
        let services = self.store.list_by_type(request).await?;
        Ok(ServiceDiscoveryResponse {
            total_count: services.len(),
            services,
            timestamp: Utc::now(),
        })
    }

    pub async fn get_service(&self, id: &str) -> Result<ServiceRegistration, RegistryError> {
        Ok(self.store.get(id).await?)
    }

    pub async fn list_services(&self) -> Result<Vec<ServiceRegistration>, RegistryError> {
        Ok(self.store.list().await?)
    }

    /// Current health of a service and its most recent checks
    pub async fn service_health(&self, id: &str) -> Result<ServiceHealthReport, RegistryError> {
        let service = self.store.get(id).await?;
        let recent_checks = self.store.health_history(id, HEALTH_REPORT_CHECKS).await?;
        Ok(ServiceHealthReport {
            service_id: service.id,
            name: service.name,
            status: service.status,
            is_active: service.is_active,
            last_health_check: service.last_health_check,
            health_check_count: service.health_check_count,
            failed_health_check_count: service.failed_health_check_count,
            consecutive_failures: service.consecutive_failures,
            recent_checks,
        })
    }

    pub async fn failover_history(
        &self,
        failover_group: &str,
        limit: usize,
    ) -> Result<Vec<ServiceFailoverEvent>, RegistryError> {
        Ok(self.store.failover_history(failover_group, limit).await?)
    }

    /// Record a security event reported by a component in front of the registry
    ///
    /// `subject_ip` is the address the event is about; the reporter's own
    /// address is only used when the report is rejected.
    pub fn report_security_event(
        &self,
        admin_token: &str,
        event_type: &str,
        subject_ip: &str,
        details: &str,
        ip: &str,
    ) -> Result<SecurityEvent, RegistryError> {
        self.authorize(admin_token, "report_event", ip)?;
        if event_type.trim().is_empty() {
            return Err(self.reject(
                "report_event",
                ip,
                RegistryError::Validation("event_type is required".into()),
            ));
        }

        let subject = if subject_ip.is_empty() { ip } else { subject_ip };
        Ok(self.audit.log_security_event(event_type, subject, details))
    }

    // =========================================================================
    // Update / decommission
    // =========================================================================

    /// Patch a registration
    ///
    /// Changing `version` or `url` changes signed fields: records signed by
    /// the registry are re-signed, self-signed records need a fresh
    /// signature in the request that verifies against the patched record.
    pub async fn update_service(
        &self,
        request: ServiceUpdateRequest,
        ip: &str,
    ) -> Result<ServiceRegistration, RegistryError> {
        self.update_inner(request, ip)
            .await
            .map_err(|e| self.reject("update", ip, e))
    }

    async fn update_inner(
        &self,
        request: ServiceUpdateRequest,
        ip: &str,
    ) -> Result<ServiceRegistration, RegistryError> {
        self.authorizer.authorize(&request.admin_token)?;

        if request.is_empty() {
            return Err(RegistryError::Validation("no fields to update".into()));
        }

        let current = self.store.get(&request.service_id).await?;
        let mut patched = current.clone();
        request.apply_to(&mut patched);

        if request.touches_signed_fields() {
            if self.signer.owns_public_key(&current.public_key) {
                self.signer
                    .sign(&mut patched)
                    .map_err(|e| RegistryError::Internal(e.to_string()))?;
            } else {
                let signature = request.signature.clone().ok_or_else(|| {
                    RegistryError::Validation(
                        "a fresh signature is required to change version or url".into(),
                    )
                })?;
                patched.signature = signature;
                verify_registration(&patched).map_err(RegistryError::Verification)?;
            }
        }

        let updated = self.store.update(patched).await?;

        self.audit.log_security_event(
            SERVICE_UPDATED,
            ip,
            &format!("id={} signed_fields_changed={}", updated.id, request.touches_signed_fields()),
        );
        info!(service_id = %updated.id, "Service updated");
        Ok(updated)
    }

    /// Retire a registration
    pub async fn decommission_service(
        &self,
        request: ServiceDecommissionRequest,
        ip: &str,
    ) -> Result<ServiceRegistration, RegistryError> {
        self.decommission_inner(request, ip)
            .await
            .map_err(|e| self.reject("decommission", ip, e))
    }

    async fn decommission_inner(
        &self,
        request: ServiceDecommissionRequest,
        ip: &str,
    ) -> Result<ServiceRegistration, RegistryError> {
        self.authorizer.authorize(&request.admin_token)?;

        let retired = self.store.decommission(&request.service_id).await?;

        self.audit.log_security_event(
            SERVICE_DECOMMISSIONED,
            ip,
            &format!("id={} reason={}", retired.id, request.reason),
        );
        info!(
            service_id = %retired.id,
            reason = %request.reason,
            "Service decommissioned"
        );
        Ok(retired)
    }

    // =========================================================================
    // Rotation
    // =========================================================================

    /// Replace the active registration of a group by an already registered one
    pub async fn rotate_service(
        &self,
        request: ServiceRotationRequest,
        ip: &str,
    ) -> Result<ServiceRotationResponse, RegistryError> {
        self.rotate_inner(request, ip)
            .await
            .map_err(|e| self.reject("rotate", ip, e))
    }

    async fn rotate_inner(
        &self,
        request: ServiceRotationRequest,
        ip: &str,
    ) -> Result<ServiceRotationResponse, RegistryError> {
        let principal = self
            .authorizer
            .authorize(&request.admin_token)
            .map_err(|e| match e {
                AuthorizationError::TokenTooShort { min_len } => {
                    RegistryError::Rotation(RotationError::InvalidAdminToken { min_len })
                }
                other => RegistryError::Unauthorized(other),
            })?;

        self.rotation_policy
            .check_verification_code(&request.current_service_id, &request.verification_code)?;

        let old_service = self.store.get(&request.current_service_id).await?;
        let new_service = self.store.get(&request.new_service.id).await?;

        // The submitted target must be the record the registry holds
        if new_service.signature != request.new_service.signature
            || new_service.public_key != request.new_service.public_key
        {
            return Err(RegistryError::Verification(SentinelError::SignatureMismatch(
                format!(
                    "rotation target {} does not match its registered record",
                    new_service.id
                ),
            )));
        }

        let now = Utc::now();
        self.rotation_policy
            .verify(&old_service, &new_service, &request.admin_token, now)?;

        let verification_hash = generate_rotation_code(&new_service.id, &request.admin_token)
            .map_err(|e| RegistryError::Internal(e.to_string()))?;

        let commit = RotationCommit {
            old_service_id: old_service.id.clone(),
            new_service_id: new_service.id.clone(),
            reason: request.reason.clone(),
            at: now,
        };
        let event = self.store.commit_rotation(commit).await.map_err(|e| match e {
            StorageError::InvalidTransition { id, from, .. } => {
                RegistryError::Rotation(RotationError::NotRotatable {
                    service_id: id,
                    status: from,
                })
            }
            other => RegistryError::Storage(other),
        })?;

        let requested_by = if request.requested_by.is_empty() {
            principal
        } else {
            request.requested_by
        };

        self.audit.log_security_event(
            SERVICE_ROTATED,
            ip,
            &format!(
                "old={} new={} group={} requested_by={} reason={} hash={}",
                event.old_service_id,
                event.new_service_id,
                event.failover_group,
                requested_by,
                event.failover_reason,
                verification_hash
            ),
        );
        info!(
            old_service = %event.old_service_id,
            new_service = %event.new_service_id,
            requested_by = %requested_by,
            "Service rotated"
        );

        Ok(ServiceRotationResponse {
            success: true,
            old_service_id: event.old_service_id,
            new_service_id: event.new_service_id,
            rotation_time: event.timestamp,
            verification_hash,
            message: "Service rotated successfully".into(),
        })
    }
}
