//! Registration data model shared by every registry component

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, SentinelError};

/// Kind of backend service a registration provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Authentication,
    Permissions,
    #[serde(alias = "lokalisation")]
    Localisation,
    Extension,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Authentication => "authentication",
            ServiceType::Permissions => "permissions",
            ServiceType::Localisation => "localisation",
            ServiceType::Extension => "extension",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of an instance inside its failover group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceRole {
    #[default]
    Primary,
    Backup,
}

/// Lifecycle state of a registration
///
/// Allowed transitions:
/// - `registering -> healthy | unhealthy`
/// - `healthy <-> unhealthy`
/// - `registering | healthy | unhealthy -> rotating`
/// - `registering | healthy | unhealthy | rotating -> decommissioned`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    #[default]
    Registering,
    Healthy,
    Unhealthy,
    Rotating,
    Decommissioned,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Registering => "registering",
            ServiceStatus::Healthy => "healthy",
            ServiceStatus::Unhealthy => "unhealthy",
            ServiceStatus::Rotating => "rotating",
            ServiceStatus::Decommissioned => "decommissioned",
        }
    }

    /// Rotating and decommissioned records can never be a rotation source
    pub fn is_terminal_for_rotation(&self) -> bool {
        matches!(self, ServiceStatus::Rotating | ServiceStatus::Decommissioned)
    }

    /// Check the transition table
    pub fn can_transition_to(&self, next: ServiceStatus) -> bool {
        use ServiceStatus::*;
        matches!(
            (*self, next),
            (Registering, Healthy)
                | (Registering, Unhealthy)
                | (Healthy, Unhealthy)
                | (Unhealthy, Healthy)
                | (Registering | Healthy | Unhealthy, Rotating)
                | (Registering | Healthy | Unhealthy | Rotating, Decommissioned)
        )
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity and operational record for one running service instance
///
/// `signature` covers `(id, name, type, version, url, public_key)`. Changing
/// any of those without re-signing makes verification fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRegistration {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    pub version: String,
    pub url: String,
    #[serde(default)]
    pub health_check_url: String,

    /// PEM-encoded public key of the signer
    #[serde(default)]
    pub public_key: String,

    /// Base64-encoded RSA signature over the canonical identity fields
    #[serde(default)]
    pub signature: String,

    /// Opaque PEM certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,

    #[serde(default)]
    pub status: ServiceStatus,
    #[serde(default)]
    pub role: ServiceRole,
    #[serde(default)]
    pub failover_group: String,
    #[serde(default)]
    pub is_active: bool,

    /// Higher is preferred on tie-break
    #[serde(default)]
    pub priority: i32,

    /// Opaque metadata (usually JSON)
    #[serde(default)]
    pub metadata: String,

    #[serde(default)]
    pub registered_by: String,
    pub registered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_health_check: Option<DateTime<Utc>>,
    #[serde(default)]
    pub health_check_count: u64,
    #[serde(default)]
    pub failed_health_check_count: u64,

    /// Failures since the last successful probe
    #[serde(default)]
    pub consecutive_failures: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failover_at: Option<DateTime<Utc>>,

    /// Soft-delete marker
    #[serde(default)]
    pub deleted: bool,
}

impl ServiceRegistration {
    /// Start building a new registration
    pub fn builder() -> RegistrationBuilder {
        RegistrationBuilder::new()
    }

    pub fn is_healthy(&self) -> bool {
        self.status == ServiceStatus::Healthy
    }

    /// Whether this record may be the source of a rotation
    pub fn can_rotate(&self) -> bool {
        !self.status.is_terminal_for_rotation()
    }

    /// Move to `next`, rejecting anything outside the transition table
    pub fn transition_to(&mut self, next: ServiceStatus) -> Result<()> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(SentinelError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

/// Builder for [`ServiceRegistration`]
#[derive(Debug, Default)]
pub struct RegistrationBuilder {
    id: Option<String>,
    name: Option<String>,
    service_type: Option<ServiceType>,
    version: Option<String>,
    url: Option<String>,
    health_check_url: Option<String>,
    public_key: Option<String>,
    certificate: Option<String>,
    status: ServiceStatus,
    role: ServiceRole,
    failover_group: String,
    priority: i32,
    metadata: String,
    registered_by: Option<String>,
    registered_at: Option<DateTime<Utc>>,
}

impl RegistrationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a fixed id instead of a random UUID
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn service_type(mut self, service_type: ServiceType) -> Self {
        self.service_type = Some(service_type);
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn health_check_url(mut self, url: impl Into<String>) -> Self {
        self.health_check_url = Some(url.into());
        self
    }

    pub fn public_key(mut self, pem: impl Into<String>) -> Self {
        self.public_key = Some(pem.into());
        self
    }

    pub fn certificate(mut self, pem: Option<String>) -> Self {
        self.certificate = pem;
        self
    }

    pub fn status(mut self, status: ServiceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn role(mut self, role: ServiceRole) -> Self {
        self.role = role;
        self
    }

    pub fn failover_group(mut self, group: impl Into<String>) -> Self {
        self.failover_group = group.into();
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = metadata.into();
        self
    }

    pub fn registered_by(mut self, user: impl Into<String>) -> Self {
        self.registered_by = Some(user.into());
        self
    }

    pub fn registered_at(mut self, at: DateTime<Utc>) -> Self {
        self.registered_at = Some(at);
        self
    }

    /// Build the registration (unsigned)
    pub fn build(self) -> Result<ServiceRegistration> {
        let name = self
            .name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| SentinelError::MissingField("name".into()))?;
        let service_type = self
            .service_type
            .ok_or_else(|| SentinelError::MissingField("type".into()))?;
        let url = self
            .url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| SentinelError::MissingField("url".into()))?;
        let health_check_url = self
            .health_check_url
            .unwrap_or_else(|| format!("{}/health", url.trim_end_matches('/')));

        Ok(ServiceRegistration {
            id: self.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            name,
            service_type,
            version: self.version.unwrap_or_default(),
            url,
            health_check_url,
            public_key: self.public_key.unwrap_or_default(),
            signature: String::new(),
            certificate: self.certificate,
            status: self.status,
            role: self.role,
            failover_group: self.failover_group,
            is_active: false,
            priority: self.priority,
            metadata: self.metadata,
            registered_by: self.registered_by.unwrap_or_else(|| "system".into()),
            registered_at: self.registered_at.unwrap_or_else(Utc::now),
            last_health_check: None,
            health_check_count: 0,
            failed_health_check_count: 0,
            consecutive_failures: 0,
            last_failover_at: None,
            deleted: false,
        })
    }
}

/// Append-only probe result for one registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHealthCheck {
    pub id: String,
    pub service_id: String,
    pub timestamp: DateTime<Utc>,
    /// Registration status after this probe was applied
    pub status: ServiceStatus,
    pub response_time_millis: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub checked_by: String,
}

/// Raw outcome of a probe before it is applied to a registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub response_time_millis: u64,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
    pub checked_by: String,
    pub timestamp: DateTime<Utc>,
}

impl HealthCheckResult {
    pub fn healthy(response_time_millis: u64, status_code: u16) -> Self {
        Self {
            healthy: true,
            response_time_millis,
            status_code: Some(status_code),
            error_message: None,
            checked_by: "system".into(),
            timestamp: Utc::now(),
        }
    }

    pub fn unhealthy(
        response_time_millis: u64,
        status_code: Option<u16>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            healthy: false,
            response_time_millis,
            status_code,
            error_message: Some(error.into()),
            checked_by: "system".into(),
            timestamp: Utc::now(),
        }
    }

    pub fn checked_by(mut self, who: impl Into<String>) -> Self {
        self.checked_by = who.into();
        self
    }
}

/// Whether a promotion moved away from or back to the primary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailoverType {
    Failover,
    Failback,
}

/// Record of a committed rotation or automatic failover
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceFailoverEvent {
    pub id: String,
    pub failover_group: String,
    pub service_type: ServiceType,
    pub old_service_id: String,
    pub new_service_id: String,
    pub failover_reason: String,
    pub failover_type: FailoverType,
    pub timestamp: DateTime<Utc>,
    pub automatic: bool,
}

impl ServiceFailoverEvent {
    pub fn new(
        old: &ServiceRegistration,
        new_service_id: impl Into<String>,
        reason: impl Into<String>,
        failover_type: FailoverType,
        automatic: bool,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            failover_group: old.failover_group.clone(),
            service_type: old.service_type,
            old_service_id: old.id.clone(),
            new_service_id: new_service_id.into(),
            failover_reason: reason.into(),
            failover_type,
            timestamp,
            automatic,
        }
    }
}

// =============================================================================
// Request / response envelopes
// =============================================================================

/// Request to register a new service
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceRegistrationRequest {
    /// Caller-chosen id; required for self-signed registrations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    pub version: String,
    pub url: String,
    #[serde(default)]
    pub health_check_url: String,
    #[serde(default)]
    pub public_key: String,
    /// Signature produced by the service itself over its identity fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    #[serde(default)]
    pub role: ServiceRole,
    #[serde(default)]
    pub failover_group: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub metadata: String,
    pub admin_token: String,
}

/// Request to discover services of a given type
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServiceDiscoveryRequest {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<ServiceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_version: Option<String>,
    #[serde(default)]
    pub only_healthy: bool,
}

/// Services matching a discovery query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDiscoveryResponse {
    pub services: Vec<ServiceRegistration>,
    pub total_count: usize,
    pub timestamp: DateTime<Utc>,
}

/// Request to replace the active registration by another
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceRotationRequest {
    pub current_service_id: String,
    pub new_service: ServiceRegistration,
    pub reason: String,
    pub requested_by: String,
    pub admin_token: String,
    #[serde(default)]
    pub verification_code: String,
}

/// Outcome of a committed rotation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRotationResponse {
    pub success: bool,
    pub old_service_id: String,
    pub new_service_id: String,
    pub rotation_time: DateTime<Utc>,
    /// Correlation hash recorded in the audit trail
    pub verification_hash: String,
    pub message: String,
}

/// Request to retire a registration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceDecommissionRequest {
    pub service_id: String,
    #[serde(default)]
    pub reason: String,
    pub admin_token: String,
}

/// Partial update of a registration; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServiceUpdateRequest {
    pub service_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    /// Fresh signature, required when `version` or `url` change on a
    /// self-signed registration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub admin_token: String,
}

impl ServiceUpdateRequest {
    pub fn is_empty(&self) -> bool {
        self.version.is_none()
            && self.url.is_none()
            && self.health_check_url.is_none()
            && self.priority.is_none()
            && self.metadata.is_none()
    }

    /// Whether the update touches a field covered by the signature
    pub fn touches_signed_fields(&self) -> bool {
        self.version.is_some() || self.url.is_some()
    }

    /// Apply the present fields onto `registration`
    pub fn apply_to(&self, registration: &mut ServiceRegistration) {
        if let Some(ref version) = self.version {
            registration.version = version.clone();
        }
        if let Some(ref url) = self.url {
            registration.url = url.clone();
        }
        if let Some(ref health_check_url) = self.health_check_url {
            registration.health_check_url = health_check_url.clone();
        }
        if let Some(priority) = self.priority {
            registration.priority = priority;
        }
        if let Some(ref metadata) = self.metadata {
            registration.metadata = metadata.clone();
        }
    }
}
