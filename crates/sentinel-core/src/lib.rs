//! # Sentinel Core
//!
//! Registration model, signature codec and security primitives for the
//! Sentinel service registry.
//!
//! ## Key Concepts
//!
//! - **Registration**: identity and operational record of one service instance
//! - **Signature**: RSA signature binding `(id, name, type, version, url, public_key)`
//! - **Rotation**: gated replacement of the active member of a failover group
//! - **Audit trail**: bounded, classified log of security-relevant events
//!
//! ## Invariants
//!
//! 1. **Authenticity**: a registration verifies only against the exact
//!    identity fields and public key it was signed with
//! 2. **Single active**: at most one active registration per failover group
//!    and service type
//! 3. **Gated rotation**: a rotation commits only after every check passes

pub mod audit;
pub mod crypto;
pub mod error;
pub mod rotation;
pub mod token;
pub mod types;

pub use audit::{
    classify_action, classify_severity, Action, SecurityAuditLog, SecurityEvent,
    SecurityStatistics, Severity,
};
pub use crypto::{canonical_payload, verify_registration, ServiceSigner};
pub use error::{Result, SentinelError};
pub use rotation::{verify_service_rotation, RotationError, RotationPolicy};
pub use token::{
    admin_token_has_min_length, generate_admin_token, generate_rotation_code,
    verify_admin_token, verify_rotation_code,
};
pub use types::{
    FailoverType, HealthCheckResult, RegistrationBuilder, ServiceDecommissionRequest,
    ServiceDiscoveryRequest, ServiceDiscoveryResponse, ServiceFailoverEvent, ServiceHealthCheck,
    ServiceRegistration, ServiceRegistrationRequest, ServiceRole, ServiceRotationRequest,
    ServiceRotationResponse, ServiceStatus, ServiceType, ServiceUpdateRequest,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the library version
pub fn version() -> &'static str {
    VERSION
}
