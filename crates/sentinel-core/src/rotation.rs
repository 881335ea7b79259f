//! Rotation gate
//!
//! A rotation replaces the active registration of a failover group. It is
//! the most destructive registry operation, so it is gated by five checks
//! evaluated in a fixed order, each with its own failure:
//!
//! 1. authorization: admin token at least 32 characters
//! 2. source eligibility: the old service is not rotating/decommissioned
//! 3. target authenticity: the new service's signature verifies
//! 4. type agreement: both services have the same type
//! 5. target readiness: the new service is healthy and at least
//!    `min_target_age` old

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::warn;

use crate::crypto::verify_registration;
use crate::error::SentinelError;
use crate::token::{admin_token_has_min_length, verify_rotation_code, MIN_ADMIN_TOKEN_LEN};
use crate::types::{ServiceRegistration, ServiceStatus, ServiceType};

/// Reason a rotation was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RotationError {
    #[error("Invalid admin token: at least {min_len} characters required")]
    InvalidAdminToken { min_len: usize },

    #[error("Invalid rotation verification code")]
    InvalidVerificationCode,

    #[error("Service {service_id} cannot be rotated in status {status}")]
    NotRotatable {
        service_id: String,
        status: ServiceStatus,
    },

    #[error("New service signature invalid: {0}")]
    TargetSignatureInvalid(SentinelError),

    #[error("Service type mismatch: old={old}, new={new}")]
    ServiceTypeMismatch { old: ServiceType, new: ServiceType },

    #[error("New service {service_id} is not healthy (status {status})")]
    TargetNotHealthy {
        service_id: String,
        status: ServiceStatus,
    },

    #[error("New service {service_id} registered {age_secs}s ago, must be at least {required_secs}s")]
    TargetTooYoung {
        service_id: String,
        age_secs: i64,
        required_secs: i64,
    },
}

impl RotationError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            RotationError::InvalidAdminToken { .. } => "INVALID_ADMIN_TOKEN",
            RotationError::InvalidVerificationCode => "INVALID_VERIFICATION_CODE",
            RotationError::NotRotatable { .. } => "NOT_ROTATABLE",
            RotationError::TargetSignatureInvalid(_) => "TARGET_SIGNATURE_INVALID",
            RotationError::ServiceTypeMismatch { .. } => "SERVICE_TYPE_MISMATCH",
            RotationError::TargetNotHealthy { .. } => "TARGET_NOT_HEALTHY",
            RotationError::TargetTooYoung { .. } => "TARGET_TOO_YOUNG",
        }
    }

    /// Authorization failures, as opposed to verification or precondition ones
    pub fn is_authorization_failure(&self) -> bool {
        matches!(
            self,
            RotationError::InvalidAdminToken { .. } | RotationError::InvalidVerificationCode
        )
    }
}

/// Tunables of the rotation gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Minimum admin token length
    pub min_admin_token_len: usize,
    /// Minimum time a target must have been registered
    pub min_target_age: Duration,
    /// When set, rotation requests must carry the matching verification code
    pub rotation_secret: Option<String>,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            min_admin_token_len: MIN_ADMIN_TOKEN_LEN,
            min_target_age: Duration::minutes(5),
            rotation_secret: None,
        }
    }
}

impl RotationPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_target_age(mut self, age: Duration) -> Self {
        self.min_target_age = age;
        self
    }

    pub fn with_rotation_secret(mut self, secret: impl Into<String>) -> Self {
        self.rotation_secret = Some(secret.into());
        self
    }

    /// Check 1: admin token length
    pub fn check_admin_token(&self, admin_token: &str) -> Result<(), RotationError> {
        if !admin_token_has_min_length(admin_token, self.min_admin_token_len) {
            return Err(RotationError::InvalidAdminToken {
                min_len: self.min_admin_token_len,
            });
        }
        Ok(())
    }

    /// Verification code for `current_service_id`, only when a secret is configured
    pub fn check_verification_code(
        &self,
        current_service_id: &str,
        code: &str,
    ) -> Result<(), RotationError> {
        match self.rotation_secret {
            Some(ref secret) if !verify_rotation_code(current_service_id, code, secret) => {
                Err(RotationError::InvalidVerificationCode)
            }
            _ => Ok(()),
        }
    }

    /// Run all five checks in order, returning the first failure
    pub fn verify(
        &self,
        old_service: &ServiceRegistration,
        new_service: &ServiceRegistration,
        admin_token: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RotationError> {
        let result = self.verify_inner(old_service, new_service, admin_token, now);
        if let Err(ref err) = result {
            warn!(
                old_service = %old_service.id,
                new_service = %new_service.id,
                code = err.code(),
                error = %err,
                "SECURITY: Service rotation rejected"
            );
        }
        result
    }

    fn verify_inner(
        &self,
        old_service: &ServiceRegistration,
        new_service: &ServiceRegistration,
        admin_token: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RotationError> {
        self.check_admin_token(admin_token)?;

        if !old_service.can_rotate() {
            return Err(RotationError::NotRotatable {
                service_id: old_service.id.clone(),
                status: old_service.status,
            });
        }

        verify_registration(new_service).map_err(RotationError::TargetSignatureInvalid)?;

        if old_service.service_type != new_service.service_type {
            return Err(RotationError::ServiceTypeMismatch {
                old: old_service.service_type,
                new: new_service.service_type,
            });
        }

        if !new_service.is_healthy() {
            return Err(RotationError::TargetNotHealthy {
                service_id: new_service.id.clone(),
                status: new_service.status,
            });
        }

        let age = now - new_service.registered_at;
        if age < self.min_target_age {
            return Err(RotationError::TargetTooYoung {
                service_id: new_service.id.clone(),
                age_secs: age.num_seconds(),
                required_secs: self.min_target_age.num_seconds(),
            });
        }

        Ok(())
    }
}

/// Check a rotation with the default policy
pub fn verify_service_rotation(
    old_service: &ServiceRegistration,
    new_service: &ServiceRegistration,
    admin_token: &str,
) -> Result<(), RotationError> {
    RotationPolicy::default().verify(old_service, new_service, admin_token, Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ServiceSigner;
    use crate::token::generate_rotation_code;
    use std::sync::OnceLock;

    fn signer() -> &'static ServiceSigner {
        static SIGNER: OnceLock<ServiceSigner> = OnceLock::new();
        SIGNER.get_or_init(|| ServiceSigner::generate_with_bits(1024).unwrap())
    }

    fn token() -> String {
        "t".repeat(32)
    }

    fn service(name: &str, status: ServiceStatus, age_minutes: i64) -> ServiceRegistration {
        let mut reg = ServiceRegistration::builder()
            .name(name)
            .service_type(ServiceType::Authentication)
            .version("1.0.0")
            .url(format!("http://{name}:8080"))
            .status(status)
            .failover_group("auth")
            .registered_at(Utc::now() - Duration::minutes(age_minutes))
            .build()
            .unwrap();
        signer().sign(&mut reg).unwrap();
        reg
    }

    #[test]
    fn test_all_checks_pass() {
        let old = service("auth-a", ServiceStatus::Healthy, 60);
        let new = service("auth-b", ServiceStatus::Healthy, 10);
        assert_eq!(verify_service_rotation(&old, &new, &token()), Ok(()));
    }

    #[test]
    fn test_short_admin_token() {
        let old = service("auth-a", ServiceStatus::Healthy, 60);
        let new = service("auth-b", ServiceStatus::Healthy, 10);
        let err = verify_service_rotation(&old, &new, &"t".repeat(31)).unwrap_err();
        assert_eq!(err, RotationError::InvalidAdminToken { min_len: 32 });
        assert!(err.is_authorization_failure());
    }

    #[test]
    fn test_token_checked_before_everything_else() {
        let old = service("auth-a", ServiceStatus::Decommissioned, 60);
        let mut new = service("auth-b", ServiceStatus::Unhealthy, 0);
        new.url = "http://tampered".into();
        let err = verify_service_rotation(&old, &new, "short").unwrap_err();
        assert_eq!(err.code(), "INVALID_ADMIN_TOKEN");
    }

    #[test]
    fn test_source_not_rotatable() {
        let new = service("auth-b", ServiceStatus::Healthy, 10);
        for status in [ServiceStatus::Rotating, ServiceStatus::Decommissioned] {
            let old = service("auth-a", status, 60);
            let err = verify_service_rotation(&old, &new, &token()).unwrap_err();
            assert!(matches!(err, RotationError::NotRotatable { .. }));
        }
    }

    #[test]
    fn test_unhealthy_source_is_rotatable() {
        let old = service("auth-a", ServiceStatus::Unhealthy, 60);
        let new = service("auth-b", ServiceStatus::Healthy, 10);
        assert!(verify_service_rotation(&old, &new, &token()).is_ok());
    }

    #[test]
    fn test_target_signature_invalid() {
        let old = service("auth-a", ServiceStatus::Healthy, 60);
        let mut new = service("auth-b", ServiceStatus::Healthy, 10);
        new.url = "http://attacker:8080".into();
        let err = verify_service_rotation(&old, &new, &token()).unwrap_err();
        assert!(matches!(
            err,
            RotationError::TargetSignatureInvalid(SentinelError::SignatureMismatch(_))
        ));
    }

    #[test]
    fn test_type_mismatch() {
        let old = service("auth-a", ServiceStatus::Healthy, 60);
        let mut new = service("perm-b", ServiceStatus::Healthy, 10);
        new.service_type = ServiceType::Permissions;
        signer().sign(&mut new).unwrap();
        let err = verify_service_rotation(&old, &new, &token()).unwrap_err();
        assert_eq!(
            err,
            RotationError::ServiceTypeMismatch {
                old: ServiceType::Authentication,
                new: ServiceType::Permissions,
            }
        );
    }

    #[test]
    fn test_target_not_healthy() {
        let old = service("auth-a", ServiceStatus::Healthy, 60);
        for status in [
            ServiceStatus::Registering,
            ServiceStatus::Unhealthy,
            ServiceStatus::Rotating,
            ServiceStatus::Decommissioned,
        ] {
            let new = service("auth-b", status, 10);
            let err = verify_service_rotation(&old, &new, &token()).unwrap_err();
            assert_eq!(err.code(), "TARGET_NOT_HEALTHY");
        }
    }

    #[test]
    fn test_target_too_young() {
        let old = service("auth-a", ServiceStatus::Healthy, 60);
        let new = service("auth-b", ServiceStatus::Healthy, 4);
        let err = verify_service_rotation(&old, &new, &token()).unwrap_err();
        match err {
            RotationError::TargetTooYoung {
                age_secs,
                required_secs,
                ..
            } => {
                assert!(age_secs < required_secs);
                assert_eq!(required_secs, 300);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_exact_minimum_age_passes() {
        let now = Utc::now();
        let old = service("auth-a", ServiceStatus::Healthy, 60);
        let mut new = service("auth-b", ServiceStatus::Healthy, 0);
        new.registered_at = now - Duration::minutes(5);
        let policy = RotationPolicy::default();
        assert!(policy.verify(&old, &new, &token(), now).is_ok());
    }

    #[test]
    fn test_custom_min_age() {
        let old = service("auth-a", ServiceStatus::Healthy, 60);
        let new = service("auth-b", ServiceStatus::Healthy, 0);
        let policy = RotationPolicy::new().with_min_target_age(Duration::zero());
        assert!(policy.verify(&old, &new, &token(), Utc::now()).is_ok());
    }

    #[test]
    fn test_verification_code() {
        let policy = RotationPolicy::new().with_rotation_secret("rot-secret");
        let code = generate_rotation_code("svc-1", "rot-secret").unwrap();
        assert!(policy.check_verification_code("svc-1", &code).is_ok());
        assert_eq!(
            policy.check_verification_code("svc-1", "wrong"),
            Err(RotationError::InvalidVerificationCode)
        );

        // No secret configured: the code is not required
        assert!(RotationPolicy::default()
            .check_verification_code("svc-1", "")
            .is_ok());
    }
}
