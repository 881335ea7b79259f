//! API error types and responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sentinel_core::RotationError;
use serde::Serialize;
use thiserror::Error;

use crate::registry::RegistryError;
use crate::storage::StorageError;

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Invalid signature")]
    InvalidSignature(String),

    #[error("Rotation rejected")]
    Rotation(RotationError),
}

/// API error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                msg.clone(),
                None,
            ),
            ApiError::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                msg.clone(),
                None,
            ),
            ApiError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                msg.clone(),
                None,
            ),
            ApiError::Conflict(msg) => (
                StatusCode::CONFLICT,
                "CONFLICT",
                msg.clone(),
                None,
            ),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
                None,
            ),
            ApiError::InvalidSignature(msg) => (
                StatusCode::UNAUTHORIZED,
                "INVALID_SIGNATURE",
                msg.clone(),
                None,
            ),
            ApiError::Rotation(err) => (
                rotation_status(err),
                err.code(),
                err.to_string(),
                rotation_details(err),
            ),
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

fn rotation_status(err: &RotationError) -> StatusCode {
    match err {
        RotationError::InvalidAdminToken { .. }
        | RotationError::InvalidVerificationCode
        | RotationError::TargetSignatureInvalid(_) => StatusCode::UNAUTHORIZED,
        RotationError::ServiceTypeMismatch { .. } => StatusCode::BAD_REQUEST,
        RotationError::NotRotatable { .. }
        | RotationError::TargetNotHealthy { .. }
        | RotationError::TargetTooYoung { .. } => StatusCode::CONFLICT,
    }
}

fn rotation_details(err: &RotationError) -> Option<serde_json::Value> {
    match err {
        RotationError::NotRotatable { service_id, status }
        | RotationError::TargetNotHealthy { service_id, status } => Some(serde_json::json!({
            "service_id": service_id,
            "status": status,
        })),
        RotationError::ServiceTypeMismatch { old, new } => Some(serde_json::json!({
            "old_type": old,
            "new_type": new,
        })),
        RotationError::TargetTooYoung {
            service_id,
            age_secs,
            required_secs,
        } => Some(serde_json::json!({
            "service_id": service_id,
            "age_secs": age_secs,
            "required_secs": required_secs,
        })),
        _ => None,
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(id) => ApiError::NotFound(format!("Service '{}' not found", id)),
            StorageError::Conflict(msg) => ApiError::Conflict(msg),
            StorageError::InvalidTransition { .. } => ApiError::Conflict(err.to_string()),
            StorageError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Unauthorized(e) => ApiError::Unauthorized(e.to_string()),
            RegistryError::Validation(msg) => ApiError::BadRequest(msg),
            RegistryError::Verification(e) => ApiError::InvalidSignature(e.to_string()),
            RegistryError::Rotation(e) => ApiError::Rotation(e),
            RegistryError::Storage(e) => e.into(),
            RegistryError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}
