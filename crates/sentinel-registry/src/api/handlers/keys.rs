//! Registry key handler

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::AppState;

/// Signature scheme of registry-signed registrations
pub const SIGNATURE_ALGORITHM: &str = "RSASSA-PKCS1-v1_5-SHA256";

/// The registry's public signing key
#[derive(Debug, Serialize, Deserialize)]
pub struct RegistryKeyResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub algorithm: String,
    /// SPKI PEM
    pub public_key: String,
}

/// GET /v1/keys/registry
pub async fn registry_key(State(state): State<Arc<AppState>>) -> Json<RegistryKeyResponse> {
    Json(RegistryKeyResponse {
        name: state.config.name.clone(),
        algorithm: SIGNATURE_ALGORITHM.into(),
        public_key: state.registry.public_key_pem().to_string(),
    })
}
