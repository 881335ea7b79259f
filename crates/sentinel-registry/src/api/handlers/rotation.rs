//! Service rotation handler

use axum::{
    extract::{ConnectInfo, State},
    Json,
};
use sentinel_core::{ServiceRotationRequest, ServiceRotationResponse};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use super::{client_ip, AppState};
use crate::api::error::ApiError;

/// Replace the active registration of a failover group
///
/// POST /v1/services/rotate
///
/// The target must already be registered and healthy. On success the
/// response carries a verification hash bound to the new service id and
/// the admin token used.
pub async fn rotate_service(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<ServiceRotationRequest>,
) -> Result<Json<ServiceRotationResponse>, ApiError> {
    let ip = client_ip(&addr);
    info!(
        current_service = %request.current_service_id,
        new_service = %request.new_service.id,
        ip = %ip,
        "Processing rotation request"
    );

    Ok(Json(state.registry.rotate_service(request, &ip).await?))
}
