//! Registration, discovery and lifecycle handlers

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::StatusCode,
    Json,
};
use sentinel_core::{
    ServiceDecommissionRequest, ServiceDiscoveryRequest, ServiceDiscoveryResponse,
    ServiceFailoverEvent, ServiceRegistration, ServiceRegistrationRequest, ServiceUpdateRequest,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

use super::{client_ip, AppState, DEFAULT_LIMIT};
use crate::api::error::ApiError;
use crate::registry::ServiceHealthReport;

/// Response listing registrations
#[derive(Debug, Serialize, Deserialize)]
pub struct ListServicesResponse {
    pub services: Vec<ServiceRegistration>,
    pub total_count: usize,
}

/// Response listing failover events of one group
#[derive(Debug, Serialize, Deserialize)]
pub struct FailoverHistoryResponse {
    pub failover_group: String,
    pub events: Vec<ServiceFailoverEvent>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

/// Register a service
///
/// POST /v1/services/register
pub async fn register_service(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<ServiceRegistrationRequest>,
) -> Result<(StatusCode, Json<ServiceRegistration>), ApiError> {
    let registration = state
        .registry
        .register_service(request, &client_ip(&addr))
        .await?;
    Ok((StatusCode::CREATED, Json(registration)))
}

/// Discover services
///
/// POST /v1/services/discover
pub async fn discover_services(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ServiceDiscoveryRequest>,
) -> Result<Json<ServiceDiscoveryResponse>, ApiError> {
    Ok(Json(state.registry.discover(&request).await?))
}

/// List all live registrations
///
/// GET /v1/services
pub async fn list_services(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ListServicesResponse>, ApiError> {
    let services = state.registry.list_services().await?;
    Ok(Json(ListServicesResponse {
        total_count: services.len(),
        services,
    }))
}

/// GET /v1/services/{id}
pub async fn get_service(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ServiceRegistration>, ApiError> {
    Ok(Json(state.registry.get_service(&id).await?))
}

/// GET /v1/services/{id}/health
pub async fn service_health(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ServiceHealthReport>, ApiError> {
    Ok(Json(state.registry.service_health(&id).await?))
}

/// Patch a registration
///
/// POST /v1/services/update
pub async fn update_service(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<ServiceUpdateRequest>,
) -> Result<Json<ServiceRegistration>, ApiError> {
    Ok(Json(
        state
            .registry
            .update_service(request, &client_ip(&addr))
            .await?,
    ))
}

/// Retire a registration
///
/// POST /v1/services/decommission
pub async fn decommission_service(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<ServiceDecommissionRequest>,
) -> Result<Json<ServiceRegistration>, ApiError> {
    Ok(Json(
        state
            .registry
            .decommission_service(request, &client_ip(&addr))
            .await?,
    ))
}

/// GET /v1/failover/{group}/history
pub async fn failover_history(
    State(state): State<Arc<AppState>>,
    Path(group): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<FailoverHistoryResponse>, ApiError> {
    let events = state
        .registry
        .failover_history(&group, query.limit.unwrap_or(DEFAULT_LIMIT))
        .await?;
    Ok(Json(FailoverHistoryResponse {
        failover_group: group,
        events,
    }))
}
