//! API module for the registry server

pub mod error;
pub mod handlers;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use handlers::AppState;

/// Health check response
#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Readiness check response
#[derive(Serialize, Deserialize)]
pub struct ReadyResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub service_count: usize,
    pub health_monitor_running: bool,
    pub audit_events: usize,
}

/// Health check endpoint
///
/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: sentinel_core::version().into(),
    })
}

/// Readiness check endpoint
///
/// GET /ready
pub async fn ready(State(state): State<Arc<AppState>>) -> Json<ReadyResponse> {
    let service_count = state
        .registry
        .list_services()
        .await
        .map(|v| v.len())
        .unwrap_or(0);

    Json(ReadyResponse {
        ready: true,
        name: state.config.name.clone(),
        service_count,
        health_monitor_running: state.monitor.is_running(),
        audit_events: state.registry.audit().len(),
    })
}

/// Create the API router
///
/// Handlers that audit the caller read its address from `ConnectInfo`, so
/// the router must be served with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        // Key endpoints
        .route("/v1/keys/registry", get(handlers::registry_key))
        // Service endpoints
        .route("/v1/services", get(handlers::list_services))
        .route("/v1/services/register", post(handlers::register_service))
        .route("/v1/services/discover", post(handlers::discover_services))
        .route("/v1/services/update", post(handlers::update_service))
        .route("/v1/services/decommission", post(handlers::decommission_service))
        .route("/v1/services/rotate", post(handlers::rotate_service))
        .route("/v1/services/{id}", get(handlers::get_service))
        .route("/v1/services/{id}/health", get(handlers::service_health))
        .route("/v1/failover/{group}/history", get(handlers::failover_history))
        // Security audit endpoints
        .route(
            "/v1/security/events",
            post(handlers::report_event).get(handlers::recent_events),
        )
        .route("/v1/security/events/ip/{ip}", get(handlers::events_by_ip))
        .route(
            "/v1/security/events/type/{event_type}",
            get(handlers::events_by_type),
        )
        .route("/v1/security/statistics", get(handlers::security_statistics))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
