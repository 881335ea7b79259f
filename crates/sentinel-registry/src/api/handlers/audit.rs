//! Security audit handlers
//!
//! Reads and reports require an admin token in the `Authorization: Bearer`
//! header.

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    Json,
};
use sentinel_core::{SecurityEvent, SecurityStatistics};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

use super::{client_ip, AppState, DEFAULT_LIMIT};
use crate::api::error::ApiError;

/// Request to record a security event
#[derive(Debug, Deserialize, Serialize)]
pub struct ReportEventRequest {
    pub event_type: String,
    /// Address the event is about; the caller's address when empty
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub details: String,
}

/// Response listing security events, newest first
#[derive(Debug, Serialize, Deserialize)]
pub struct EventsResponse {
    pub events: Vec<SecurityEvent>,
    pub count: usize,
}

impl From<Vec<SecurityEvent>> for EventsResponse {
    fn from(events: Vec<SecurityEvent>) -> Self {
        Self {
            count: events.len(),
            events,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct StatisticsQuery {
    /// Number of most recent events to aggregate over
    pub window: Option<usize>,
}

fn bearer_token(headers: &HeaderMap) -> &str {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("")
}

fn authorize(
    state: &AppState,
    headers: &HeaderMap,
    operation: &str,
    addr: &SocketAddr,
) -> Result<(), ApiError> {
    state
        .registry
        .authorize(bearer_token(headers), operation, &client_ip(addr))?;
    Ok(())
}

/// POST /v1/security/events
pub async fn report_event(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<ReportEventRequest>,
) -> Result<(StatusCode, Json<SecurityEvent>), ApiError> {
    let event = state.registry.report_security_event(
        bearer_token(&headers),
        &request.event_type,
        &request.ip,
        &request.details,
        &client_ip(&addr),
    )?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// GET /v1/security/events
pub async fn recent_events(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, ApiError> {
    authorize(&state, &headers, "list_events", &addr)?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    Ok(Json(state.registry.audit().recent_events(limit).into()))
}

/// GET /v1/security/events/ip/{ip}
pub async fn events_by_ip(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(ip): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, ApiError> {
    authorize(&state, &headers, "list_events", &addr)?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    Ok(Json(state.registry.audit().events_by_ip(&ip, limit).into()))
}

/// GET /v1/security/events/type/{event_type}
pub async fn events_by_type(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(event_type): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, ApiError> {
    authorize(&state, &headers, "list_events", &addr)?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    Ok(Json(
        state
            .registry
            .audit()
            .events_by_type(&event_type, limit)
            .into(),
    ))
}

/// GET /v1/security/statistics
pub async fn security_statistics(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<StatisticsQuery>,
) -> Result<Json<SecurityStatistics>, ApiError> {
    authorize(&state, &headers, "statistics", &addr)?;
    let audit = state.registry.audit();
    let window = query.window.unwrap_or_else(|| audit.capacity());
    Ok(Json(audit.security_statistics(window)))
}
