//! HTTP API Tests
//!
//! Requests go through the full router, including the JSON error mapping.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::connect_info::MockConnectInfo,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use sentinel_core::{HealthCheckResult, ServiceRegistration, ServiceSigner};
use sentinel_registry::{create_router, AppState, HealthProbe, RegistryConfig};
use serde_json::{json, Value};
use tower::ServiceExt;

const ADMIN_TOKEN: &str = "api-test-admin-token-0123456789abcdef";

fn signer() -> ServiceSigner {
    static SIGNER: OnceLock<ServiceSigner> = OnceLock::new();
    SIGNER
        .get_or_init(|| ServiceSigner::generate_with_bits(1024).expect("key generation"))
        .clone()
}

#[derive(Debug)]
struct AlwaysHealthy;

#[async_trait]
impl HealthProbe for AlwaysHealthy {
    async fn probe(&self, _registration: &ServiceRegistration) -> HealthCheckResult {
        HealthCheckResult::healthy(1, 200)
    }
}

fn create_app() -> (Router, Arc<AppState>) {
    let config = RegistryConfig {
        name: Some("sentinel-test".into()),
        ..RegistryConfig::default()
    };
    let state = Arc::new(AppState::new(config, signer(), Arc::new(AlwaysHealthy)));
    let addr: SocketAddr = "192.0.2.10:40000".parse().unwrap();
    let app = create_router(state.clone()).layer(MockConnectInfo(addr));
    (app, state)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn get_authorized(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {ADMIN_TOKEN}"))
        .body(Body::empty())
        .unwrap()
}

fn registration(name: &str) -> Value {
    json!({
        "name": name,
        "type": "extension",
        "version": "1.0.0",
        "url": format!("http://{name}:8080"),
        "failover_group": "ext",
        "admin_token": ADMIN_TOKEN,
    })
}

#[tokio::test]
async fn test_health_and_ready() {
    let (app, _state) = create_app();

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], sentinel_core::VERSION);

    let (status, body) = send(&app, get("/ready")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);
    assert_eq!(body["name"], "sentinel-test");
    assert_eq!(body["health_monitor_running"], false);
}

#[tokio::test]
async fn test_registry_key() {
    let (app, state) = create_app();
    let (status, body) = send(&app, get("/v1/keys/registry")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["public_key"], state.registry.public_key_pem());
    assert_eq!(body["algorithm"], "RSASSA-PKCS1-v1_5-SHA256");
}

#[tokio::test]
async fn test_register_then_fetch() {
    let (app, _state) = create_app();

    let (status, created) = send(&app, post_json("/v1/services/register", registration("ext-a"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "registering");
    assert_eq!(created["is_active"], true);
    let id = created["id"].as_str().unwrap().to_string();

    let (status, fetched) = send(&app, get(&format!("/v1/services/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["signature"], created["signature"]);

    let (status, listed) = send(&app, get("/v1/services")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["total_count"], 1);

    let (status, health) = send(&app, get(&format!("/v1/services/{id}/health"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["health_check_count"], 0);
}

#[tokio::test]
async fn test_discover_after_health_check() {
    let (app, state) = create_app();
    send(&app, post_json("/v1/services/register", registration("ext-a"))).await;
    state.monitor.check_all().await.unwrap();

    let (status, body) = send(
        &app,
        post_json(
            "/v1/services/discover",
            json!({ "type": "extension", "only_healthy": true }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_count"], 1);
    assert_eq!(body["services"][0]["status"], "healthy");
}

#[tokio::test]
async fn test_error_bodies() {
    let (app, _state) = create_app();

    let (status, body) = send(&app, get("/v1/services/does-not-exist")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    let mut weak = registration("ext-a");
    weak["admin_token"] = json!("short");
    let (status, body) = send(&app, post_json("/v1/services/register", weak)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let mut nameless = registration("ext-a");
    nameless["name"] = json!("");
    let (status, body) = send(&app, post_json("/v1/services/register", nameless)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_rotation_rejection_carries_code() {
    let (app, _state) = create_app();
    let (_, old) = send(&app, post_json("/v1/services/register", registration("ext-a"))).await;
    let (_, new) = send(&app, post_json("/v1/services/register", registration("ext-b"))).await;

    let (status, body) = send(
        &app,
        post_json(
            "/v1/services/rotate",
            json!({
                "current_service_id": old["id"],
                "new_service": new,
                "reason": "upgrade",
                "requested_by": "ops",
                "admin_token": ADMIN_TOKEN,
            }),
        ),
    )
    .await;

    // Target was never probed
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "TARGET_NOT_HEALTHY");
    assert_eq!(body["details"]["status"], "registering");
}

#[tokio::test]
async fn test_security_events_require_admin_token() {
    let (app, _state) = create_app();

    let (status, _) = send(&app, get("/v1/security/events")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&app, get_authorized("/v1/security/events/ip/192.0.2.10")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["events"][0]["event_type"], "INVALID_TOKEN");
}

#[tokio::test]
async fn test_report_event_and_statistics() {
    let (app, _state) = create_app();

    let report = Request::builder()
        .method("POST")
        .uri("/v1/security/events")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {ADMIN_TOKEN}"))
        .body(Body::from(
            json!({
                "event_type": "SQL_INJECTION",
                "ip": "198.51.100.7",
                "details": "union select in query string",
            })
            .to_string(),
        ))
        .unwrap();
    let (status, event) = send(&app, report).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(event["severity"], "CRITICAL");
    assert_eq!(event["action"], "BLOCKED");

    let (status, body) =
        send(&app, get_authorized("/v1/security/events/type/SQL_INJECTION")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["events"][0]["ip"], "198.51.100.7");

    let (status, stats) = send(&app, get_authorized("/v1/security/statistics")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total_events"], 1);
    assert_eq!(stats["critical_events"], 1);
    assert_eq!(stats["blocked_events"], 1);
}
