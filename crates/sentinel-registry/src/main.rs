//! Sentinel Registry Server Binary
//!
//! Runs the registry HTTP server and its background health monitor.

use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

use sentinel_registry::{create_router, AppState, HttpProbe, RegistryConfig};

#[tokio::main]
async fn main() {
    let config = match RegistryConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            std::process::exit(2);
        }
    };

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level)
        .with_target(true)
        .with_thread_ids(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    let signer = match config.load_signer() {
        Ok(signer) => signer,
        Err(e) => {
            error!(error = %e, "Failed to load registry signing key");
            std::process::exit(1);
        }
    };

    let probe = HttpProbe::new(config.health_timeout).expect("Failed to build HTTP client");

    info!(
        name = ?config.name,
        port = config.port,
        health_interval = ?config.health_interval,
        derived_admin_tokens = config.authorizer().checks_derived_tokens(),
        verification_codes = config.rotation_secret.is_some(),
        "Starting Sentinel registry"
    );

    let port = config.port;
    let state = Arc::new(AppState::new(config, signer, Arc::new(probe)));
    state.monitor.start();

    // Build router
    let app = create_router(state.clone());

    // Start server
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    info!(addr = %addr, "Sentinel registry listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Server error");

    state.monitor.stop().await;
    info!("Sentinel registry stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
}
