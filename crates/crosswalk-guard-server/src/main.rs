//! crosswalk-guard service binary.
//!
//! Wires the coordination engine to its WebSocket gateway:
//! - accepts client sessions on `GET /ws` and pushes alerts back
//! - runs the periodic sweep so stale drivers expire even when silent
//! - delegates frame classification to an external HTTP oracle
//! - archives classified captures to the local filesystem

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{routing::get, Json, Router};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use crosswalk_guard_core::{
    CrosswalkRegistry, EvalEngine, EventSink, LeaseCoordinator, MemoryStore, RiskConfig, Sweeper,
};
use crosswalk_guard_server::classify::{HttpClassifier, UnconfiguredClassifier};
use crosswalk_guard_server::media::FsCaptureStore;
use crosswalk_guard_server::{gateway, AppState, SessionHub};

#[derive(Parser, Debug)]
#[command(name = "crosswalk-guard", about = "Crosswalk proximity-alert service")]
struct Args {
    /// Listen address for the HTTP/WebSocket server
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    /// Sweep interval in milliseconds
    #[arg(long, default_value = "1000")]
    sweep_interval_ms: u64,

    /// Driver presence TTL in milliseconds
    #[arg(long, default_value = "3000")]
    driver_ttl_ms: u64,

    /// Minimum distance change (meters) to re-emit an active alert
    #[arg(long, default_value = "3.0")]
    debounce_delta_m: f64,

    /// Fixed safety margin (meters) added to the stopping distance
    #[arg(long, default_value = "20.0")]
    safety_buffer_m: f64,

    /// Pedestrian-facing zone as a multiple of the driver-facing zone
    #[arg(long, default_value = "2.5")]
    outer_factor: f64,

    /// Classification oracle endpoint; predict commands fail visibly when
    /// unset
    #[arg(long, value_name = "URL")]
    classifier_url: Option<String>,

    /// Directory for archived captures
    #[arg(long, default_value = "captures")]
    capture_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let config = RiskConfig::default()
        .with_sweep_interval(Duration::from_millis(args.sweep_interval_ms))
        .with_driver_presence_ttl(Duration::from_millis(args.driver_ttl_ms))
        .with_debounce_min_delta_m(args.debounce_delta_m)
        .with_safety_buffer_m(args.safety_buffer_m)
        .with_outer_factor(args.outer_factor);

    let store = Arc::new(MemoryStore::new());
    let hub = SessionHub::new();
    let registry = CrosswalkRegistry::new(store.clone());
    let engine = Arc::new(EvalEngine::new(
        store.clone(),
        Arc::new(hub.clone()) as Arc<dyn EventSink>,
        config.clone(),
    ));
    let coordinator = Arc::new(LeaseCoordinator::new(store.clone(), engine));

    let classifier: Arc<dyn crosswalk_guard_server::classify::CrosswalkClassifier> =
        match &args.classifier_url {
            Some(url) => {
                info!(endpoint = %url, "using HTTP classifier oracle");
                Arc::new(HttpClassifier::new(url).context("building classifier client")?)
            }
            None => {
                info!("no classifier endpoint configured; predict commands will fail");
                Arc::new(UnconfiguredClassifier)
            }
        };

    let state = AppState {
        hub,
        registry: registry.clone(),
        coordinator: coordinator.clone(),
        classifier,
        captures: Arc::new(FsCaptureStore::new(&args.capture_dir)),
    };

    let cancel = CancellationToken::new();
    let sweeper = Sweeper::new(registry, coordinator, config.sweep_interval);
    let sweep_task = tokio::spawn(sweeper.run(cancel.clone()));

    let router = Router::new()
        .route("/ws", get(gateway::ws_handler))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("binding {}", args.listen))?;
    info!(listen = %args.listen, "crosswalk-guard listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
        .context("serving")?;

    cancel.cancel();
    let _ = sweep_task.await;
    info!("shutdown complete");
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn shutdown_signal(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
    cancel.cancel();
}
