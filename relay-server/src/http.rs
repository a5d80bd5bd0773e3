//! HTTP surface: router assembly, shared state and the operational endpoints

use axum::{
    extract::{DefaultBodyLimit, State},
    routing::get,
    Json, Router,
};
use relay_core::{MetricsSnapshot, Relay, ToggleStatus};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{admin, capture};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(relay: Arc<Relay>) -> Self {
        Self {
            relay,
            started_at: Instant::now(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub capture: ToggleStatus,
    pub intercept: ToggleStatus,
}

/// Build the full router: capture API, admin API, health and metrics.
pub fn build_router(state: AppState, body_limit_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .nest("/capture", capture::router())
        .nest("/admin", admin::router())
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        capture: state.relay.capture_status(),
        intercept: state.relay.intercept_status(),
    })
}

async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.relay.metrics().snapshot())
}
