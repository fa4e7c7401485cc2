// HTTP routes: keep-alive, health, metrics and the gateway websocket.

pub mod ws;

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde_json::json;

use crate::commands::Bot;
use crate::metrics;
use crate::platform::bridge::GatewayBridge;
use crate::platform::ChatPlatform;

// ── Shared application state ─────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub bot: Arc<Bot>,
    pub bridge: Arc<GatewayBridge>,
    /// Bearer token the gateway bridge must present.
    pub token: Arc<str>,
    pub started_at: DateTime<Utc>,
}

// ── Router ────────────────────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(keep_alive))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/ws/gateway", get(ws::ws_gateway))
        .with_state(state)
}

async fn keep_alive() -> &'static str {
    "I'm alive"
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let uptime = (Utc::now() - state.started_at).num_seconds();
    Json(json!({
        "status": "ok",
        "service": "xpbot",
        "gateway_ready": state.bridge.session().is_some(),
        "started_at": state.started_at.to_rfc3339(),
        "uptime_seconds": uptime,
    }))
}

async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    )
}
