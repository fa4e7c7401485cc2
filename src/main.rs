use std::sync::Arc;

use tower_http::cors::CorsLayer;

use xpbot::api::{self, AppState};
use xpbot::commands::Bot;
use xpbot::config::Config;
use xpbot::cooldown::{spawn_cooldown_sweeper, CooldownTracker};
use xpbot::db::Database;
use xpbot::engine::ProgressionEngine;
use xpbot::metrics;
use xpbot::platform::bridge::GatewayBridge;
use xpbot::presence::spawn_presence_rotator;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("❌ {e}");
            std::process::exit(1);
        }
    };
    tracing::info!(?config, "Configuration loaded");

    metrics::register_metrics();

    let db = match Database::new(&config.database_url).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            tracing::error!("Failed to open database {}: {e}", config.database_url);
            std::process::exit(1);
        }
    };

    let cooldowns = CooldownTracker::new(config.cooldown);
    spawn_cooldown_sweeper(cooldowns.clone());

    let bridge = Arc::new(GatewayBridge::default());
    let engine = ProgressionEngine::new(db.clone(), cooldowns);
    let bot = Arc::new(Bot::new(engine, bridge.clone()));

    spawn_presence_rotator(bridge.clone(), config.status_rotate);

    let state = AppState {
        bot,
        bridge,
        token: Arc::from(config.token.as_str()),
        started_at: chrono::Utc::now(),
    };
    let app = api::router(state).layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {addr}: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!("XP bot listening on {addr}, waiting for the gateway bridge");
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("Server error: {e}");
    }

    db.close().await;
    tracing::info!("XP bot stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
    }
}
