//! Pairwire relay server library
//!
//! Presence and direct messaging between identity pairs over persistent
//! WebSocket push channels.

pub mod broadcast;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod identity;
pub mod messaging;
pub mod models;
pub mod presence;
pub mod protocol;
pub mod store;

use axum::{http::HeaderValue, routing::get, Router};
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::{AppState, ServerConfig};
use handlers::ws_upgrade;

/// Build the relay router for `state`.
pub fn router(state: AppState) -> Router {
    let cors = match state.config.cors_origin.as_deref().map(HeaderValue::from_str) {
        Some(Ok(origin)) => CorsLayer::new().allow_origin(origin),
        Some(Err(e)) => {
            warn!("[Server] Ignoring invalid CORS_ORIGIN: {}", e);
            CorsLayer::permissive()
        }
        None => CorsLayer::permissive(),
    };

    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}

pub async fn run() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if tracing_subscriber::fmt().with_env_filter(filter).try_init().is_err() {
        // Already set, ignore
    }

    info!("=== Pairwire Relay ===");

    pairwire_common::init_structure()?;
    let config = ServerConfig::from_env();
    info!("Database: {:?}", config.db_path);

    let port = config.port;
    let state = AppState::build(config).await?;
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Listening on ws://{}/ws", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK - Pairwire Relay"
}
