//! HTTP API — Axum server for engine commands and observers.
//!
//! Serves the engine's command endpoints, a JSON state view, an SSE event
//! stream, and the game/bet CRUD endpoints backed by the key/value store.
//! CORS enabled for browser front-ends.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    routing::{delete, get, post},
    Router,
};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

pub use routes::{ApiState, AppState};

/// Bind the listener and serve in a background task.
pub async fn spawn_server(state: AppState, port: u16, cors_origin: &str) -> Result<JoinHandle<()>> {
    let app = build_router(state, cors_origin)?;
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API port {port}"))?;

    info!(port, "API server listening on http://localhost:{port}");

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server error");
        }
    }))
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState, cors_origin: &str) -> Result<Router> {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);
    let cors = if cors_origin == "*" {
        cors.allow_origin(Any)
    } else {
        let origin = cors_origin
            .parse::<HeaderValue>()
            .with_context(|| format!("Invalid CORS origin: {cors_origin}"))?;
        cors.allow_origin(origin)
    };

    Ok(Router::new()
        // Engine
        .route("/api/state", get(routes::get_state))
        .route("/api/events", get(routes::stream_events))
        .route("/api/bet", post(routes::place_bet))
        .route("/api/cashout", post(routes::cash_out))
        .route("/api/rounds/:id", get(routes::get_round))
        // Game / bet CRUD
        .route("/game/create", post(routes::create_game))
        .route("/bets", post(routes::create_bet))
        .route("/bets/generate", get(routes::generate_bets))
        .route("/bets/:id", delete(routes::delete_bet))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
