//! AVIATOR — authoritative crash-game round engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the store, starts the engine task and the HTTP API, and waits
//! for Ctrl+C to shut down cleanly.

use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use aviator::api::{self, ApiState};
use aviator::config::AppConfig;
use aviator::engine::{crash, spawn_engine, RoundEngine};
use aviator::storage;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = AppConfig::default_path();
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    info!(
        config = %config_path,
        port = cfg.server.port,
        countdown_secs = cfg.game.countdown_secs,
        growth_rate = cfg.game.growth_rate,
        crash_policy = %cfg.crash.policy,
        storage = %cfg.storage.backend,
        "AVIATOR starting up"
    );

    // -- Initialise components -------------------------------------------

    let store = storage::open(&cfg.storage).await?;
    let policy = crash::from_config(&cfg.crash)?;
    let engine = RoundEngine::new(
        cfg.game.round_config(cfg.crash.max_multiplier),
        policy,
        Instant::now(),
    );
    let (handle, engine_task) = spawn_engine(engine, store.clone(), cfg.game.tick_interval());

    let state = Arc::new(ApiState::new(handle.clone(), store));
    let server = api::spawn_server(state, cfg.server.port, &cfg.server.cors_origin).await?;

    info!("Serving. Press Ctrl+C to stop.");

    // -- Wait for shutdown -------------------------------------------------

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received.");

    handle.shutdown().await;
    if let Err(e) = engine_task.await {
        warn!(error = %e, "Engine task ended abnormally");
    }
    server.abort();

    let last = handle.current_state();
    info!(round = last.round_number, phase = %last.phase, "AVIATOR shut down cleanly.");
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("aviator=info"));

    if std::env::var("AVIATOR_LOG_JSON").is_ok() {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
