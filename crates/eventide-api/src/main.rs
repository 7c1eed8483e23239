//! Eventide API server entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use eventide_api::error::AppError;
use eventide_api::executor::HttpCommandExecutor;
use eventide_api::state::AppState;
use eventide_engine::{EngineConfig, EventStore};
use eventide_event_store::PgEventRepository;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Initialize tracing subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting Eventide API server");

    // Read configuration from environment.
    let config = EngineConfig::from_env()?;
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".to_string())
        .parse()
        .map_err(|e| AppError::Config(format!("PORT must be a valid u16: {e}")))?;
    tracing::info!(
        snapshot_frequency = config.snapshot_frequency,
        consistency_level = ?config.consistency_level,
        enable_compression = config.enable_compression,
        enable_encryption = config.enable_encryption,
        replication_factor = config.replication_factor,
        "engine configuration loaded"
    );

    let mut builder = EventStore::builder(config.clone());

    // Durable storage is optional; without it the engine runs in memory.
    let durable = match std::env::var("DATABASE_URL") {
        Ok(database_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&database_url)
                .await?;
            let repository = PgEventRepository::new(pool);
            repository.ensure_schema().await?;
            builder = builder.with_repository(Arc::new(repository));
            true
        }
        Err(_) => {
            tracing::warn!("DATABASE_URL not set; events are kept in memory only");
            false
        }
    };

    if let Ok(endpoint) = std::env::var("COMMAND_ENDPOINT") {
        tracing::info!(%endpoint, "dispatching saga commands over http");
        let executor = HttpCommandExecutor::new(endpoint, config.default_step_timeout)?;
        builder = builder.with_executor(Arc::new(executor));
    }

    // Build, restore and start the engine.
    let store = builder.build()?;
    if durable {
        let restored = store.hydrate().await?;
        tracing::info!(restored, "history restored from durable storage");
    }
    store.start();

    let app = eventide_api::build_router(AppState::new(Arc::clone(&store)));

    // Start server.
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| AppError::Config(format!("invalid HOST:PORT combination: {e}")))?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    store.shutdown().await;
    tracing::info!("Eventide API server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
