//! Glimpse server
//!
//! REST API for one-time-view image links

use anyhow::{Context, Result};
use glimpse_server::{create_router, AppState, Config, StoreBackend};
use record_store::{MemoryStore, RecordStore, RedisStore};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "glimpse_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    config.ensure_directories()?;

    info!("Starting Glimpse server");
    info!("Upload directory: {}", config.upload_path.display());
    info!("Public base URL: {}", config.base_url);

    // Initialize storage
    let store: Arc<dyn RecordStore> = match config.store_backend {
        StoreBackend::Redis => {
            info!("Redis URL: {}", config.redis_url);
            Arc::new(
                RedisStore::new(&config.redis_url)
                    .await
                    .context("Failed to initialize storage")?,
            )
        }
        StoreBackend::Memory => {
            warn!("Using in-memory store; records are lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    // Create application state
    let state = AppState::new(&config, store);
    tokio::spawn(state.sweeper(config.sweep_interval).run());

    // Create router
    let app = create_router(state);

    // Bind and serve
    let addr = config.api_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    info!("Glimpse server running on http://{}", addr);

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}
