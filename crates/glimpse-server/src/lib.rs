//! Glimpse server
//!
//! Users upload images and receive links that show each image exactly once.
//! After the single view the stored file is deleted.

pub mod auth;
pub mod config;
pub mod handlers;
pub mod models;
pub mod purge;
pub mod redemption;
pub mod uploads;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use image_pipeline::ImagePipeline;
use record_store::RecordStore;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use auth::{AuthUser, SessionKeys};
pub use config::{Config, StoreBackend};
pub use purge::{Purger, Sweeper};
pub use redemption::{Delivery, Redeemer};
pub use uploads::{BatchOutcome, UploadFile, Uploader};

/// Shared application state
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub pipeline: Arc<ImagePipeline>,
    pub uploader: Uploader,
    pub redeemer: Redeemer,
    pub purger: Purger,
    pub sessions: SessionKeys,
    /// Request body cap for uploads
    pub body_limit: usize,
}

impl AppState {
    /// Wire every component around one store handle
    pub fn new(config: &Config, store: Arc<dyn RecordStore>) -> Self {
        let pipeline = Arc::new(ImagePipeline::new(config.pipeline_config()));
        let purger = Purger::new(store.clone(), pipeline.clone(), config.purge_delay);

        Self {
            uploader: Uploader::new(pipeline.clone(), store.clone(), &config.base_url),
            redeemer: Redeemer::new(store.clone(), pipeline.clone(), purger.clone()),
            sessions: SessionKeys::new(&config.jwt_secret, config.session_ttl_minutes),
            body_limit: config.body_limit(),
            purger,
            pipeline,
            store,
        }
    }

    /// Sweeper sharing this state's store and purge settings
    pub fn sweeper(&self, interval: std::time::Duration) -> Sweeper {
        Sweeper::new(self.purger.clone(), self.store.clone(), interval)
    }
}

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let body_limit = state.body_limit;
    let shared_state = Arc::new(state);

    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/api/register", post(handlers::register_handler))
        .route("/api/login", post(handlers::login_handler))
        .route("/api/logout", post(handlers::logout_handler))
        .route(
            "/api/upload",
            post(handlers::upload_handler).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route(
            "/view/{token}",
            get(handlers::preview_handler).post(handlers::consume_handler),
        )
        .with_state(shared_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
