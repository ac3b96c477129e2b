//! Configuration management for the Glimpse server
//!
//! Loads configuration from environment variables with sensible defaults.

use anyhow::{Context, Result};
use image_pipeline::pipeline::{DEFAULT_MAX_DIMENSION, DEFAULT_MAX_FILES, DEFAULT_MAX_FILE_SIZE};
use image_pipeline::PipelineConfig;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Headroom above the file payload for multipart framing and other fields
const MULTIPART_OVERHEAD: usize = 1 << 20;

const MIN_JWT_SECRET_LEN: usize = 32;

/// Which [`record_store::RecordStore`] backend to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            other => anyhow::bail!("Unknown STORE_BACKEND '{}' (expected redis or memory)", other),
        }
    }
}

/// Application configuration
#[derive(Clone)]
pub struct Config {
    /// API server host
    pub api_host: String,

    /// API server port
    pub api_port: u16,

    /// Public origin used when building share links
    pub base_url: String,

    /// Directory holding re-encoded uploads
    pub upload_path: PathBuf,

    pub store_backend: StoreBackend,

    pub redis_url: String,

    /// Per-file cap in bytes
    pub max_upload_size: usize,

    /// Files accepted per upload request
    pub max_files: usize,

    /// Largest accepted width or height
    pub max_image_dimension: u32,

    /// HMAC key for session tokens
    pub jwt_secret: String,

    pub session_ttl_minutes: i64,

    /// Wait between a view and the file deletion
    pub purge_delay: Duration,

    /// Period of the stranded-file sweeper; zero disables it
    pub sweep_interval: Duration,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_host", &self.api_host)
            .field("api_port", &self.api_port)
            .field("base_url", &self.base_url)
            .field("upload_path", &self.upload_path)
            .field("store_backend", &self.store_backend)
            .field("redis_url", &self.redis_url)
            .field("max_upload_size", &self.max_upload_size)
            .field("max_files", &self.max_files)
            .field("max_image_dimension", &self.max_image_dimension)
            .field("jwt_secret", &"<redacted>")
            .field("session_ttl_minutes", &self.session_ttl_minutes)
            .field("purge_delay", &self.purge_delay)
            .field("sweep_interval", &self.sweep_interval)
            .finish()
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}", name)),
        None => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (for local development)
        dotenvy::dotenv().ok();

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from any variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let config = Config {
            api_host: lookup("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),

            api_port: parse_or(&lookup, "API_PORT", 8080)?,

            base_url: lookup("BASE_URL")
                .unwrap_or_else(|| "http://localhost:8080".to_string())
                .trim_end_matches('/')
                .to_string(),

            upload_path: lookup("UPLOAD_PATH")
                .unwrap_or_else(|| "./uploads".to_string())
                .into(),

            store_backend: lookup("STORE_BACKEND")
                .as_deref()
                .unwrap_or("redis")
                .parse()?,

            redis_url: lookup("REDIS_URL")
                .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),

            max_upload_size: parse_or(&lookup, "MAX_UPLOAD_SIZE", DEFAULT_MAX_FILE_SIZE)?,

            max_files: parse_or(&lookup, "MAX_FILES", DEFAULT_MAX_FILES)?,

            max_image_dimension: parse_or(&lookup, "MAX_IMAGE_DIMENSION", DEFAULT_MAX_DIMENSION)?,

            jwt_secret: lookup("JWT_SECRET").unwrap_or_default(),

            session_ttl_minutes: parse_or(&lookup, "SESSION_TTL_MINUTES", 1440)?,

            purge_delay: Duration::from_secs(parse_or(&lookup, "PURGE_DELAY_SECS", 0)?),

            sweep_interval: Duration::from_secs(parse_or(&lookup, "SWEEP_INTERVAL_SECS", 300)?),
        };

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.api_port == 0 {
            anyhow::bail!("API_PORT must be greater than 0");
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            anyhow::bail!("BASE_URL must start with http:// or https://");
        }

        if self.jwt_secret.len() < MIN_JWT_SECRET_LEN {
            anyhow::bail!(
                "JWT_SECRET must be set and at least {} characters long",
                MIN_JWT_SECRET_LEN
            );
        }

        if self.max_upload_size == 0 || self.max_files == 0 || self.max_image_dimension == 0 {
            anyhow::bail!("MAX_UPLOAD_SIZE, MAX_FILES and MAX_IMAGE_DIMENSION must be positive");
        }

        if self.session_ttl_minutes <= 0 {
            anyhow::bail!("SESSION_TTL_MINUTES must be greater than 0");
        }

        Ok(())
    }

    /// Get the API server address
    pub fn api_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }

    /// Limits for the ingestion pipeline
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            upload_dir: self.upload_path.clone(),
            max_file_size: self.max_upload_size,
            max_files: self.max_files,
            max_dimension: self.max_image_dimension,
        }
    }

    /// Request body cap for the upload route
    pub fn body_limit(&self) -> usize {
        self.max_files
            .saturating_mul(self.max_upload_size)
            .saturating_add(MULTIPART_OVERHEAD)
    }

    /// Ensure the upload directory exists
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.upload_path).with_context(|| {
            format!(
                "Failed to create upload directory: {}",
                self.upload_path.display()
            )
        })
    }
}
