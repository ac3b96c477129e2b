//! Upload orchestration: pipeline, token minting and record insert per file

use glimpse_common::{token, Error, Result};
use image_pipeline::ImagePipeline;
use record_store::RecordStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Source of access tokens
pub type TokenMint = fn() -> Result<String>;

/// One file taken from the multipart body
#[derive(Debug, Clone)]
pub struct UploadFile {
    /// Client-supplied filename
    pub name: String,
    /// Bytes received for this file
    pub size: usize,
    /// `None` when the body was drained instead of buffered
    pub bytes: Option<Vec<u8>>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            size: bytes.len(),
            bytes: Some(bytes),
        }
    }

    /// A file whose content was counted and discarded
    pub fn drained(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
            bytes: None,
        }
    }
}

/// Per-request result: one link per stored file, one message per failure
#[derive(Debug, Default, Serialize)]
pub struct BatchOutcome {
    pub links: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Clone)]
pub struct Uploader {
    pipeline: Arc<ImagePipeline>,
    store: Arc<dyn RecordStore>,
    base_url: String,
    mint: TokenMint,
}

impl Uploader {
    pub fn new(pipeline: Arc<ImagePipeline>, store: Arc<dyn RecordStore>, base_url: &str) -> Self {
        Self {
            pipeline,
            store,
            base_url: base_url.trim_end_matches('/').to_string(),
            mint: token::access_token,
        }
    }

    /// Replace the access token source
    pub fn with_token_mint(mut self, mint: TokenMint) -> Self {
        self.mint = mint;
        self
    }

    /// Share link for an access token
    pub fn link_for(&self, access_token: &str) -> String {
        format!("{}/view/{}", self.base_url, access_token)
    }

    /// Process a batch. Whole-batch problems are returned as `Err` before any
    /// file is decoded; per-file problems land in `BatchOutcome::errors`.
    pub async fn upload_batch(&self, owner_id: i64, files: Vec<UploadFile>) -> Result<BatchOutcome> {
        self.pipeline.check_batch(files.len())?;

        let mut outcome = BatchOutcome::default();
        for file in files {
            let name = file.name.clone();
            match self.upload_one(owner_id, file).await {
                Ok(link) => outcome.links.push(link),
                Err(e) => {
                    if e.is_validation() {
                        info!("Rejected '{}' from user {}: {}", name, owner_id, e);
                    } else {
                        error!("Upload of '{}' from user {} failed: {}", name, owner_id, e);
                    }
                    outcome.errors.push(format!("{}: {}", name, e.user_message()));
                }
            }
        }

        info!(
            "User {} uploaded {} file(s), {} rejected",
            owner_id,
            outcome.links.len(),
            outcome.errors.len()
        );
        Ok(outcome)
    }

    async fn upload_one(&self, owner_id: i64, file: UploadFile) -> Result<String> {
        self.pipeline.check_size(file.size)?;
        let Some(bytes) = file.bytes else {
            // Only oversized files are drained, and check_size caught those
            return Err(Error::FileTooLarge {
                size: file.size,
                max: self.pipeline.config().max_file_size,
            });
        };

        let pipeline = self.pipeline.clone();
        let name = file.name.clone();
        let stored = tokio::task::spawn_blocking(move || pipeline.ingest(&bytes, &name))
            .await
            .map_err(|e| Error::Other(e.into()))??;

        let access_token = match (self.mint)() {
            Ok(t) => t,
            Err(e) => {
                self.discard(&stored.stored_name).await;
                return Err(e);
            }
        };

        if let Err(e) = self
            .store
            .create_image_record(owner_id, &file.name, &stored.stored_name, &access_token)
            .await
        {
            self.discard(&stored.stored_name).await;
            return Err(e);
        }

        Ok(self.link_for(&access_token))
    }

    async fn discard(&self, stored_name: &str) {
        if let Err(e) = crate::purge::remove_stored(&self.pipeline, stored_name).await {
            warn!("Failed to clean up {}: {}", stored_name, e);
        }
    }
}
