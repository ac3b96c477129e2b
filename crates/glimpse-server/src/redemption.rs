//! One-shot link redemption
//!
//! `preview` is read-only. `consume` wins or loses the `pending -> viewed`
//! race in the store, then reads the file and hands it to the [`Purger`].

use glimpse_common::{content_type_for, token, Error, ImageRecord, ImageStatus, Result};
use image_pipeline::ImagePipeline;
use record_store::RecordStore;
use std::io::ErrorKind;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::purge::Purger;

/// Bytes of a consumed image, ready to send
#[derive(Debug)]
pub struct Delivery {
    pub record: ImageRecord,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

#[derive(Clone)]
pub struct Redeemer {
    store: Arc<dyn RecordStore>,
    pipeline: Arc<ImagePipeline>,
    purger: Purger,
}

impl Redeemer {
    pub fn new(store: Arc<dyn RecordStore>, pipeline: Arc<ImagePipeline>, purger: Purger) -> Self {
        Self {
            store,
            pipeline,
            purger,
        }
    }

    /// Look up a token without changing anything.
    ///
    /// `NotFound` when no record carries it, `Gone` when its view is spent.
    pub async fn preview(&self, access_token: &str) -> Result<ImageRecord> {
        let redacted = token::redact(access_token);
        match self.store.find_by_token(access_token).await? {
            None => {
                info!("Unknown token {}", redacted);
                Err(Error::NotFound)
            }
            Some(record) if !record.is_pending() => {
                info!(
                    "Token {} already used (image {} is {})",
                    redacted, record.id, record.status
                );
                Err(Error::Gone)
            }
            Some(record) => Ok(record),
        }
    }

    /// Spend the token and return the image.
    ///
    /// Of any number of concurrent callers, exactly one gets the bytes; the
    /// rest see `Gone`. The file is purged after a successful transition
    /// whether or not it could be read.
    pub async fn consume(&self, access_token: &str) -> Result<Delivery> {
        let mut record = self.preview(access_token).await?;

        let viewed_at = match self.store.mark_viewed(access_token).await {
            Ok(viewed_at) => viewed_at,
            Err(Error::NotPending) => {
                info!(
                    "Lost redemption race for {} (image {})",
                    token::redact(access_token),
                    record.id
                );
                return Err(Error::Gone);
            }
            Err(e) => return Err(e),
        };
        record.status = ImageStatus::Viewed;
        record.viewed_at = Some(viewed_at);

        let path = self.pipeline.path_for(&record.stored_name);
        let read = tokio::fs::read(&path).await;

        match read {
            Ok(bytes) => {
                info!(
                    "Delivered image {} ({} bytes) for {}",
                    record.id,
                    bytes.len(),
                    token::redact(access_token)
                );
                self.purger.schedule(record.clone());
                Ok(Delivery {
                    content_type: content_type_for(&record.stored_name),
                    record,
                    bytes,
                })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                error!(
                    "Image {} is viewed but {} is missing",
                    record.id,
                    path.display()
                );
                match self.store.update_status(record.id, ImageStatus::Error).await {
                    Ok(_) => {}
                    Err(e) => warn!("Failed to mark image {} as error: {}", record.id, e),
                }
                Err(Error::MissingArtifact(record.stored_name))
            }
            Err(e) => {
                error!("Failed to read {}: {}", path.display(), e);
                self.purger.schedule(record);
                Err(Error::Io(e))
            }
        }
    }
}
