//! Removal of viewed files
//!
//! [`Purger::schedule`] runs right after a successful view. The [`Sweeper`]
//! catches files the detached task never got to, e.g. after a restart.

use chrono::Utc;
use glimpse_common::{token, Error, ImageRecord, ImageStatus};
use image_pipeline::ImagePipeline;
use record_store::RecordStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Extra age a viewed record must reach before the sweeper claims it
pub const SWEEP_GRACE: Duration = Duration::from_secs(60);

/// Records examined per sweep
pub const SWEEP_BATCH: usize = 256;

/// Unlink a stored file on the blocking pool
pub(crate) async fn remove_stored(
    pipeline: &Arc<ImagePipeline>,
    stored_name: &str,
) -> glimpse_common::Result<()> {
    let pipeline = pipeline.clone();
    let name = stored_name.to_string();
    tokio::task::spawn_blocking(move || pipeline.remove(&name))
        .await
        .map_err(|e| Error::DeleteFailed(format!("{}: {}", stored_name, e)))?
}

/// Deletes the file behind a viewed record and records the outcome
#[derive(Clone)]
pub struct Purger {
    store: Arc<dyn RecordStore>,
    pipeline: Arc<ImagePipeline>,
    delay: Duration,
}

impl Purger {
    pub fn new(store: Arc<dyn RecordStore>, pipeline: Arc<ImagePipeline>, delay: Duration) -> Self {
        Self {
            store,
            pipeline,
            delay,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Purge in a detached task. The caller never waits on it; the handle is
    /// returned for tests.
    pub fn schedule(&self, record: ImageRecord) -> JoinHandle<ImageStatus> {
        let purger = self.clone();
        tokio::spawn(async move {
            if !purger.delay.is_zero() {
                tokio::time::sleep(purger.delay).await;
            }
            purger.purge(&record).await
        })
    }

    /// Remove the file now and record `deleted` or `delete_failed`.
    ///
    /// A file that is already gone counts as deleted. Store failures are
    /// logged and otherwise ignored.
    pub async fn purge(&self, record: &ImageRecord) -> ImageStatus {
        let outcome = match remove_stored(&self.pipeline, &record.stored_name).await {
            Ok(()) => ImageStatus::Deleted,
            Err(e) => {
                warn!("Failed to delete file for image {}: {}", record.id, e);
                ImageStatus::DeleteFailed
            }
        };

        match self.store.update_status(record.id, outcome).await {
            Ok(true) => info!(
                "Image {} ({}) -> {}",
                record.id,
                token::redact(&record.access_token),
                outcome
            ),
            Ok(false) => debug!("Image {} already past viewed, left as is", record.id),
            Err(e) => error!("Failed to record {} for image {}: {}", outcome, record.id, e),
        }

        outcome
    }
}

/// Periodic pass over `viewed` records whose deletion never completed
pub struct Sweeper {
    purger: Purger,
    store: Arc<dyn RecordStore>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(purger: Purger, store: Arc<dyn RecordStore>, interval: Duration) -> Self {
        Self {
            purger,
            store,
            interval,
        }
    }

    /// Start the sweeper loop. Returns immediately when the interval is zero.
    pub async fn run(self) {
        if self.interval.is_zero() {
            info!("Sweeper disabled");
            return;
        }

        info!("Sweeper started, interval {:?}", self.interval);
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            ticker.tick().await;

            match self.sweep_once().await {
                Ok(0) => {}
                Ok(count) => info!("Sweeper purged {} stranded file(s)", count),
                Err(e) => error!("Sweep failed: {}", e),
            }
        }
    }

    /// One pass. Only `viewed` records older than the purge delay plus
    /// [`SWEEP_GRACE`] are touched, so pending links are never affected.
    pub async fn sweep_once(&self) -> glimpse_common::Result<usize> {
        let min_age = self.purger.delay() + SWEEP_GRACE;
        let Some(cutoff) = chrono::Duration::from_std(min_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Ok(0);
        };

        let candidates = self
            .store
            .list_by_status(ImageStatus::Viewed, SWEEP_BATCH)
            .await?;

        // Oldest views come first; everything after a fresh one is fresher
        let mut purged = 0;
        for record in candidates {
            let stale = record.viewed_at.is_some_and(|at| at <= cutoff);
            if !stale {
                break;
            }
            if self.purger.purge(&record).await == ImageStatus::Deleted {
                purged += 1;
            }
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image_pipeline::PipelineConfig;
    use record_store::MemoryStore;

    async fn setup() -> (tempfile::TempDir, Arc<dyn RecordStore>, Arc<ImagePipeline>) {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
        let pipeline = Arc::new(ImagePipeline::new(PipelineConfig::new(dir.path())));
        (dir, store, pipeline)
    }

    async fn viewed_record(
        store: &Arc<dyn RecordStore>,
        pipeline: &ImagePipeline,
        name: &str,
    ) -> ImageRecord {
        std::fs::write(pipeline.path_for(name), b"pixels").unwrap();
        let token = format!("tok-{}", name);
        store.create_image_record(1, name, name, &token).await.unwrap();
        store.mark_viewed(&token).await.unwrap();
        store.find_by_token(&token).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_schedule_deletes_and_records() {
        let (_dir, store, pipeline) = setup().await;
        let purger = Purger::new(store.clone(), pipeline.clone(), Duration::ZERO);

        let record = viewed_record(&store, &pipeline, "a.png").await;
        let outcome = purger.schedule(record.clone()).await.unwrap();

        assert_eq!(outcome, ImageStatus::Deleted);
        assert!(!pipeline.path_for("a.png").exists());
        let stored = store.find_by_token(&record.access_token).await.unwrap().unwrap();
        assert_eq!(stored.status, ImageStatus::Deleted);
    }

    #[tokio::test]
    async fn test_missing_file_counts_as_deleted() {
        let (_dir, store, pipeline) = setup().await;
        let purger = Purger::new(store.clone(), pipeline.clone(), Duration::ZERO);

        let record = viewed_record(&store, &pipeline, "b.png").await;
        std::fs::remove_file(pipeline.path_for("b.png")).unwrap();

        assert_eq!(purger.purge(&record).await, ImageStatus::Deleted);
    }

    #[tokio::test]
    async fn test_unremovable_file_is_delete_failed() {
        let (_dir, store, pipeline) = setup().await;
        let purger = Purger::new(store.clone(), pipeline.clone(), Duration::ZERO);

        let record = viewed_record(&store, &pipeline, "c.png").await;
        // A non-empty directory under the stored name cannot be unlinked
        std::fs::remove_file(pipeline.path_for("c.png")).unwrap();
        std::fs::create_dir(pipeline.path_for("c.png")).unwrap();
        std::fs::write(pipeline.path_for("c.png").join("inner"), b"x").unwrap();

        assert_eq!(purger.purge(&record).await, ImageStatus::DeleteFailed);
        let stored = store.find_by_token(&record.access_token).await.unwrap().unwrap();
        assert_eq!(stored.status, ImageStatus::DeleteFailed);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_concurrent_purges_complete() {
        let (_dir, store, pipeline) = setup().await;
        let purger = Purger::new(store.clone(), pipeline.clone(), Duration::ZERO);

        let mut handles = Vec::new();
        for i in 0..8 {
            let record = viewed_record(&store, &pipeline, &format!("batch-{}.png", i)).await;
            handles.push(purger.schedule(record));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), ImageStatus::Deleted);
        }
        for i in 0..8 {
            assert!(!pipeline.path_for(&format!("batch-{}.png", i)).exists());
        }
        assert!(store
            .list_by_status(ImageStatus::Viewed, 16)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_is_honoured() {
        let (_dir, store, pipeline) = setup().await;
        let purger = Purger::new(store.clone(), pipeline.clone(), Duration::from_secs(30));

        let record = viewed_record(&store, &pipeline, "d.png").await;
        let handle = purger.schedule(record);

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(pipeline.path_for("d.png").exists());

        assert_eq!(handle.await.unwrap(), ImageStatus::Deleted);
        assert!(!pipeline.path_for("d.png").exists());
    }

    #[tokio::test]
    async fn test_sweeper_skips_recent_and_pending() {
        let (_dir, store, pipeline) = setup().await;
        let purger = Purger::new(store.clone(), pipeline.clone(), Duration::ZERO);
        let sweeper = Sweeper::new(purger, store.clone(), Duration::from_secs(1));

        // Viewed just now: inside the grace window
        viewed_record(&store, &pipeline, "recent.png").await;
        // Pending: never swept
        std::fs::write(pipeline.path_for("pending.png"), b"pixels").unwrap();
        store
            .create_image_record(1, "pending.png", "pending.png", "tok-pending")
            .await
            .unwrap();

        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
        assert!(pipeline.path_for("recent.png").exists());
        assert!(pipeline.path_for("pending.png").exists());
    }

    /// Reports every viewed record as viewed an hour ago
    struct AgedStore(MemoryStore);

    #[async_trait::async_trait]
    impl RecordStore for AgedStore {
        fn backend(&self) -> &'static str {
            "aged"
        }
        async fn create_user(&self, u: &str, p: &str) -> glimpse_common::Result<i64> {
            self.0.create_user(u, p).await
        }
        async fn find_user_by_username(
            &self,
            u: &str,
        ) -> glimpse_common::Result<Option<glimpse_common::User>> {
            self.0.find_user_by_username(u).await
        }
        async fn create_image_record(
            &self,
            owner: i64,
            original: &str,
            stored: &str,
            token: &str,
        ) -> glimpse_common::Result<i64> {
            self.0.create_image_record(owner, original, stored, token).await
        }
        async fn find_by_token(&self, t: &str) -> glimpse_common::Result<Option<ImageRecord>> {
            self.0.find_by_token(t).await
        }
        async fn mark_viewed(
            &self,
            t: &str,
        ) -> glimpse_common::Result<chrono::DateTime<Utc>> {
            self.0.mark_viewed(t).await
        }
        async fn update_status(&self, id: i64, s: ImageStatus) -> glimpse_common::Result<bool> {
            self.0.update_status(id, s).await
        }
        async fn list_by_status(
            &self,
            s: ImageStatus,
            limit: usize,
        ) -> glimpse_common::Result<Vec<ImageRecord>> {
            let mut records = self.0.list_by_status(s, limit).await?;
            for record in &mut records {
                record.viewed_at = record.viewed_at.map(|at| at - chrono::Duration::hours(1));
            }
            Ok(records)
        }
        async fn health_check(&self) -> glimpse_common::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_sweeper_recovers_stranded_files() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn RecordStore> = Arc::new(AgedStore(MemoryStore::new()));
        let pipeline = Arc::new(ImagePipeline::new(PipelineConfig::new(dir.path())));
        let purger = Purger::new(store.clone(), pipeline.clone(), Duration::ZERO);
        let sweeper = Sweeper::new(purger, store.clone(), Duration::from_secs(1));

        let stranded = viewed_record(&store, &pipeline, "stranded.png").await;
        std::fs::write(pipeline.path_for("waiting.png"), b"pixels").unwrap();
        store
            .create_image_record(1, "waiting.png", "waiting.png", "tok-waiting")
            .await
            .unwrap();

        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
        assert!(!pipeline.path_for("stranded.png").exists());
        assert!(pipeline.path_for("waiting.png").exists());

        let record = store
            .find_by_token(&stranded.access_token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, ImageStatus::Deleted);

        // Nothing left to do on the next pass
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
    }
}
