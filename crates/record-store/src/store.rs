//! Store abstraction shared by every backend

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use glimpse_common::{ImageRecord, ImageStatus, Result, User};

/// Durable home of users and image records.
///
/// Implementations are handed to the server as `Arc<dyn RecordStore>`; there
/// is no global instance.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Short backend name for health output
    fn backend(&self) -> &'static str;

    /// Insert a user. Fails with `DuplicateUsername` when the name is taken;
    /// the uniqueness claim and the insert are one atomic step.
    async fn create_user(&self, username: &str, password_hash: &str) -> Result<i64>;

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>>;

    /// Insert a `pending` record.
    ///
    /// Fails with `DuplicateToken` or `DuplicateStoredName` when either
    /// unique column already exists. Nothing is written in that case.
    async fn create_image_record(
        &self,
        owner_id: i64,
        original_name: &str,
        stored_name: &str,
        access_token: &str,
    ) -> Result<i64>;

    async fn find_by_token(&self, access_token: &str) -> Result<Option<ImageRecord>>;

    /// Move the record behind `access_token` from `pending` to `viewed` and
    /// stamp `viewed_at`. Returns the stamp exactly as stored.
    ///
    /// Returns `Error::NotPending` when nothing transitioned: the token is
    /// unknown or another caller got there first.
    async fn mark_viewed(&self, access_token: &str) -> Result<DateTime<Utc>>;

    /// Bookkeeping transition after a view.
    ///
    /// Returns `Ok(false)` when the id is unknown or the move would break the
    /// forward-only lifecycle.
    async fn update_status(&self, id: i64, status: ImageStatus) -> Result<bool>;

    /// Records currently in `status`, at most `limit`. Ordered by
    /// `viewed_at` (oldest first, unviewed before viewed), then by id.
    async fn list_by_status(&self, status: ImageStatus, limit: usize) -> Result<Vec<ImageRecord>>;

    async fn health_check(&self) -> Result<()>;
}

/// Statuses a record may hold immediately before moving to `status`
pub fn predecessors(status: ImageStatus) -> Vec<ImageStatus> {
    ImageStatus::ALL
        .into_iter()
        .filter(|from| from.can_transition_to(status))
        .collect()
}
