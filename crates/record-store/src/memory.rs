//! In-process store for tests and local development

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use glimpse_common::{Error, ImageRecord, ImageStatus, Result, User};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

use crate::store::RecordStore;

#[derive(Default)]
struct Tables {
    users: HashMap<i64, User>,
    user_ids_by_name: HashMap<String, i64>,
    images: BTreeMap<i64, ImageRecord>,
    image_ids_by_token: HashMap<String, i64>,
    image_ids_by_stored_name: HashMap<String, i64>,
    next_user_id: i64,
    next_image_id: i64,
}

/// Maps behind one `RwLock`. Every conditional update runs under the write
/// lock, which makes it atomic with respect to other callers.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn create_user(&self, username: &str, password_hash: &str) -> Result<i64> {
        let mut tables = self.tables.write().await;
        if tables.user_ids_by_name.contains_key(username) {
            return Err(Error::DuplicateUsername(username.to_string()));
        }

        tables.next_user_id += 1;
        let id = tables.next_user_id;
        tables.user_ids_by_name.insert(username.to_string(), id);
        tables.users.insert(
            id,
            User {
                id,
                username: username.to_string(),
                password_hash: password_hash.to_string(),
            },
        );
        Ok(id)
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables
            .user_ids_by_name
            .get(username)
            .and_then(|id| tables.users.get(id))
            .cloned())
    }

    async fn create_image_record(
        &self,
        owner_id: i64,
        original_name: &str,
        stored_name: &str,
        access_token: &str,
    ) -> Result<i64> {
        let mut tables = self.tables.write().await;
        if tables.image_ids_by_token.contains_key(access_token) {
            return Err(Error::DuplicateToken);
        }
        if tables.image_ids_by_stored_name.contains_key(stored_name) {
            return Err(Error::DuplicateStoredName);
        }

        tables.next_image_id += 1;
        let id = tables.next_image_id;
        tables
            .image_ids_by_token
            .insert(access_token.to_string(), id);
        tables
            .image_ids_by_stored_name
            .insert(stored_name.to_string(), id);
        tables.images.insert(
            id,
            ImageRecord::new(
                id,
                owner_id,
                original_name.to_string(),
                stored_name.to_string(),
                access_token.to_string(),
            ),
        );
        Ok(id)
    }

    async fn find_by_token(&self, access_token: &str) -> Result<Option<ImageRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .image_ids_by_token
            .get(access_token)
            .and_then(|id| tables.images.get(id))
            .cloned())
    }

    async fn mark_viewed(&self, access_token: &str) -> Result<DateTime<Utc>> {
        let mut tables = self.tables.write().await;
        let id = match tables.image_ids_by_token.get(access_token) {
            Some(id) => *id,
            None => return Err(Error::NotPending),
        };

        match tables.images.get_mut(&id) {
            Some(record) if record.status == ImageStatus::Pending => {
                let now = Utc::now();
                record.status = ImageStatus::Viewed;
                record.viewed_at = Some(now);
                Ok(now)
            }
            _ => Err(Error::NotPending),
        }
    }

    async fn update_status(&self, id: i64, status: ImageStatus) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let Some(record) = tables.images.get_mut(&id) else {
            return Ok(false);
        };

        if !record.status.can_transition_to(status) {
            debug!(
                "Rejected status change for image {}: {} -> {}",
                id, record.status, status
            );
            return Ok(false);
        }

        if status == ImageStatus::Viewed {
            record.viewed_at = Some(Utc::now());
        }
        record.status = status;
        Ok(true)
    }

    async fn list_by_status(&self, status: ImageStatus, limit: usize) -> Result<Vec<ImageRecord>> {
        let tables = self.tables.read().await;
        let mut records: Vec<ImageRecord> = tables
            .images
            .values()
            .filter(|record| record.status == status)
            .cloned()
            .collect();
        records.sort_by_key(|record| (record.viewed_at, record.id));
        records.truncate(limit);
        Ok(records)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_username() {
        let store = MemoryStore::new();
        let id = store.create_user("alice", "hash").await.unwrap();
        assert_eq!(id, 1);

        let err = store.create_user("alice", "other").await.unwrap_err();
        assert!(matches!(err, Error::DuplicateUsername(ref name) if name == "alice"));

        let user = store.find_user_by_username("alice").await.unwrap().unwrap();
        assert_eq!(user.password_hash, "hash");
    }

    #[tokio::test]
    async fn test_unique_columns() {
        let store = MemoryStore::new();
        store
            .create_image_record(1, "a.png", "s1.png", "tok1")
            .await
            .unwrap();

        let err = store
            .create_image_record(1, "b.png", "s2.png", "tok1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateToken));

        let err = store
            .create_image_record(1, "b.png", "s1.png", "tok2")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateStoredName));

        // Failed inserts leave no trace
        assert!(store.find_by_token("tok2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_viewed_only_once() {
        let store = MemoryStore::new();
        store
            .create_image_record(7, "a.gif", "s.gif", "tok")
            .await
            .unwrap();

        let stamped = store.mark_viewed("tok").await.unwrap();
        assert!(matches!(
            store.mark_viewed("tok").await,
            Err(Error::NotPending)
        ));
        assert!(matches!(
            store.mark_viewed("missing").await,
            Err(Error::NotPending)
        ));

        let record = store.find_by_token("tok").await.unwrap().unwrap();
        assert_eq!(record.status, ImageStatus::Viewed);
        assert_eq!(record.viewed_at, Some(stamped));
    }
}
