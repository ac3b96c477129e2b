//! Behaviour every backend must share

use glimpse_common::{Error, ImageStatus};
use record_store::RecordStore;
use std::sync::Arc;

/// Unique suffix so repeated runs against a shared server do not collide
pub fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4().simple())
}

pub async fn full_lifecycle(store: &dyn RecordStore) {
    let owner = store.create_user(&unique("owner"), "$argon2id$fake").await.unwrap();
    let token = unique("tok");
    let stored = format!("{}.png", unique("stored"));

    let id = store
        .create_image_record(owner, "holiday.png", &stored, &token)
        .await
        .unwrap();

    let record = store.find_by_token(&token).await.unwrap().unwrap();
    assert_eq!(record.id, id);
    assert_eq!(record.owner_id, owner);
    assert_eq!(record.stored_name, stored);
    assert_eq!(record.status, ImageStatus::Pending);
    assert!(record.viewed_at.is_none());

    // Bookkeeping cannot skip the view
    assert!(!store.update_status(id, ImageStatus::Deleted).await.unwrap());

    let stamped = store.mark_viewed(&token).await.unwrap();
    assert!(matches!(store.mark_viewed(&token).await, Err(Error::NotPending)));

    let viewed = store.find_by_token(&token).await.unwrap().unwrap();
    assert_eq!(viewed.status, ImageStatus::Viewed);
    // The returned stamp is the stored one, not a second clock reading
    assert_eq!(viewed.viewed_at, Some(stamped));

    let listed = store.list_by_status(ImageStatus::Viewed, usize::MAX).await.unwrap();
    assert!(listed.iter().any(|r| r.id == id));

    assert!(store.update_status(id, ImageStatus::Deleted).await.unwrap());
    // Terminal states stay terminal
    assert!(!store.update_status(id, ImageStatus::DeleteFailed).await.unwrap());
    assert!(!store.update_status(id, ImageStatus::Pending).await.unwrap());

    let done = store.find_by_token(&token).await.unwrap().unwrap();
    assert_eq!(done.status, ImageStatus::Deleted);
    assert_eq!(done.viewed_at, viewed.viewed_at);

    let pending = store.list_by_status(ImageStatus::Pending, usize::MAX).await.unwrap();
    assert!(pending.iter().all(|r| r.id != id));
}

pub async fn duplicate_columns(store: &dyn RecordStore) {
    let name = unique("bob");
    store.create_user(&name, "h1").await.unwrap();
    assert!(matches!(
        store.create_user(&name, "h2").await,
        Err(Error::DuplicateUsername(_))
    ));
    let user = store.find_user_by_username(&name).await.unwrap().unwrap();
    assert_eq!(user.password_hash, "h1");
    assert!(store
        .find_user_by_username(&unique("nobody"))
        .await
        .unwrap()
        .is_none());

    let token = unique("tok");
    let stored = unique("stored");
    store.create_image_record(1, "a", &stored, &token).await.unwrap();
    assert!(matches!(
        store.create_image_record(1, "b", &unique("other"), &token).await,
        Err(Error::DuplicateToken)
    ));
    assert!(matches!(
        store.create_image_record(1, "c", &stored, &unique("tok")).await,
        Err(Error::DuplicateStoredName)
    ));
}

/// `k` tasks race to consume one token; exactly one may win
pub async fn concurrent_mark_viewed(store: Arc<dyn RecordStore>, k: usize) {
    let token = unique("race");
    store
        .create_image_record(1, "race.png", &unique("race"), &token)
        .await
        .unwrap();

    let barrier = Arc::new(tokio::sync::Barrier::new(k));
    let mut handles = Vec::with_capacity(k);
    for _ in 0..k {
        let store = store.clone();
        let token = token.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            store.mark_viewed(&token).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(Error::NotPending) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(winners, 1);
}

/// Viewed records come back oldest view first, whatever their ids
pub async fn viewed_oldest_first(store: &dyn RecordStore) {
    let tokens: Vec<String> = (0..3).map(|_| unique("order")).collect();
    let mut ids = Vec::new();
    for token in &tokens {
        let id = store
            .create_image_record(1, "o.png", &unique("order"), token)
            .await
            .unwrap();
        ids.push(id);
    }

    // View the newest upload first
    for i in [2, 0, 1] {
        store.mark_viewed(&tokens[i]).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let listed: Vec<i64> = store
        .list_by_status(ImageStatus::Viewed, usize::MAX)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .filter(|id| ids.contains(id))
        .collect();
    assert_eq!(listed, vec![ids[2], ids[0], ids[1]]);
}
