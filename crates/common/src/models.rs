//! Domain models shared by the pipeline, the record store and the server

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Registered account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    /// Argon2 PHC string, never the password itself
    #[serde(skip_serializing)]
    pub password_hash: String,
}

/// Lifecycle of an uploaded image.
///
/// Only `Pending` is redeemable. Transitions only move forward:
/// `Pending -> Viewed -> {Deleted | DeleteFailed | Error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    Pending,
    Viewed,
    Deleted,
    DeleteFailed,
    Error,
}

impl ImageStatus {
    pub const ALL: [ImageStatus; 5] = [
        ImageStatus::Pending,
        ImageStatus::Viewed,
        ImageStatus::Deleted,
        ImageStatus::DeleteFailed,
        ImageStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageStatus::Pending => "pending",
            ImageStatus::Viewed => "viewed",
            ImageStatus::Deleted => "deleted",
            ImageStatus::DeleteFailed => "delete_failed",
            ImageStatus::Error => "error",
        }
    }

    /// Whether moving from `self` to `next` respects the one-way lifecycle
    pub fn can_transition_to(&self, next: ImageStatus) -> bool {
        matches!(
            (self, next),
            (ImageStatus::Pending, ImageStatus::Viewed)
                | (ImageStatus::Viewed, ImageStatus::Deleted)
                | (ImageStatus::Viewed, ImageStatus::DeleteFailed)
                | (ImageStatus::Viewed, ImageStatus::Error)
        )
    }
}

impl fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown image status: {}", s))
    }
}

/// Image formats accepted for upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
}

impl ImageKind {
    /// Canonical extension used for stored files
    pub fn extension(&self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpeg",
            ImageKind::Png => "png",
            ImageKind::Gif => "gif",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Png => "image/png",
            ImageKind::Gif => "image/gif",
        }
    }

    /// Recover the kind from a stored filename's extension
    pub fn from_file_name(name: &str) -> Option<Self> {
        let (_, ext) = name.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(ImageKind::Jpeg),
            "png" => Some(ImageKind::Png),
            "gif" => Some(ImageKind::Gif),
            _ => None,
        }
    }
}

/// Content-Type for serving a stored file
pub fn content_type_for(stored_name: &str) -> &'static str {
    ImageKind::from_file_name(stored_name)
        .map(|kind| kind.mime_type())
        .unwrap_or("application/octet-stream")
}

/// One uploaded image and the state of its single-use link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: i64,

    /// Uploading user; not consulted during redemption
    pub owner_id: i64,

    /// Client-supplied filename, display only
    pub original_name: String,

    /// Server-generated filename inside the upload directory
    pub stored_name: String,

    /// Bearer credential for the one view
    pub access_token: String,

    pub created_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewed_at: Option<DateTime<Utc>>,

    pub status: ImageStatus,
}

impl ImageRecord {
    /// A freshly inserted record
    pub fn new(
        id: i64,
        owner_id: i64,
        original_name: String,
        stored_name: String,
        access_token: String,
    ) -> Self {
        Self {
            id,
            owner_id,
            original_name,
            stored_name,
            access_token,
            created_at: Utc::now(),
            viewed_at: None,
            status: ImageStatus::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ImageStatus::Pending
    }
}
