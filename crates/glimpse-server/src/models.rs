//! Request and response bodies

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub password_confirm: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: i64,
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    /// Bearer token for `Authorization` headers
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Answer to a preview: the link is still good
#[derive(Debug, Serialize, Deserialize)]
pub struct PreviewResponse {
    pub status: String,
    /// POST here to spend the view
    pub confirm_url: String,
}
