//! API request handlers

use axum::{
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use glimpse_common::{token, Error};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::auth::{self, AuthUser};
use crate::models::{LoginRequest, LoginResponse, PreviewResponse, RegisterRequest, RegisterResponse};
use crate::uploads::{BatchOutcome, UploadFile};
use crate::AppState;

/// Multipart field carrying image files
pub const UPLOAD_FIELD: &str = "imagefiles";

const NO_CACHE: &str = "no-store, no-cache, must-revalidate, proxy-revalidate, max-age=0";

/// API Error type
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(context: &str, err: impl std::fmt::Display) -> Self {
        error!("{}: {}", context, err);
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "Internal server error".to_string(),
        }
    }

    fn bad_credentials() -> Self {
        ApiError {
            status: StatusCode::UNAUTHORIZED,
            message: "Invalid username or password".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message
        });

        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        if let Error::DuplicateUsername(_) = err {
            return ApiError {
                status: StatusCode::CONFLICT,
                message: "Username already taken".to_string(),
            };
        }

        let status = if err.is_validation() {
            StatusCode::BAD_REQUEST
        } else if err.is_terminal_link() {
            StatusCode::GONE
        } else {
            error!("Request failed: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR
        };

        ApiError {
            status,
            message: err.user_message(),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        debug!("Malformed upload body: {}", err);
        ApiError {
            status: err.status(),
            message: err.body_text(),
        }
    }
}

/// Health check endpoint
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    let store = state.store.backend();
    match state.store.health_check().await {
        Ok(()) => Json(serde_json::json!({
            "status": "healthy",
            "service": "glimpse-server",
            "store": store
        }))
        .into_response(),
        Err(e) => {
            error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "unhealthy",
                    "service": "glimpse-server",
                    "store": store
                })),
            )
                .into_response()
        }
    }
}

/// Create an account
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let username = auth::validate_registration(
        &payload.username,
        &payload.password,
        &payload.password_confirm,
    )
    .map_err(ApiError::bad_request)?
    .to_string();

    let password = payload.password;
    let hash = tokio::task::spawn_blocking(move || auth::hash_password(&password))
        .await
        .map_err(|e| ApiError::internal("Hashing task failed", e))?
        .map_err(|e| ApiError::internal("Password hashing failed", e))?;

    let user_id = state.store.create_user(&username, &hash).await?;
    info!("Registered user {} ({})", user_id, username);

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse { user_id, username }),
    ))
}

/// Exchange credentials for a session token
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let username = payload.username.trim();
    let Some(user) = state.store.find_user_by_username(username).await? else {
        info!("Login for unknown user '{}'", username);
        return Err(ApiError::bad_credentials());
    };

    let hash = user.password_hash.clone();
    let password = payload.password;
    let valid = tokio::task::spawn_blocking(move || auth::verify_password(&password, &hash))
        .await
        .map_err(|e| ApiError::internal("Verification task failed", e))?;
    if !valid {
        info!("Wrong password for user {}", user.id);
        return Err(ApiError::bad_credentials());
    }

    let (token, expires_at) = state
        .sessions
        .issue(user.id, &user.username)
        .map_err(|e| ApiError::internal("Failed to issue session token", e))?;

    info!("User {} logged in", user.id);
    Ok(Json(LoginResponse { token, expires_at }))
}

/// Sessions are stateless; the client drops its token
pub async fn logout_handler() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Read every `imagefiles` part. Parts beyond the per-file cap or the file
/// count are counted and discarded instead of buffered. A part without a
/// filename is a form value, not a file; an untouched file input sends one.
async fn read_files(
    multipart: &mut Multipart,
    max_file_size: usize,
    max_files: usize,
) -> Result<Vec<UploadFile>, MultipartError> {
    let mut files = Vec::new();

    while let Some(mut field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let name = match field.file_name() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => continue,
        };
        let keep = files.len() < max_files;

        let mut buf = Vec::new();
        let mut size = 0usize;
        while let Some(chunk) = field.chunk().await? {
            size += chunk.len();
            if keep && size <= max_file_size {
                buf.extend_from_slice(&chunk);
            } else if !buf.is_empty() {
                buf = Vec::new();
            }
        }

        if keep && size <= max_file_size {
            files.push(UploadFile::new(name, buf));
        } else {
            files.push(UploadFile::drained(name, size));
        }
    }

    Ok(files)
}

/// Upload a batch of images and get one link per stored image
pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let limits = state.pipeline.config();
    let files = read_files(&mut multipart, limits.max_file_size, limits.max_files).await?;
    debug!("User {} sent {} file(s)", user.id, files.len());

    match state.uploader.upload_batch(user.id, files).await {
        Ok(outcome) => Ok(Json(outcome).into_response()),
        Err(e) if e.is_validation() => {
            info!("Rejected batch from user {}: {}", user.id, e);
            let outcome = BatchOutcome {
                links: Vec::new(),
                errors: vec![e.user_message()],
            };
            Ok((StatusCode::BAD_REQUEST, Json(outcome)).into_response())
        }
        Err(e) => Err(e.into()),
    }
}

/// Check a link without spending it
pub async fn preview_handler(
    State(state): State<Arc<AppState>>,
    Path(access_token): Path<String>,
) -> Result<Json<PreviewResponse>, ApiError> {
    if !token::looks_like_token(&access_token) {
        debug!("Malformed token in preview path");
        return Err(Error::NotFound.into());
    }

    state.redeemer.preview(&access_token).await?;

    Ok(Json(PreviewResponse {
        status: "pending".to_string(),
        confirm_url: state.uploader.link_for(&access_token),
    }))
}

/// Spend a link and receive the image
pub async fn consume_handler(
    State(state): State<Arc<AppState>>,
    Path(access_token): Path<String>,
) -> Result<Response, ApiError> {
    if !token::looks_like_token(&access_token) {
        debug!("Malformed token in consume path");
        return Err(Error::NotFound.into());
    }

    let delivery = state.redeemer.consume(&access_token).await?;

    let headers = [
        (header::CONTENT_TYPE, delivery.content_type),
        (header::CACHE_CONTROL, NO_CACHE),
        (header::PRAGMA, "no-cache"),
        (header::EXPIRES, "0"),
        (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
    ];
    Ok((headers, delivery.bytes).into_response())
}
