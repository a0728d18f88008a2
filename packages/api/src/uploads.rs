//! # Presigned uploads
//!
//! Browsers upload avatars, post images and resumes straight to S3-compatible
//! storage. The API validates the request and hands back a presigned `PUT` URL
//! for a fresh object key `uploads/<user_id>/<uuid>.<ext>`.

use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::Method;
use axum::routing::post;
use axum::{Json, Router};
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::signer::Signer;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::error::{ApiError, ApiResult};
use crate::settings::Storage;
use crate::state::AppState;

/// Accepted content types and the extension given to their keys.
pub const ALLOWED_CONTENT_TYPES: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/webp", "webp"),
    ("application/pdf", "pdf"),
];

#[async_trait]
pub trait UploadSigner: Send + Sync {
    /// Presigned URL allowing one `PUT` of `key` until `expires_in` elapses.
    async fn presign_put(&self, key: &str, expires_in: Duration) -> ApiResult<String>;
}

/// Signs URLs against an S3-compatible bucket.
pub struct S3Signer {
    store: AmazonS3,
}

impl S3Signer {
    pub fn new(settings: &Storage) -> ApiResult<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&settings.bucket)
            .with_region(&settings.region)
            .with_access_key_id(&settings.access_key_id)
            .with_secret_access_key(&settings.secret_access_key);
        if !settings.endpoint.is_empty() {
            builder = builder
                .with_endpoint(&settings.endpoint)
                .with_allow_http(settings.endpoint.starts_with("http://"));
        }
        let store = builder
            .build()
            .map_err(|e| ApiError::Internal(format!("Invalid storage configuration: {e}")))?;
        Ok(Self { store })
    }
}

#[async_trait]
impl UploadSigner for S3Signer {
    async fn presign_put(&self, key: &str, expires_in: Duration) -> ApiResult<String> {
        let url = self
            .store
            .signed_url(Method::PUT, &Path::from(key), expires_in)
            .await
            .map_err(|e| ApiError::Upstream(format!("Failed to sign upload URL: {e}")))?;
        Ok(url.to_string())
    }
}

/// Installed when no bucket is configured.
pub struct DisabledUploads;

#[async_trait]
impl UploadSigner for DisabledUploads {
    async fn presign_put(&self, _key: &str, _expires_in: Duration) -> ApiResult<String> {
        Err(ApiError::NotFound("Uploads are not enabled".into()))
    }
}

#[derive(Debug, Deserialize)]
pub struct PresignRequest {
    pub filename: String,
    pub content_type: String,
    pub size: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PresignedUpload {
    pub upload_url: String,
    pub key: String,
    pub public_url: String,
    pub content_type: String,
    pub expires_in: u64,
}

pub fn extension_for(content_type: &str) -> Option<&'static str> {
    let content_type = content_type.trim().to_ascii_lowercase();
    ALLOWED_CONTENT_TYPES
        .iter()
        .find(|(allowed, _)| *allowed == content_type)
        .map(|(_, ext)| *ext)
}

pub fn object_key(user_id: Uuid, ext: &str) -> String {
    format!("uploads/{user_id}/{}.{ext}", Uuid::new_v4())
}

pub async fn presign_upload(state: &AppState, user_id: Uuid, request: PresignRequest) -> ApiResult<PresignedUpload> {
    if request.filename.trim().is_empty() {
        return Err(ApiError::bad_request("Filename is required"));
    }
    let ext = extension_for(&request.content_type)
        .ok_or_else(|| ApiError::bad_request(format!("Unsupported file type: {}", request.content_type)))?;

    let storage = &state.settings.storage;
    if request.size == 0 || request.size > storage.max_upload_bytes {
        return Err(ApiError::bad_request(format!(
            "File size must be between 1 and {} bytes",
            storage.max_upload_bytes
        )));
    }

    let key = object_key(user_id, ext);
    let expires_in = storage.presign_expiry_secs;
    let upload_url = state
        .uploads
        .presign_put(&key, Duration::from_secs(expires_in))
        .await?;

    tracing::info!(user_id = %user_id, key = %key, size = request.size, "presigned upload");
    Ok(PresignedUpload {
        upload_url,
        public_url: storage.public_url(&key),
        key,
        content_type: request.content_type.trim().to_ascii_lowercase(),
        expires_in,
    })
}

async fn presign(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<PresignRequest>,
) -> ApiResult<Json<PresignedUpload>> {
    presign_upload(&state, user.id, request).await.map(Json)
}

pub fn router() -> Router<AppState> {
    Router::new().route("/uploads/presign", post(presign))
}
