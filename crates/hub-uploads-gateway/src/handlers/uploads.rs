//! Upload handler

use crate::metrics::UploadStatus;
use crate::payload::{PayloadSource, UploadPayload};
use crate::{ApiError, AppState, ErrorBody};
use axum::{Json, extract::State};
use hub_uploads_storage::UploadResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;

/// Location of stored content
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    /// Gateway URL serving the content
    pub uri: String,
    /// Backend content identifier
    pub cid: String,
}

impl From<UploadResult> for UploadResponse {
    fn from(result: UploadResult) -> Self {
        Self {
            uri: result.uri,
            cid: result.cid,
        }
    }
}

/// POST /uploads - Store one file or JSON document
#[utoipa::path(
    post,
    path = "/uploads",
    tag = "uploads",
    summary = "Upload content",
    description = "Stores a single file sent as `multipart/form-data`, or a JSON document sent as \
`application/json`. Multipart bodies must contain exactly one file part; plain form fields are ignored. \
JSON bodies are stored byte-for-byte with content type `application/json`.",
    request_body(
        content_type = "multipart/form-data",
        description = "One file part; a JSON document sent as `application/json` is accepted too"
    ),
    responses(
        (status = 200, description = "Content stored", body = UploadResponse),
        (status = 400, description = "Missing, duplicate or malformed payload", body = ErrorBody),
        (status = 413, description = "Payload exceeds the configured size limit", body = ErrorBody),
        (status = 502, description = "The storage backend failed", body = ErrorBody)
    )
)]
pub async fn upload(
    State(state): State<Arc<AppState>>,
    payload: UploadPayload,
) -> Result<Json<UploadResponse>, ApiError> {
    let size = payload.data.len();
    let file_name = match &payload.source {
        PayloadSource::File { file_name } => Some(file_name.clone()),
        PayloadSource::Json => None,
    };

    let timer = state.metrics.start_upload();
    let outcome = state
        .uploader
        .upload(payload.data, &payload.content_type)
        .await;

    match outcome {
        Ok(result) => {
            let elapsed = timer.finish(UploadStatus::Completed);
            info!(
                backend = state.uploader.backend(),
                cid = %result.cid,
                size,
                content_type = %payload.content_type,
                file_name = ?file_name,
                duration_ms = %elapsed.as_millis(),
                "Upload completed"
            );
            Ok(Json(result.into()))
        }
        Err(e) => {
            let elapsed = timer.finish(UploadStatus::Failed);
            error!(
                backend = state.uploader.backend(),
                error = %e,
                size,
                file_name = ?file_name,
                duration_ms = %elapsed.as_millis(),
                "Upload failed"
            );
            Err(ApiError::Upload(e))
        }
    }
}
