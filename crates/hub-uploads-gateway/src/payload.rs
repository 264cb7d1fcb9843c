//! Upload payload extraction
//!
//! `POST /uploads` takes exactly one of two body shapes:
//! - `multipart/form-data` with exactly one file part
//! - a JSON document, stored as `application/json`
//!
//! Everything is validated and buffered here, before the uploader is called.

use crate::{ApiError, AppState};
use axum::{
    extract::{FromRequest, Multipart, Request, multipart::MultipartError},
    http::{StatusCode, header},
};
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use tracing::warn;

/// Content type for parts that do not declare one
pub const DEFAULT_FILE_CONTENT_TYPE: &str = "application/octet-stream";

/// Where the payload came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadSource {
    /// A multipart file part, with its client-side file name
    File { file_name: String },
    /// A JSON request body
    Json,
}

/// A validated upload payload
#[derive(Debug, Clone)]
pub struct UploadPayload {
    pub data: Bytes,
    pub content_type: String,
    pub source: PayloadSource,
}

impl FromRequest<Arc<AppState>> for UploadPayload {
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let max_size = state.config.max_file_size;

        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<mime::Mime>().ok())
            .ok_or_else(|| {
                ApiError::invalid("expected a multipart/form-data or application/json body")
            })?;

        if content_type.type_() == mime::MULTIPART && content_type.subtype() == mime::FORM_DATA {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| ApiError::invalid(e.body_text()))?;
            read_single_file(multipart, max_size).await
        } else if is_json(&content_type) {
            let body = Bytes::from_request(req, state).await.map_err(|e| {
                if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                    ApiError::too_large(max_size)
                } else {
                    ApiError::invalid(e.body_text())
                }
            })?;
            read_json(body, max_size)
        } else {
            Err(ApiError::invalid(format!(
                "unsupported content type {}, expected multipart/form-data or application/json",
                content_type.essence_str()
            )))
        }
    }
}

fn is_json(content_type: &mime::Mime) -> bool {
    content_type.type_() == mime::APPLICATION
        && (content_type.subtype() == mime::JSON || content_type.suffix() == Some(mime::JSON))
}

/// Validate a JSON body; the received bytes are stored verbatim
fn read_json(body: Bytes, max_size: u64) -> Result<UploadPayload, ApiError> {
    if body.len() as u64 > max_size {
        return Err(ApiError::too_large(max_size));
    }

    serde_json::from_slice::<serde::de::IgnoredAny>(&body)
        .map_err(|e| ApiError::invalid(format!("invalid JSON body: {}", e)))?;

    Ok(UploadPayload {
        data: body,
        content_type: mime::APPLICATION_JSON.to_string(),
        source: PayloadSource::Json,
    })
}

/// Buffer the single file part of a multipart body
///
/// Parts without a file name are plain form fields and are skipped. An empty
/// `filename=""` is what browsers send for a file input left blank, so it is
/// skipped too.
async fn read_single_file(mut multipart: Multipart, max_size: u64) -> Result<UploadPayload, ApiError> {
    let mut payload: Option<UploadPayload> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max_size))?
    {
        let Some(file_name) = field
            .file_name()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
        else {
            continue;
        };

        if payload.is_some() {
            return Err(ApiError::invalid("exactly one file may be uploaded per request"));
        }

        let content_type = field
            .content_type()
            .unwrap_or(DEFAULT_FILE_CONTENT_TYPE)
            .to_string();

        let mut data = BytesMut::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| multipart_error(e, max_size))?
        {
            // Fail fast instead of buffering an oversized file
            if (data.len() + chunk.len()) as u64 > max_size {
                warn!(
                    file_name = %file_name,
                    max_size,
                    "File size limit exceeded, rejecting upload"
                );
                return Err(ApiError::too_large(max_size));
            }
            data.extend_from_slice(&chunk);
        }

        payload = Some(UploadPayload {
            data: data.freeze(),
            content_type,
            source: PayloadSource::File { file_name },
        });
    }

    payload.ok_or_else(|| ApiError::invalid("multipart body contains no file"))
}

fn multipart_error(err: MultipartError, max_size: u64) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::too_large(max_size)
    } else {
        ApiError::invalid(format!("failed to parse multipart data: {}", err.body_text()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rstest::rstest]
    #[case("application/json", true)]
    #[case("application/json; charset=utf-8", true)]
    #[case("application/vnd.api+json", true)]
    #[case("text/json", false)]
    #[case("text/plain", false)]
    #[case("application/octet-stream", false)]
    fn test_is_json(#[case] content_type: &str, #[case] expected: bool) {
        let mime: mime::Mime = content_type.parse().unwrap();
        assert_eq!(is_json(&mime), expected);
    }

    #[test]
    fn test_read_json_keeps_bytes() {
        let body = Bytes::from_static(br#"{ "b": 1,  "a": [true, null] }"#);
        let payload = read_json(body.clone(), 1024).unwrap();

        assert_eq!(payload.data, body);
        assert_eq!(payload.content_type, "application/json");
        assert_eq!(payload.source, PayloadSource::Json);
    }

    #[test]
    fn test_read_json_rejects_garbage() {
        let err = read_json(Bytes::from_static(b"{not json"), 1024).unwrap_err();
        assert_eq!(err.error_code(), crate::ErrorCode::InvalidRequest);

        let err = read_json(Bytes::from_static(b"[1,2,3]"), 4).unwrap_err();
        assert_eq!(err.error_code(), crate::ErrorCode::PayloadTooLarge);
    }
}
