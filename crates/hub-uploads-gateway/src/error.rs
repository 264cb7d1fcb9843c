//! Error types and API error codes

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use hub_uploads_storage::StorageError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// API error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidRequest,
    PayloadTooLarge,
    UploadFailed,
    FundFailed,
    FundingUnsupported,
    MetricsUnavailable,
    InternalError,
}

impl ErrorCode {
    /// Get the error code string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "InvalidRequest",
            Self::PayloadTooLarge => "PayloadTooLarge",
            Self::UploadFailed => "UploadFailed",
            Self::FundFailed => "FundFailed",
            Self::FundingUnsupported => "FundingUnsupported",
            Self::MetricsUnavailable => "MetricsUnavailable",
            Self::InternalError => "InternalError",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UploadFailed | Self::FundFailed | Self::MetricsUnavailable => {
                StatusCode::BAD_GATEWAY
            }
            Self::FundingUnsupported => StatusCode::NOT_IMPLEMENTED,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{message}")]
    Request { code: ErrorCode, message: String },

    #[error("upload failed: {0}")]
    Upload(#[source] StorageError),

    #[error("funding failed: {0}")]
    Fund(#[source] StorageError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Client-side validation failure
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Request {
            code: ErrorCode::InvalidRequest,
            message: message.into(),
        }
    }

    /// Upload larger than the configured ceiling
    pub fn too_large(limit: u64) -> Self {
        Self::Request {
            code: ErrorCode::PayloadTooLarge,
            message: format!("upload exceeds the maximum size of {} bytes", limit),
        }
    }

    /// Metrics exporter could not be scraped
    pub fn metrics_unavailable() -> Self {
        Self::Request {
            code: ErrorCode::MetricsUnavailable,
            message: "metrics exporter is unavailable".to_string(),
        }
    }

    /// Get the error code
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Request { code, .. } => *code,
            Self::Upload(_) => ErrorCode::UploadFailed,
            Self::Fund(StorageError::FundingUnsupported(_)) => ErrorCode::FundingUnsupported,
            Self::Fund(_) => ErrorCode::FundFailed,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Message shown to clients; backend details stay in the server log
    pub fn client_message(&self) -> String {
        match self {
            Self::Request { message, .. } => message.clone(),
            Self::Upload(_) => "the storage backend failed to store the upload".to_string(),
            Self::Fund(StorageError::FundingUnsupported(backend)) => {
                format!("the {} backend does not support funding", backend)
            }
            Self::Fund(_) => "the storage backend failed to process the funding".to_string(),
            Self::Internal(_) => "internal server error".to_string(),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code
    pub code: String,
    /// Human-readable description
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.error_code();

        if code.status_code().is_server_error() {
            tracing::debug!(error = %self, code = code.as_str(), "Returning server error");
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.as_str().to_string(),
                message: self.client_message(),
            },
        };

        (code.status_code(), Json(body)).into_response()
    }
}
