//! Error types for the hub-uploads-storage crate

use std::time::Duration;
use thiserror::Error;

/// Result type alias using `StorageError`
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur while talking to a storage backend
#[derive(Error, Debug)]
pub enum StorageError {
    /// Signing key or wallet could not be parsed
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Delegation proof could not be imported
    #[error("invalid proof: {0}")]
    InvalidProof(String),

    /// A CAR archive could not be parsed
    #[error("invalid archive: {0}")]
    InvalidArchive(String),

    /// Upload content cannot be packaged for the backend
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Backend answered with a non-success status
    #[error("backend error ({status}): {message}")]
    Backend { status: u16, message: String },

    /// The service ran an invocation and answered with an error receipt
    #[error("{ability} rejected: {message}")]
    Rejected { ability: String, message: String },

    /// Connection error
    #[error("connection error: {0}")]
    Connection(String),

    /// Timeout error
    #[error("operation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// HTTP error
    #[error("http error: {0}")]
    Http(String),

    /// Backend response could not be decoded
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// The backend has no payment system
    #[error("funding is not supported by the {0} backend")]
    FundingUnsupported(&'static str),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl StorageError {
    /// Build a backend error from a failed response, consuming its body
    pub(crate) async fn from_response(context: &str, response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        StorageError::Backend {
            status,
            message: format!("{}: {}", context, body.trim()),
        }
    }

    /// Classify a transport error; `timeout` is the limit the client was
    /// built with
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            StorageError::Timeout {
                seconds: timeout.as_secs(),
            }
        } else if err.is_connect() {
            StorageError::Connection(err.to_string())
        } else if err.is_decode() {
            StorageError::Deserialization(err.to_string())
        } else {
            StorageError::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Deserialization(err.to_string())
    }
}
