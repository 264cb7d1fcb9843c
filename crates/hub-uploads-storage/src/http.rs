//! Shared HTTP plumbing for the backend clients

use crate::{Result, StorageError};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// A reqwest client that remembers its timeout, so transport errors report
/// the limit that was actually configured
#[derive(Clone, Debug)]
pub(crate) struct Transport {
    client: Client,
    timeout: Duration,
}

impl Transport {
    pub(crate) fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(Self { client, timeout })
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    /// Send a request; non-2xx answers become `StorageError::Backend`
    pub(crate) async fn send(&self, request: RequestBuilder, context: &str) -> Result<Response> {
        let response = request.send().await.map_err(|e| self.error(e))?;
        if !response.status().is_success() {
            return Err(StorageError::from_response(context, response).await);
        }
        Ok(response)
    }

    pub(crate) async fn text(&self, response: Response) -> Result<String> {
        response.text().await.map_err(|e| self.error(e))
    }

    pub(crate) async fn bytes(&self, response: Response) -> Result<bytes::Bytes> {
        response.bytes().await.map_err(|e| self.error(e))
    }

    pub(crate) async fn json<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
        response.json().await.map_err(|e| self.error(e))
    }

    fn error(&self, err: reqwest::Error) -> StorageError {
        StorageError::from_reqwest(err, self.timeout)
    }
}
