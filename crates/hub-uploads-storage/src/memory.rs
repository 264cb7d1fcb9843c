//! In-memory uploader for development and testing

use crate::cid_utils::raw_cid;
use crate::types::UploadResult;
use crate::{Result, Uploader};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;

/// A stored blob and the content type it was uploaded with
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredBlob {
    pub data: Bytes,
    pub content_type: String,
}

/// A content-addressed, in-process backend
///
/// Identifiers are raw SHA2-256 CIDv1s, so uploading the same bytes twice
/// yields the same CID.
#[derive(Clone)]
pub struct MemoryUploader {
    gateway: String,
    blobs: Arc<DashMap<String, StoredBlob>>,
}

impl MemoryUploader {
    /// Create a new empty store serving URIs from `gateway`
    pub fn new(gateway: impl Into<String>) -> Self {
        Self {
            gateway: gateway.into(),
            blobs: Arc::new(DashMap::new()),
        }
    }

    /// Fetch a stored blob
    pub fn get(&self, cid: &str) -> Option<StoredBlob> {
        self.blobs.get(cid).map(|entry| entry.value().clone())
    }

    /// Number of stored blobs
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl Uploader for MemoryUploader {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn upload(&self, data: Bytes, content_type: &str) -> Result<UploadResult> {
        let cid = raw_cid(&data)?.to_string();
        self.blobs.insert(
            cid.clone(),
            StoredBlob {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(UploadResult::new(&self.gateway, cid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StorageError;

    #[tokio::test]
    async fn test_memory_upload() {
        let store = MemoryUploader::new("https://gw.example");

        let result = store
            .upload(Bytes::from_static(b"Hello, World!"), "text/plain")
            .await
            .unwrap();

        assert_eq!(result.uri, format!("https://gw.example/{}", result.cid));

        let blob = store.get(&result.cid).unwrap();
        assert_eq!(blob.data.as_ref(), b"Hello, World!");
        assert_eq!(blob.content_type, "text/plain");
    }

    #[tokio::test]
    async fn test_memory_upload_is_content_addressed() {
        let store = MemoryUploader::new("https://gw.example");

        let a = store.upload(Bytes::from_static(b"same"), "text/plain").await.unwrap();
        let b = store.upload(Bytes::from_static(b"same"), "text/plain").await.unwrap();
        let c = store.upload(Bytes::from_static(b"other"), "text/plain").await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a.cid, c.cid);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_memory_fund_unsupported() {
        let store = MemoryUploader::new("https://gw.example");
        assert!(matches!(
            store.fund(100).await,
            Err(StorageError::FundingUnsupported("memory"))
        ));
    }
}
