//! Shared fixtures for handler tests

use crate::{AppState, BackendKind, GatewayConfig, routes};
use async_trait::async_trait;
use axum_test::TestServer;
use bytes::Bytes;
use hub_uploads_storage::{Price, Result, StorageError, UploadResult, Uploader};
use std::sync::{Arc, Mutex};

pub const TEST_GATEWAY: &str = "https://gw.example";

/// Uploader double that records every call
#[derive(Clone, Default)]
pub struct FakeUploader {
    cid: Option<String>,
    price: Option<Price>,
    calls: Arc<Mutex<Vec<(Bytes, String)>>>,
    fund_calls: Arc<Mutex<Vec<u64>>>,
}

impl FakeUploader {
    pub fn returning(cid: &str) -> Self {
        Self {
            cid: Some(cid.to_string()),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, price: u128) -> Self {
        self.price = Some(Price(price));
        self
    }

    pub fn calls(&self) -> Vec<(Bytes, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fund_calls(&self) -> Vec<u64> {
        self.fund_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Uploader for FakeUploader {
    fn backend(&self) -> &'static str {
        "fake"
    }

    async fn upload(&self, data: Bytes, content_type: &str) -> Result<UploadResult> {
        self.calls
            .lock()
            .unwrap()
            .push((data, content_type.to_string()));

        match &self.cid {
            Some(cid) => Ok(UploadResult::new(TEST_GATEWAY, cid.clone())),
            None => Err(StorageError::Backend {
                status: 500,
                message: "secret backend detail".to_string(),
            }),
        }
    }

    async fn fund(&self, bytes: u64) -> Result<Price> {
        self.fund_calls.lock().unwrap().push(bytes);
        self.price.ok_or(StorageError::Backend {
            status: 402,
            message: "insufficient balance".to_string(),
        })
    }
}

/// Uploader double relying on the default `fund`
pub struct NoFundingUploader;

#[async_trait]
impl Uploader for NoFundingUploader {
    fn backend(&self) -> &'static str {
        "w3up"
    }

    async fn upload(&self, _data: Bytes, _content_type: &str) -> Result<UploadResult> {
        Ok(UploadResult::new(TEST_GATEWAY, "bafy"))
    }
}

pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        backend: BackendKind::Memory,
        gateway_url: TEST_GATEWAY.to_string(),
        ..Default::default()
    }
}

pub fn server_for(config: GatewayConfig, uploader: Arc<dyn Uploader>) -> (TestServer, Arc<AppState>) {
    let state = Arc::new(AppState::with_uploader(config, uploader).unwrap());
    let server = TestServer::new(routes::create_router(Arc::clone(&state))).unwrap();
    (server, state)
}

pub fn test_server(fake: FakeUploader) -> (TestServer, Arc<AppState>) {
    server_for(test_config(), Arc::new(fake))
}

pub fn test_server_with_limit(fake: FakeUploader, max_file_size: u64) -> (TestServer, Arc<AppState>) {
    let config = GatewayConfig {
        max_file_size,
        ..test_config()
    };
    server_for(config, Arc::new(fake))
}
