//! Pay-per-byte bundler client
//!
//! Talks to a bundler node's HTTP API. Every call is scoped to a payment
//! token; the wallet is an Arweave JWK, so the `arweave` token is the one
//! this client can sign for.
//!
//! - `GET  {url}/price/{token}/{bytes}` returns the price as plain text
//! - `POST {url}/tx/{token}` stores a signed ANS-104 data item
//! - funding sends an Arweave transfer to the node's address from
//!   `GET {url}/info`, then registers it with
//!   `POST {url}/account/balance/{token}` `{"tx_id"}`

use crate::ans104::DataItem;
use crate::arweave::{ArweaveWallet, Transaction};
use crate::http::Transport;
use crate::types::{Price, Tag, UploadResult};
use crate::{Result, StorageError, Uploader};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Payment token used when none is configured
pub const DEFAULT_TOKEN: &str = "arweave";

/// Arweave gateway funding transfers are posted to by default
pub const DEFAULT_ARWEAVE_URL: &str = "https://arweave.net";

/// Tokens an Arweave wallet can sign uploads and transfers for
const SUPPORTED_TOKENS: [&str; 1] = ["arweave"];

/// Configuration for a bundler node connection
#[derive(Clone, Debug)]
pub struct BundlerConfig {
    /// Bundler node URL (e.g., "https://node1.irys.xyz")
    pub url: String,
    /// Payment token
    pub token: String,
    /// Gateway base URL used to build content URIs
    pub gateway: String,
    /// Arweave gateway funding transfers are sent through
    pub arweave_url: String,
    /// Request timeout
    pub timeout: Duration,
}

impl BundlerConfig {
    /// Create a config paying with the default token
    pub fn new(url: impl Into<String>, gateway: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: DEFAULT_TOKEN.to_string(),
            gateway: gateway.into(),
            arweave_url: DEFAULT_ARWEAVE_URL.to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Pay with a different token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    /// Send funding transfers through a different Arweave gateway
    pub fn with_arweave_url(mut self, url: impl Into<String>) -> Self {
        self.arweave_url = url.into();
        self
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.url.trim_end_matches('/'), path)
    }

    fn arweave_endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.arweave_url.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Deserialize)]
struct UploadReceipt {
    id: String,
    #[serde(default)]
    timestamp: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct NodeInfo {
    #[serde(default)]
    addresses: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
struct FundRequest<'a> {
    tx_id: &'a str,
}

/// Bundler client
pub struct BundlerClient {
    http: Transport,
    config: BundlerConfig,
    wallet: ArweaveWallet,
}

impl BundlerClient {
    /// Create a new bundler client from a config and a JWK wallet string
    pub fn new(config: BundlerConfig, key: &str) -> Result<Self> {
        for url in [&config.url, &config.arweave_url] {
            url::Url::parse(url).map_err(|e| {
                StorageError::Configuration(format!("invalid bundler url {}: {}", url, e))
            })?;
        }

        if config.token.trim().is_empty() {
            return Err(StorageError::Configuration(
                "payment token must not be empty".to_string(),
            ));
        }
        if !SUPPORTED_TOKENS.contains(&config.token.as_str()) {
            return Err(StorageError::Configuration(format!(
                "payment token {} needs a non-arweave wallet, supported tokens: {}",
                config.token,
                SUPPORTED_TOKENS.join(", ")
            )));
        }

        let wallet = ArweaveWallet::parse(key)?;
        let http = Transport::new(config.timeout)?;

        Ok(Self {
            http,
            config,
            wallet,
        })
    }

    /// Wallet used to sign and pay for uploads
    pub fn wallet(&self) -> &ArweaveWallet {
        &self.wallet
    }

    /// Payment token
    pub fn token(&self) -> &str {
        &self.config.token
    }

    /// Price for storing `bytes` bytes
    #[instrument(skip(self), fields(token = %self.config.token))]
    pub async fn price(&self, bytes: u64) -> Result<Price> {
        let url = self
            .config
            .endpoint(&format!("price/{}/{}", self.config.token, bytes));
        self.get_price(&url, "price query failed").await
    }

    async fn get_price(&self, url: &str, context: &str) -> Result<Price> {
        let response = self.http.send(self.http.client().get(url), context).await?;
        let body = self.http.text(response).await?;
        body.parse().map_err(|e| {
            StorageError::Deserialization(format!("invalid price {:?}: {}", body.trim(), e))
        })
    }

    /// The node's deposit address for the configured token
    async fn deposit_address(&self) -> Result<String> {
        let request = self.http.client().get(self.config.endpoint("info"));
        let response = self.http.send(request, "node info query failed").await?;
        let info: NodeInfo = self.http.json(response).await?;

        info.addresses
            .get(&self.config.token)
            .cloned()
            .ok_or_else(|| {
                StorageError::Deserialization(format!(
                    "bundler node lists no {} address",
                    self.config.token
                ))
            })
    }

    /// Sign a transfer of `quantity` to `target` and post it to the network
    async fn send_transfer(&self, target: &str, quantity: Price) -> Result<Transaction> {
        let reward = self
            .get_price(
                &self.config.arweave_endpoint(&format!("price/0/{}", target)),
                "transfer fee query failed",
            )
            .await?;

        let request = self.http.client().get(self.config.arweave_endpoint("tx_anchor"));
        let response = self.http.send(request, "anchor query failed").await?;
        let anchor = self.http.text(response).await?;

        let tx = Transaction::transfer(&self.wallet, target, quantity, reward, &anchor)?;

        let request = self
            .http
            .client()
            .post(self.config.arweave_endpoint("tx"))
            .json(&tx);
        self.http.send(request, "transfer rejected").await?;

        debug!(tx = %tx.id, to = target, reward = %reward, "Transfer posted");
        Ok(tx)
    }
}

impl std::fmt::Debug for BundlerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundlerClient")
            .field("config", &self.config)
            .field("wallet", &self.wallet)
            .finish()
    }
}

#[async_trait]
impl Uploader for BundlerClient {
    fn backend(&self) -> &'static str {
        "bundler"
    }

    #[instrument(skip(self, data), fields(size = data.len(), token = %self.config.token))]
    async fn upload(&self, data: Bytes, content_type: &str) -> Result<UploadResult> {
        let item = DataItem::sign(&self.wallet, &[Tag::content_type(content_type)], data)?;
        let id = item.id();

        let request = self
            .http
            .client()
            .post(self.config.endpoint(&format!("tx/{}", self.config.token)))
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(item.to_bytes());
        let response = self.http.send(request, "upload rejected").await?;

        let receipt: UploadReceipt = self.http.json(response).await?;
        if receipt.id != id {
            warn!(expected = %id, id = %receipt.id, "Bundler returned a different item id");
        }
        debug!(id = %receipt.id, timestamp = ?receipt.timestamp, "Bundler accepted upload");

        Ok(UploadResult::new(&self.config.gateway, receipt.id))
    }

    #[instrument(skip(self), fields(token = %self.config.token))]
    async fn fund(&self, bytes: u64) -> Result<Price> {
        let price = self.price(bytes).await?;
        let target = self.deposit_address().await?;
        let tx = self.send_transfer(&target, price).await?;

        let request = self
            .http
            .client()
            .post(
                self.config
                    .endpoint(&format!("account/balance/{}", self.config.token)),
            )
            .json(&FundRequest { tx_id: &tx.id });
        let response = self.http.send(request, "funding rejected").await?;
        let message = self.http.text(response).await?;

        info!(
            bytes,
            price = %price,
            tx = %tx.id,
            reply = message.trim(),
            "Funding submitted"
        );

        Ok(price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ans104::encode_tags;
    use crate::arweave::b64url;
    use crate::arweave::testing::{TEST_WALLET, verify};
    use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
    use sha2::{Digest, Sha256};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    const NODE_ADDRESS: &str = "OXcT1sVRSA5eGwt2k6Yuz8-3e3g9WJi5uSE99CWqsBs";
    const ANCHOR: &str = "kO9_ZLxBfJ0cY8fWmy3Pl2ZRe2Rp1KGVk4mAdMHbVm4vkrGGb2o8qUjMsdOVEk5a";

    fn client(server: &MockServer) -> BundlerClient {
        let config = BundlerConfig::new(server.uri(), "https://gw.example");
        BundlerClient::new(config, TEST_WALLET).unwrap()
    }

    fn funding_client(node: &MockServer, arweave: &MockServer) -> BundlerClient {
        let config =
            BundlerConfig::new(node.uri(), "https://gw.example").with_arweave_url(arweave.uri());
        BundlerClient::new(config, TEST_WALLET).unwrap()
    }

    /// Accepts a body only if it is a correctly signed data item
    fn signed_item(request: &Request) -> bool {
        let Ok(item) = DataItem::from_bytes(&request.body) else {
            return false;
        };
        verify(item.owner(), &item.signature_data(), item.signature())
    }

    #[rstest::rstest]
    #[case::bad_url(BundlerConfig::new("not a url", "https://gw.example"))]
    #[case::bad_arweave_url(
        BundlerConfig::new("https://node.example", "https://gw.example").with_arweave_url("nope")
    )]
    #[case::empty_token(BundlerConfig::new("https://node.example", "https://gw.example").with_token(" "))]
    #[case::evm_token(BundlerConfig::new("https://node.example", "https://gw.example").with_token("matic"))]
    fn test_invalid_config(#[case] config: BundlerConfig) {
        assert!(matches!(
            BundlerClient::new(config, TEST_WALLET),
            Err(StorageError::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_wallet() {
        let config = BundlerConfig::new("https://node.example", "https://gw.example");
        assert!(matches!(
            BundlerClient::new(config, r#"{"kty":"RSA","n":"AQAB"}"#),
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_upload_posts_signed_data_item() {
        let server = MockServer::start().await;
        let client = client(&server);

        Mock::given(method("POST"))
            .and(path("/tx/arweave"))
            .and(header("content-type", "application/octet-stream"))
            .and(signed_item)
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": "tx-abc", "timestamp": 1700000000000u64})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let result = client
            .upload(Bytes::from_static(b"hello"), "text/plain")
            .await
            .unwrap();

        assert_eq!(result.cid, "tx-abc");
        assert_eq!(result.uri, "https://gw.example/tx-abc");

        let requests = server.received_requests().await.unwrap();
        let item = DataItem::from_bytes(&requests[0].body).unwrap();
        assert_eq!(item.owner(), client.wallet().owner());
        assert_eq!(item.data(), b"hello");
        let expected_tags = encode_tags(&[Tag::content_type("text/plain")]).unwrap();
        assert_eq!(item.tags(), (1, expected_tags.as_slice()));
    }

    #[tokio::test]
    async fn test_upload_rejected() {
        let server = MockServer::start().await;
        let client = client(&server);

        Mock::given(method("POST"))
            .and(path("/tx/arweave"))
            .respond_with(ResponseTemplate::new(402).set_body_string("Not enough funds to send data"))
            .mount(&server)
            .await;

        let err = client
            .upload(Bytes::from_static(b"hello"), "text/plain")
            .await
            .unwrap_err();

        match err {
            StorageError::Backend { status, message } => {
                assert_eq!(status, 402);
                assert!(message.contains("Not enough funds"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_upload_timeout_reports_configured_limit() {
        let server = MockServer::start().await;
        let config = BundlerConfig::new(server.uri(), "https://gw.example")
            .with_timeout(Duration::from_secs(1));
        let client = BundlerClient::new(config, TEST_WALLET).unwrap();

        Mock::given(method("POST"))
            .and(path("/tx/arweave"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": "late"}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let err = client
            .upload(Bytes::from_static(b"hello"), "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Timeout { seconds: 1 }));
    }

    #[tokio::test]
    async fn test_price() {
        let server = MockServer::start().await;
        let client = client(&server);

        Mock::given(method("GET"))
            .and(path("/price/arweave/1024"))
            .respond_with(ResponseTemplate::new(200).set_body_string("269081"))
            .mount(&server)
            .await;

        assert_eq!(client.price(1024).await.unwrap(), Price(269_081));
    }

    #[tokio::test]
    async fn test_price_garbage() {
        let server = MockServer::start().await;
        let client = client(&server);

        Mock::given(method("GET"))
            .and(path("/price/arweave/1024"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        assert!(matches!(
            client.price(1024).await,
            Err(StorageError::Deserialization(_))
        ));
    }

    async fn mount_funding_quotes(node: &MockServer, arweave: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/price/arweave/2048"))
            .respond_with(ResponseTemplate::new(200).set_body_string("538162"))
            .expect(1)
            .mount(node)
            .await;

        Mock::given(method("GET"))
            .and(path("/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "version": "0.2.0",
                "addresses": {"arweave": NODE_ADDRESS, "ethereum": "0x853758425e953739F5438fd6fd0Efe04A477b039"},
                "gateway": "arweave.net",
            })))
            .mount(node)
            .await;

        Mock::given(method("GET"))
            .and(path(format!("/price/0/{}", NODE_ADDRESS)))
            .respond_with(ResponseTemplate::new(200).set_body_string("1453864"))
            .mount(arweave)
            .await;

        Mock::given(method("GET"))
            .and(path("/tx_anchor"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ANCHOR))
            .mount(arweave)
            .await;
    }

    #[tokio::test]
    async fn test_fund_transfers_then_registers() {
        let node = MockServer::start().await;
        let arweave = MockServer::start().await;
        let client = funding_client(&node, &arweave);
        mount_funding_quotes(&node, &arweave).await;

        Mock::given(method("POST"))
            .and(path("/tx"))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .expect(1)
            .mount(&arweave)
            .await;

        Mock::given(method("POST"))
            .and(path("/account/balance/arweave"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Tx Verified"))
            .expect(1)
            .mount(&node)
            .await;

        assert_eq!(client.fund(2048).await.unwrap(), Price(538_162));

        let posted = arweave.received_requests().await.unwrap();
        let tx_request = posted.iter().find(|r| r.url.path() == "/tx").unwrap();
        let tx: Transaction = serde_json::from_slice(&tx_request.body).unwrap();
        assert_eq!(tx.format, 2);
        assert_eq!(tx.target, NODE_ADDRESS);
        assert_eq!(tx.quantity, "538162");
        assert_eq!(tx.reward, "1453864");
        assert_eq!(tx.last_tx, ANCHOR);
        assert_eq!(tx.owner, b64url(client.wallet().owner()));

        let signature = URL_SAFE_NO_PAD.decode(&tx.signature).unwrap();
        assert!(verify(
            client.wallet().owner(),
            &tx.signature_data().unwrap(),
            &signature
        ));
        assert_eq!(tx.id, b64url(&Sha256::digest(&signature)));

        let registered = node.received_requests().await.unwrap();
        let balance = registered
            .iter()
            .find(|r| r.url.path() == "/account/balance/arweave")
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&balance.body).unwrap();
        assert_eq!(body, serde_json::json!({"tx_id": tx.id}));
    }

    #[tokio::test]
    async fn test_fund_transfer_rejected() {
        let node = MockServer::start().await;
        let arweave = MockServer::start().await;
        let client = funding_client(&node, &arweave);
        mount_funding_quotes(&node, &arweave).await;

        Mock::given(method("POST"))
            .and(path("/tx"))
            .respond_with(ResponseTemplate::new(400).set_body_string("Transaction verification failed."))
            .mount(&arweave)
            .await;

        Mock::given(method("POST"))
            .and(path("/account/balance/arweave"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&node)
            .await;

        assert!(matches!(
            client.fund(2048).await,
            Err(StorageError::Backend { status: 400, .. })
        ));
    }

    #[tokio::test]
    async fn test_fund_registration_rejected() {
        let node = MockServer::start().await;
        let arweave = MockServer::start().await;
        let client = funding_client(&node, &arweave);
        mount_funding_quotes(&node, &arweave).await;

        Mock::given(method("POST"))
            .and(path("/tx"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&arweave)
            .await;

        Mock::given(method("POST"))
            .and(path("/account/balance/arweave"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&node)
            .await;

        assert!(matches!(
            client.fund(2048).await,
            Err(StorageError::Backend { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn test_fund_node_without_address() {
        let node = MockServer::start().await;
        let arweave = MockServer::start().await;
        let client = funding_client(&node, &arweave);

        Mock::given(method("GET"))
            .and(path("/price/arweave/10"))
            .respond_with(ResponseTemplate::new(200).set_body_string("5"))
            .mount(&node)
            .await;

        Mock::given(method("GET"))
            .and(path("/info"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"addresses": {"ethereum": "0xabc"}})),
            )
            .mount(&node)
            .await;

        assert!(matches!(
            client.fund(10).await,
            Err(StorageError::Deserialization(_))
        ));
    }
}
