//! Application state

use crate::config::{BackendKind, ConfigError, GatewayConfig, reachable_addr};
use crate::metrics::UploadMetrics;
use hub_uploads_storage::{
    BundlerClient, BundlerConfig, MemoryUploader, Uploader, W3upClient, W3upConfig,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Timeout for scraping the local metrics exporter
const METRICS_PROXY_TIMEOUT: Duration = Duration::from_secs(5);

/// Application state shared across handlers
pub struct AppState {
    /// Gateway configuration
    pub config: GatewayConfig,
    /// Storage backend, chosen once at startup
    pub uploader: Arc<dyn Uploader>,
    /// Upload latency metrics
    pub metrics: UploadMetrics,
    /// Client used to proxy the metrics exporter
    pub http: reqwest::Client,
    /// Exporter URL scraped by the `/metrics` proxy
    pub metrics_url: String,
}

impl AppState {
    /// Create the state, connecting the configured backend
    pub fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let uploader = Self::create_uploader(&config)?;
        Self::with_uploader(config, uploader)
    }

    /// Create the state around an existing uploader
    pub fn with_uploader(config: GatewayConfig, uploader: Arc<dyn Uploader>) -> anyhow::Result<Self> {
        let metrics = UploadMetrics::new()?;
        let http = reqwest::Client::builder()
            .timeout(METRICS_PROXY_TIMEOUT)
            .build()?;

        info!(backend = uploader.backend(), "Storage backend ready");

        let metrics_url = scrape_url(config.metrics_scrape_addr());
        Ok(Self {
            config,
            uploader,
            metrics,
            http,
            metrics_url,
        })
    }

    /// Point the `/metrics` proxy at the exporter's bound address
    pub fn with_metrics_addr(mut self, addr: SocketAddr) -> Self {
        self.metrics_url = scrape_url(reachable_addr(addr));
        self
    }

    fn create_uploader(config: &GatewayConfig) -> anyhow::Result<Arc<dyn Uploader>> {
        let timeout = Duration::from_secs(config.backend_timeout_secs);

        let uploader: Arc<dyn Uploader> = match config.backend {
            BackendKind::Bundler => {
                let key = config
                    .bundler_key
                    .as_deref()
                    .ok_or(ConfigError::Missing("BUNDLER_KEY"))?;
                let bundler_config = BundlerConfig::new(&config.bundler_url, &config.gateway_url)
                    .with_token(&config.bundler_token)
                    .with_arweave_url(&config.arweave_url)
                    .with_timeout(timeout);
                let client = BundlerClient::new(bundler_config, key)?;
                info!(
                    node = %config.bundler_url,
                    token = client.token(),
                    address = client.wallet().address(),
                    "Using bundler backend"
                );
                Arc::new(client)
            }
            BackendKind::W3up => {
                let key = config
                    .w3_key
                    .as_deref()
                    .ok_or(ConfigError::Missing("W3_KEY"))?;
                let proof = config
                    .w3_proof
                    .as_deref()
                    .ok_or(ConfigError::Missing("W3_PROOF"))?;
                let w3_config = W3upConfig::new(&config.w3_url, &config.gateway_url)
                    .with_service_did(&config.w3_service_did)
                    .with_timeout(timeout);
                let client = W3upClient::new(w3_config, key, proof)?;
                info!(
                    service = %config.w3_url,
                    audience = %config.w3_service_did,
                    agent = client.agent(),
                    space = client.space(),
                    "Using w3up backend"
                );
                Arc::new(client)
            }
            BackendKind::Memory => {
                warn!("Using in-memory storage, uploads will NOT persist");
                Arc::new(MemoryUploader::new(&config.gateway_url))
            }
        };

        Ok(uploader)
    }
}

fn scrape_url(addr: SocketAddr) -> String {
    format!("http://{}/metrics", addr)
}
