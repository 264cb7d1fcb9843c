//! Gateway configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use thiserror::Error;

/// Default upload size ceiling (250 MiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 250 * 1024 * 1024;

/// Slack on top of the file ceiling for multipart framing and text fields
const MULTIPART_OVERHEAD: u64 = 1024 * 1024;

/// Storage backend the gateway forwards uploads to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Pay-per-byte bundler network
    Bundler,
    /// Capability-based w3up network
    W3up,
    /// In-process store (development only, nothing persists)
    Memory,
}

/// Configuration validation failures
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Gateway server configuration
#[derive(Clone)]
pub struct GatewayConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Port of the metrics exporter
    pub metrics_port: u16,
    /// Gateway base URL content is served from
    pub gateway_url: String,
    /// Storage backend
    pub backend: BackendKind,
    /// Bundler node URL
    pub bundler_url: String,
    /// Bundler wallet (JWK JSON)
    pub bundler_key: Option<String>,
    /// Bundler payment token
    pub bundler_token: String,
    /// Arweave gateway funding transfers are posted to
    pub arweave_url: String,
    /// w3up service URL
    pub w3_url: String,
    /// w3up service DID, the audience of every invocation
    pub w3_service_did: String,
    /// w3up agent signing key
    pub w3_key: Option<String>,
    /// w3up delegation proof (base64 CAR)
    pub w3_proof: Option<String>,
    /// Maximum upload size (bytes)
    pub max_file_size: u64,
    /// Timeout for backend requests (seconds)
    pub backend_timeout_secs: u64,
    /// Enable CORS
    pub cors_enabled: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            metrics_port: 9464,
            gateway_url: String::new(),
            backend: BackendKind::Bundler,
            bundler_url: "https://node1.irys.xyz".to_string(),
            bundler_key: None,
            bundler_token: "arweave".to_string(),
            arweave_url: "https://arweave.net".to_string(),
            w3_url: "https://up.web3.storage".to_string(),
            w3_service_did: "did:web:web3.storage".to_string(),
            w3_key: None,
            w3_proof: None,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            backend_timeout_secs: 120,
            cors_enabled: true,
        }
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("GatewayConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("metrics_port", &self.metrics_port)
            .field("gateway_url", &self.gateway_url)
            .field("backend", &self.backend)
            .field("bundler_url", &self.bundler_url)
            .field("bundler_key", &redact(&self.bundler_key))
            .field("bundler_token", &self.bundler_token)
            .field("arweave_url", &self.arweave_url)
            .field("w3_url", &self.w3_url)
            .field("w3_service_did", &self.w3_service_did)
            .field("w3_key", &redact(&self.w3_key))
            .field("w3_proof", &redact(&self.w3_proof))
            .field("max_file_size", &self.max_file_size)
            .field("backend_timeout_secs", &self.backend_timeout_secs)
            .field("cors_enabled", &self.cors_enabled)
            .finish()
    }
}

impl GatewayConfig {
    /// Get the bind address
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Address the metrics exporter binds to
    pub fn metrics_bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.metrics_port)
    }

    /// Address the gateway scrapes when proxying `/metrics`
    ///
    /// Host names that are not IP literals fall back to IPv4 loopback. The
    /// server replaces this with the exporter's bound address once it listens.
    pub fn metrics_scrape_addr(&self) -> SocketAddr {
        let ip = self
            .host
            .parse::<IpAddr>()
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        reachable_addr(SocketAddr::new(ip, self.metrics_port))
    }

    /// Request body limit: the file ceiling plus multipart framing
    pub fn body_limit(&self) -> usize {
        usize::try_from(self.max_file_size.saturating_add(MULTIPART_OVERHEAD)).unwrap_or(usize::MAX)
    }

    /// Validate the configuration and normalize the gateway URL
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        let gateway_url = self.gateway_url.trim();
        if gateway_url.is_empty() {
            return Err(ConfigError::Missing("GATEWAY_URL"));
        }
        check_http_url("GATEWAY_URL", gateway_url)?;
        self.gateway_url = gateway_url.trim_end_matches('/').to_string();

        match self.backend {
            BackendKind::Bundler => {
                require("BUNDLER_KEY", &self.bundler_key)?;
                check_http_url("BUNDLER_URL", &self.bundler_url)?;
                check_http_url("ARWEAVE_URL", &self.arweave_url)?;
                if self.bundler_token.trim().is_empty() {
                    return Err(ConfigError::Missing("BUNDLER_TOKEN"));
                }
            }
            BackendKind::W3up => {
                require("W3_KEY", &self.w3_key)?;
                require("W3_PROOF", &self.w3_proof)?;
                check_http_url("W3_URL", &self.w3_url)?;
                if !self.w3_service_did.starts_with("did:") {
                    return Err(ConfigError::Invalid {
                        field: "W3_SERVICE_DID",
                        reason: format!("{} is not a DID", self.w3_service_did),
                    });
                }
            }
            BackendKind::Memory => {}
        }

        if self.max_file_size == 0 {
            return Err(ConfigError::Invalid {
                field: "MAX_FILE_SIZE",
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.backend_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "BACKEND_TIMEOUT_SECS",
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.port != 0 && self.port == self.metrics_port {
            return Err(ConfigError::Invalid {
                field: "METRICS_PORT",
                reason: format!("port {} is already used by the gateway", self.port),
            });
        }

        Ok(self)
    }
}

/// Map a wildcard listen address to loopback of the same family
pub fn reachable_addr(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => SocketAddr::new(Ipv4Addr::LOCALHOST.into(), addr.port()),
        IpAddr::V6(ip) if ip.is_unspecified() => SocketAddr::new(Ipv6Addr::LOCALHOST.into(), addr.port()),
        _ => addr,
    }
}

fn require(field: &'static str, value: &Option<String>) -> Result<(), ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(()),
        _ => Err(ConfigError::Missing(field)),
    }
}

fn check_http_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    let url = url::Url::parse(value).map_err(|e| ConfigError::Invalid {
        field,
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(ConfigError::Invalid {
            field,
            reason: format!("unsupported scheme {}", scheme),
        }),
    }
}
