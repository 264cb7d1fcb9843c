//! # hub-uploads gateway
//!
//! HTTP front door for decentralized storage uploads.
//!
//! This crate provides:
//! - **Uploads**: one file (multipart) or one JSON document per request
//! - **Funding**: pre-payment on backends that charge per byte
//! - **Metrics**: upload latency histogram, exported and proxied
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                HTTP Clients                 │
//! └──────────────────────┬──────────────────────┘
//!                        │
//! ┌──────────────────────▼──────────────────────┐
//! │              hub-uploads gateway            │
//! ├─────────────────────────────────────────────┤
//! │  Request ID │ Logging │ Body limit │ CORS   │
//! ├─────────────────────────────────────────────┤
//! │  /uploads │ /fund/{bytes} │ /metrics │ ...  │
//! ├─────────────────────────────────────────────┤
//! │            hub-uploads-storage              │
//! │         (bundler, w3up, memory)             │
//! └─────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod openapi;
pub mod payload;
pub mod routes;
pub mod server;
pub mod state;

pub use config::{BackendKind, ConfigError, GatewayConfig};
pub use error::{ApiError, ErrorBody, ErrorCode};
pub use metrics::{UploadMetrics, UploadStatus};
pub use server::run_server_with_shutdown;
pub use state::AppState;
