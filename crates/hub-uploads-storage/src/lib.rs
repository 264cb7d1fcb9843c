//! # hub-uploads storage
//!
//! Storage backend clients for the hub-uploads gateway.
//!
//! This crate provides:
//! - **Uploader trait**: one `upload` / `fund` contract for every backend
//! - **Bundler client**: pay-per-byte network, signed ANS-104 data items,
//!   funded by Arweave transfers
//! - **w3up client**: capability-based network, UnixFS shards stored through
//!   ucanto invocations under a UCAN delegation
//! - **Memory uploader**: content-addressed in-process store for development
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │             hub-uploads-gateway         │
//! ├─────────────────────────────────────────┤
//! │            Uploader Trait               │
//! ├─────────────┬─────────────┬─────────────┤
//! │   Bundler   │    W3up     │   Memory    │
//! ├─────────────┴─────────────┴─────────────┤
//! │    bundler node  /  w3up service        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use hub_uploads_storage::{BundlerClient, BundlerConfig, Uploader};
//!
//! let config = BundlerConfig::new("https://node1.irys.xyz", "https://gateway.irys.xyz");
//! let client = BundlerClient::new(config, &wallet_json)?;
//! let result = client.upload(data, "image/png").await?;
//! println!("{} -> {}", result.cid, result.uri);
//! ```

pub mod ans104;
pub mod arweave;
pub mod bundler;
pub mod car;
pub mod cid_utils;
pub mod error;
mod http;
pub mod memory;
pub mod types;
pub mod ucan;
pub mod unixfs;
pub mod w3up;

pub use ans104::DataItem;
pub use arweave::{ArweaveWallet, Transaction};
pub use bundler::{BundlerClient, BundlerConfig};
pub use error::{Result, StorageError};
pub use memory::{MemoryUploader, StoredBlob};
pub use types::{Price, Tag, UploadResult};
pub use ucan::AgentSigner;
pub use w3up::{Delegation, W3upClient, W3upConfig};

use async_trait::async_trait;
use bytes::Bytes;

/// Uniform contract over storage backends
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Short backend name used in logs
    fn backend(&self) -> &'static str;

    /// Store `data`, tagged with `content_type` where the backend keeps metadata
    async fn upload(&self, data: Bytes, content_type: &str) -> Result<UploadResult>;

    /// Pay for storing `bytes` bytes and return the price paid
    ///
    /// Moves funds on every call; calling twice pays twice.
    async fn fund(&self, bytes: u64) -> Result<Price> {
        let _ = bytes;
        Err(StorageError::FundingUnsupported(self.backend()))
    }
}
