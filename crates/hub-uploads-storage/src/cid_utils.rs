//! CID (Content Identifier) utilities

use crate::{Result, StorageError};
use cid::Cid;
use cid::multihash::Multihash;
use sha2::{Digest, Sha256};

/// Multicodec code for raw binary leaves
pub const RAW_CODEC: u64 = 0x55;

/// Multicodec code for DAG-PB (UnixFS nodes)
pub const DAG_PB_CODEC: u64 = 0x70;

/// Multicodec code for DAG-CBOR
pub const DAG_CBOR_CODEC: u64 = 0x71;

/// Multicodec code for a CAR archive addressed as a whole
pub const CAR_CODEC: u64 = 0x0202;

/// Multihash code for SHA2-256
pub const SHA2_256_CODE: u64 = 0x12;

/// SHA2-256 multihash of `data`
pub fn sha256_multihash(data: &[u8]) -> Result<Multihash<64>> {
    Multihash::wrap(SHA2_256_CODE, &Sha256::digest(data))
        .map_err(|e| StorageError::Configuration(format!("multihash: {}", e)))
}

/// Create a CIDv1 with `codec` for `data` using SHA2-256
pub fn block_cid(codec: u64, data: &[u8]) -> Result<Cid> {
    Ok(Cid::new_v1(codec, sha256_multihash(data)?))
}

/// Create a CIDv1 for raw bytes using SHA2-256
pub fn raw_cid(data: &[u8]) -> Result<Cid> {
    block_cid(RAW_CODEC, data)
}
