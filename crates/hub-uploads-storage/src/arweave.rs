//! Arweave primitives: JWK wallets, deep hashing and transfer transactions
//!
//! Both bundler data items and Arweave transactions are signed over a
//! SHA-384 "deep hash" of their fields with RSA-PSS (SHA-256) under a
//! 4096-bit wallet key.

use crate::types::Price;
use crate::{Result, StorageError};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::rngs::OsRng;
use rsa::pss::BlindedSigningKey;
use rsa::signature::{RandomizedSigner, SignatureEncoding};
use rsa::{BigUint, RsaPrivateKey};
use serde::{Deserialize, Serialize};
use sha2::digest::Output;
use sha2::{Digest, Sha256, Sha384};

/// Byte length of a wallet modulus (the owner) and of its signatures
pub const OWNER_LENGTH: usize = 512;

/// Byte length of an Arweave address
const ADDRESS_LENGTH: usize = 32;

/// Input of [`deep_hash`]: a byte string or a nested list of them
#[derive(Debug, Clone)]
pub enum DeepHashItem<'a> {
    Blob(&'a [u8]),
    List(Vec<DeepHashItem<'a>>),
}

/// SHA-384 deep hash
///
/// A blob hashes as `H(H("blob" + len) | H(blob))`; a list folds its items
/// into an accumulator seeded with `H("list" + count)`.
pub fn deep_hash(item: &DeepHashItem<'_>) -> Output<Sha384> {
    match item {
        DeepHashItem::Blob(data) => {
            let tag = Sha384::digest(format!("blob{}", data.len()));
            let mut hasher = Sha384::new();
            hasher.update(tag);
            hasher.update(Sha384::digest(data));
            hasher.finalize()
        }
        DeepHashItem::List(items) => {
            let mut acc = Sha384::digest(format!("list{}", items.len()));
            for item in items {
                let mut hasher = Sha384::new();
                hasher.update(acc);
                hasher.update(deep_hash(item));
                acc = hasher.finalize();
            }
            acc
        }
    }
}

/// Unpadded base64url, the encoding Arweave uses for every binary field
pub fn b64url(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

fn decode_b64url(field: &str, value: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|e| StorageError::Deserialization(format!("{} is not base64url: {}", field, e)))
}

#[derive(Deserialize)]
struct Jwk {
    kty: String,
    n: String,
    e: String,
    d: Option<String>,
    p: Option<String>,
    q: Option<String>,
}

/// An Arweave wallet parsed from a JSON web key
pub struct ArweaveWallet {
    signing_key: BlindedSigningKey<Sha256>,
    owner: Vec<u8>,
    address: String,
}

impl ArweaveWallet {
    /// Parse a private RSA JWK
    ///
    /// The modulus must be 4096 bits. The address is the unpadded base64url
    /// SHA-256 of the modulus.
    pub fn parse(key: &str) -> Result<Self> {
        let jwk: Jwk = serde_json::from_str(key)
            .map_err(|e| StorageError::InvalidKey(format!("wallet is not a JSON web key: {}", e)))?;

        if jwk.kty != "RSA" {
            return Err(StorageError::InvalidKey(format!(
                "unsupported wallet key type {}",
                jwk.kty
            )));
        }

        let owner = key_bytes("n", &jwk.n)?;
        if owner.len() != OWNER_LENGTH {
            return Err(StorageError::InvalidKey(format!(
                "wallet modulus is {} bytes, expected {}",
                owner.len(),
                OWNER_LENGTH
            )));
        }

        let private = |name: &str, value: Option<&str>| -> Result<BigUint> {
            let value = value.ok_or_else(|| {
                StorageError::InvalidKey(format!("wallet has no private component {}", name))
            })?;
            Ok(BigUint::from_bytes_be(&key_bytes(name, value)?))
        };

        let primes = match (jwk.p.as_deref(), jwk.q.as_deref()) {
            (Some(p), Some(q)) => vec![private("p", Some(p))?, private("q", Some(q))?],
            _ => Vec::new(),
        };

        let key = RsaPrivateKey::from_components(
            BigUint::from_bytes_be(&owner),
            BigUint::from_bytes_be(&key_bytes("e", &jwk.e)?),
            private("d", jwk.d.as_deref())?,
            primes,
        )
        .map_err(|e| StorageError::InvalidKey(format!("inconsistent wallet key: {}", e)))?;

        Ok(Self {
            signing_key: BlindedSigningKey::new(key),
            address: b64url(&Sha256::digest(&owner)),
            owner,
        })
    }

    /// Public wallet address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Raw modulus, the `owner` field of everything this wallet signs
    pub fn owner(&self) -> &[u8] {
        &self.owner
    }

    /// RSA-PSS (SHA-256) signature over `message`
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let signature = self
            .signing_key
            .try_sign_with_rng(&mut OsRng, message)
            .map_err(|e| StorageError::InvalidKey(format!("signing failed: {}", e)))?
            .to_vec();

        if signature.len() != OWNER_LENGTH {
            return Err(StorageError::InvalidKey(format!(
                "signature is {} bytes, expected {}",
                signature.len(),
                OWNER_LENGTH
            )));
        }
        Ok(signature)
    }
}

impl std::fmt::Debug for ArweaveWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArweaveWallet")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

fn key_bytes(name: &str, value: &str) -> Result<Vec<u8>> {
    let bytes = URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|e| StorageError::InvalidKey(format!("wallet {} is not base64url: {}", name, e)))?;
    if bytes.is_empty() {
        return Err(StorageError::InvalidKey(format!("wallet {} is empty", name)));
    }
    Ok(bytes)
}

/// A format 2 Arweave transaction moving tokens, carrying no data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub format: u8,
    pub id: String,
    pub last_tx: String,
    pub owner: String,
    pub tags: Vec<serde_json::Value>,
    pub target: String,
    pub quantity: String,
    pub data: String,
    pub data_size: String,
    pub data_root: String,
    pub reward: String,
    pub signature: String,
}

impl Transaction {
    /// Build and sign a transfer of `quantity` winston to `target`
    ///
    /// `reward` is the network fee and `last_tx` an anchor from the
    /// gateway's `/tx_anchor`.
    pub fn transfer(
        wallet: &ArweaveWallet,
        target: &str,
        quantity: Price,
        reward: Price,
        last_tx: &str,
    ) -> Result<Self> {
        if decode_b64url("target", target)?.len() != ADDRESS_LENGTH {
            return Err(StorageError::Deserialization(format!(
                "{} is not an arweave address",
                target
            )));
        }

        let mut tx = Self {
            format: 2,
            id: String::new(),
            last_tx: last_tx.trim().to_string(),
            owner: b64url(wallet.owner()),
            tags: Vec::new(),
            target: target.to_string(),
            quantity: quantity.to_string(),
            data: String::new(),
            data_size: "0".to_string(),
            data_root: String::new(),
            reward: reward.to_string(),
            signature: String::new(),
        };

        let signature = wallet.sign(&tx.signature_data()?)?;
        tx.id = b64url(&Sha256::digest(&signature));
        tx.signature = b64url(&signature);
        Ok(tx)
    }

    /// Deep hash of the signed fields
    pub fn signature_data(&self) -> Result<Output<Sha384>> {
        let format = self.format.to_string();
        let owner = decode_b64url("owner", &self.owner)?;
        let target = decode_b64url("target", &self.target)?;
        let last_tx = decode_b64url("last_tx", &self.last_tx)?;
        let data_root = decode_b64url("data_root", &self.data_root)?;

        Ok(deep_hash(&DeepHashItem::List(vec![
            DeepHashItem::Blob(format.as_bytes()),
            DeepHashItem::Blob(&owner),
            DeepHashItem::Blob(&target),
            DeepHashItem::Blob(self.quantity.as_bytes()),
            DeepHashItem::Blob(self.reward.as_bytes()),
            DeepHashItem::Blob(&last_tx),
            DeepHashItem::List(Vec::new()),
            DeepHashItem::Blob(self.data_size.as_bytes()),
            DeepHashItem::Blob(&data_root),
        ])))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use rsa::pss::{Signature, VerifyingKey};
    use rsa::signature::Verifier;
    use rsa::RsaPublicKey;

    pub const TEST_WALLET: &str = include_str!("../testdata/arweave_wallet.json");

    pub fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Check an RSA-PSS signature against a raw owner modulus
    pub fn verify(owner: &[u8], message: &[u8], signature: &[u8]) -> bool {
        let Ok(public) = RsaPublicKey::new(BigUint::from_bytes_be(owner), BigUint::from(65_537u32))
        else {
            return false;
        };
        let Ok(signature) = Signature::try_from(signature) else {
            return false;
        };
        VerifyingKey::<Sha256>::new(public)
            .verify(message, &signature)
            .is_ok()
    }
}
