//! UCAN invocations and ucanto transport messages
//!
//! An invocation is a UCAN 0.9 token in its dag-cbor form. It is signed
//! over the JWT rendering of the same token,
//! `base64url(header).base64url(payload)`, where both halves are dag-json.
//!
//! Invocations travel to the service inside a CAR whose root is a
//! `ucanto/message@7.0.0` block listing them under `execute`. The service
//! answers with a CAR whose root lists a receipt per invocation under
//! `report`.

use crate::car::{CarArchive, CarBlock};
use crate::{Result, StorageError};
use base64::{
    Engine as _,
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE_NO_PAD},
};
use cid::Cid;
use ed25519_dalek::{Signer, SigningKey};
use ipld_core::ipld::Ipld;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// UCAN version invocations are issued with
pub const UCAN_VERSION: &str = "0.9.1";

/// Root key of a ucanto transport message
pub const MESSAGE_TAG: &str = "ucanto/message@7.0.0";

/// Multicodec varint prefix of an ed25519 private key (0x1300)
pub(crate) const ED25519_PRIVATE_PREFIX: [u8; 2] = [0x80, 0x26];

/// Multicodec varint prefix of an ed25519 public key (0xed)
pub(crate) const ED25519_PUBLIC_PREFIX: [u8; 2] = [0xed, 0x01];

/// Varint prefix of a non-key DID (0x0d1d), followed by the UTF-8 text
/// after `did:`
const DID_CORE_PREFIX: [u8; 2] = [0x9d, 0x1a];

/// Varint signature prefix: EdDSA (0xd0ed) and a 64-byte length
const EDDSA_SIGNATURE_PREFIX: [u8; 4] = [0xed, 0xa1, 0x03, 0x40];

/// The agent principal: an ed25519 signing key and its `did:key`
pub struct AgentSigner {
    key: SigningKey,
    did: String,
}

impl AgentSigner {
    /// Parse a multibase (`M`, base64pad) encoded ed25519 private key
    ///
    /// The decoded bytes are `varint(0x1300) | secret | varint(0xed) | public`.
    pub fn parse(encoded: &str) -> Result<Self> {
        let encoded = encoded.trim();
        let payload = encoded
            .strip_prefix('M')
            .ok_or_else(|| StorageError::InvalidKey("expected multibase base64pad key".to_string()))?;

        let bytes = STANDARD
            .decode(payload)
            .or_else(|_| STANDARD_NO_PAD.decode(payload))
            .map_err(|e| StorageError::InvalidKey(format!("key is not base64: {}", e)))?;

        if bytes.len() != 68
            || bytes[..2] != ED25519_PRIVATE_PREFIX
            || bytes[34..36] != ED25519_PUBLIC_PREFIX
        {
            return Err(StorageError::InvalidKey(
                "key is not a tagged ed25519 keypair".to_string(),
            ));
        }

        let mut secret = [0u8; 32];
        secret.copy_from_slice(&bytes[2..34]);
        let key = SigningKey::from_bytes(&secret);

        if key.verifying_key().as_bytes()[..] != bytes[36..68] {
            return Err(StorageError::InvalidKey(
                "public key does not match private key".to_string(),
            ));
        }

        let did = did_key(key.verifying_key().as_bytes());
        Ok(Self { key, did })
    }

    /// The agent's `did:key`
    pub fn did(&self) -> &str {
        &self.did
    }

    /// Sign a message with the agent key
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.key.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for AgentSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSigner").field("did", &self.did).finish()
    }
}

/// `did:key` for an ed25519 public key
pub fn did_key(public: &[u8; 32]) -> String {
    let mut tagged = Vec::with_capacity(34);
    tagged.extend_from_slice(&ED25519_PUBLIC_PREFIX);
    tagged.extend_from_slice(public);
    format!("did:key:z{}", bs58::encode(tagged).into_string())
}

/// Binary form of a DID as it appears in `iss` and `aud`
pub fn principal_bytes(did: &str) -> Result<Vec<u8>> {
    if let Some(key) = did.strip_prefix("did:key:") {
        let encoded = key.strip_prefix('z').ok_or_else(|| {
            StorageError::Configuration(format!("{} is not base58btc encoded", did))
        })?;
        return bs58::decode(encoded)
            .into_vec()
            .map_err(|e| StorageError::Configuration(format!("invalid did:key {}: {}", did, e)));
    }

    let method = did
        .strip_prefix("did:")
        .filter(|rest| !rest.is_empty())
        .ok_or_else(|| StorageError::Configuration(format!("{} is not a DID", did)))?;
    let mut bytes = DID_CORE_PREFIX.to_vec();
    bytes.extend_from_slice(method.as_bytes());
    Ok(bytes)
}

/// An ability exercised on a resource
#[derive(Clone, Debug, PartialEq)]
pub struct Capability {
    pub can: String,
    pub with: String,
    pub nb: BTreeMap<String, Ipld>,
}

impl Capability {
    pub fn new(can: impl Into<String>, with: impl Into<String>) -> Self {
        Self {
            can: can.into(),
            with: with.into(),
            nb: BTreeMap::new(),
        }
    }

    /// Add a caveat
    pub fn with_caveat(mut self, name: impl Into<String>, value: Ipld) -> Self {
        self.nb.insert(name.into(), value);
        self
    }

    fn to_ipld(&self) -> Ipld {
        let mut map = BTreeMap::new();
        map.insert("can".to_string(), Ipld::String(self.can.clone()));
        map.insert("with".to_string(), Ipld::String(self.with.clone()));
        if !self.nb.is_empty() {
            map.insert("nb".to_string(), Ipld::Map(self.nb.clone()));
        }
        Ipld::Map(map)
    }
}

/// An unsigned invocation of a single capability
#[derive(Clone, Debug)]
pub struct Invocation {
    pub issuer: String,
    pub audience: String,
    pub capability: Capability,
    /// Unix seconds, `None` for no expiry
    pub expiration: Option<i64>,
    pub proofs: Vec<Cid>,
}

impl Invocation {
    /// The JWT form of the token that the signature covers
    pub fn signing_payload(&self) -> Result<String> {
        let header = json!({"alg": "EdDSA", "typ": "JWT", "ucv": UCAN_VERSION});
        let payload = json!({
            "iss": self.issuer,
            "aud": self.audience,
            "att": [to_dag_json(&self.capability.to_ipld())?],
            "exp": self.expiration,
            "prf": self.proofs.iter().map(Cid::to_string).collect::<Vec<_>>(),
        });

        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload)?)
        ))
    }

    /// Sign with `signer` and encode as a dag-cbor block
    pub fn sign(&self, signer: &AgentSigner) -> Result<CarBlock> {
        if signer.did() != self.issuer {
            return Err(StorageError::Configuration(format!(
                "{} cannot sign for {}",
                signer.did(),
                self.issuer
            )));
        }

        let mut signature = EDDSA_SIGNATURE_PREFIX.to_vec();
        signature.extend_from_slice(&signer.sign(self.signing_payload()?.as_bytes()));

        let mut token = BTreeMap::new();
        token.insert("v".to_string(), Ipld::String(UCAN_VERSION.to_string()));
        token.insert("iss".to_string(), Ipld::Bytes(principal_bytes(&self.issuer)?));
        token.insert("aud".to_string(), Ipld::Bytes(principal_bytes(&self.audience)?));
        token.insert("att".to_string(), Ipld::List(vec![self.capability.to_ipld()]));
        token.insert(
            "exp".to_string(),
            self.expiration
                .map_or(Ipld::Null, |exp| Ipld::Integer(exp.into())),
        );
        token.insert(
            "prf".to_string(),
            Ipld::List(self.proofs.iter().map(|cid| Ipld::Link(*cid)).collect()),
        );
        token.insert("s".to_string(), Ipld::Bytes(signature));

        CarBlock::dag_cbor(&Ipld::Map(token))
    }
}

/// Render IPLD as dag-json
///
/// serde_json keeps object keys sorted, which is the dag-json key order.
fn to_dag_json(ipld: &Ipld) -> Result<Value> {
    Ok(match ipld {
        Ipld::Null => Value::Null,
        Ipld::Bool(b) => Value::Bool(*b),
        Ipld::Integer(i) => {
            let number: serde_json::Number = i64::try_from(*i)
                .map(Into::into)
                .or_else(|_| u64::try_from(*i).map(Into::into))
                .map_err(|_| StorageError::InvalidData(format!("integer {} out of range", i)))?;
            Value::Number(number)
        }
        Ipld::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .ok_or_else(|| StorageError::InvalidData(format!("{} has no dag-json form", f)))?,
        Ipld::String(s) => Value::String(s.clone()),
        Ipld::Bytes(bytes) => json!({"/": {"bytes": STANDARD_NO_PAD.encode(bytes)}}),
        Ipld::List(items) => Value::Array(items.iter().map(to_dag_json).collect::<Result<_>>()?),
        Ipld::Map(map) => Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), to_dag_json(v)?)))
                .collect::<Result<Map<_, _>>>()?,
        ),
        Ipld::Link(cid) => json!({"/": cid.to_string()}),
    })
}

/// Encode a transport message executing `invocation`, carrying `proofs`
/// along so the service can check the delegation chain
pub fn request_car(invocation: &CarBlock, proofs: &[CarBlock]) -> Result<Vec<u8>> {
    let mut body = BTreeMap::new();
    body.insert(
        "execute".to_string(),
        Ipld::List(vec![Ipld::Link(invocation.cid)]),
    );
    let mut message = BTreeMap::new();
    message.insert(MESSAGE_TAG.to_string(), Ipld::Map(body));
    let message = CarBlock::dag_cbor(&Ipld::Map(message))?;

    crate::car::write_car(
        &[message.cid],
        std::iter::once(invocation)
            .chain(proofs)
            .chain(std::iter::once(&message)),
    )
}

/// Find the receipt for `ran` in a response message and return its `ok`
/// value, or `StorageError::Rejected` if the service answered with an error
pub fn read_receipt(body: &[u8], ran: &Cid, ability: &str) -> Result<Ipld> {
    let archive = CarArchive::from_bytes(body)?;
    let message = archive.root_ipld()?;

    let receipt = field(&message, MESSAGE_TAG)
        .and_then(|m| field(m, "report"))
        .and_then(|report| field(report, &ran.to_string()))
        .ok_or_else(|| malformed(format!("no receipt for {}", ran)))?;
    let Ipld::Link(receipt) = receipt else {
        return Err(malformed("receipt is not a link"));
    };

    let receipt = archive.decode(receipt)?;
    let out = field(&receipt, "ocm")
        .and_then(|ocm| field(ocm, "out"))
        .ok_or_else(|| malformed("receipt has no outcome"))?;

    if let Some(ok) = field(out, "ok") {
        return Ok(ok.clone());
    }
    let error = field(out, "error").ok_or_else(|| malformed("outcome is neither ok nor error"))?;
    let message = match field(error, "message") {
        Some(Ipld::String(message)) => message.clone(),
        _ => format!("{:?}", error),
    };
    Err(StorageError::Rejected {
        ability: ability.to_string(),
        message,
    })
}

/// Map field lookup
pub(crate) fn field<'a>(ipld: &'a Ipld, name: &str) -> Option<&'a Ipld> {
    match ipld {
        Ipld::Map(map) => map.get(name),
        _ => None,
    }
}

fn malformed(reason: impl Into<String>) -> StorageError {
    StorageError::Deserialization(format!("malformed ucanto response: {}", reason.into()))
}
