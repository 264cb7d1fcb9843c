//! Capability-based (w3up) storage client
//!
//! Uploads are scoped to a *space*. The gateway acts as an agent holding an
//! ed25519 signing key, and proves it may write to the space with a UCAN
//! delegation chain shipped as a base64-encoded CAR archive.
//!
//! An upload packs the content into a UnixFS DAG inside a CAR shard, then
//! invokes `store/add` for the shard (PUTting it to the presigned URL the
//! service hands back) and `upload/add` to register the DAG root.

use crate::car::{CarArchive, CarBlock, write_car};
use crate::cid_utils::{CAR_CODEC, block_cid};
use crate::http::Transport;
use crate::types::UploadResult;
use crate::ucan::{AgentSigner, Capability, Invocation, field, principal_bytes, read_receipt, request_car};
use crate::unixfs::build_file;
use crate::{Result, StorageError, Uploader};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use cid::Cid;
use ipld_core::ipld::Ipld;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Service DID invocations are addressed to by default
pub const DEFAULT_SERVICE_DID: &str = "did:web:web3.storage";

/// Media type of ucanto requests and responses
const CAR_MIME: &str = "application/vnd.ipld.car";

/// Lifetime of an invocation, in seconds
const INVOCATION_TTL: i64 = 300;

/// Maximum nesting searched for the capability list of a delegation
const MAX_DELEGATION_DEPTH: usize = 4;

/// Configuration for a w3up service connection
#[derive(Clone, Debug)]
pub struct W3upConfig {
    /// Upload service URL (e.g., "https://up.web3.storage")
    pub url: String,
    /// DID of the upload service, the audience of every invocation
    pub service_did: String,
    /// Gateway base URL used to build content URIs
    pub gateway: String,
    /// Request timeout
    pub timeout: Duration,
}

impl W3upConfig {
    pub fn new(url: impl Into<String>, gateway: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            service_did: DEFAULT_SERVICE_DID.to_string(),
            gateway: gateway.into(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Address invocations to a different service
    pub fn with_service_did(mut self, did: impl Into<String>) -> Self {
        self.service_did = did.into();
        self
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// An imported delegation granting the agent access to a space
#[derive(Clone)]
pub struct Delegation {
    /// CID of the root delegation block
    pub root: Cid,
    /// DID of the space the delegation grants access to
    pub space: String,
    /// Expiry as unix seconds, `None` if the delegation never expires
    pub expiration: Option<i64>,
    /// The proof chain, attached to every invocation
    pub blocks: Vec<CarBlock>,
}

impl Delegation {
    /// Import a base64-encoded CAR delegation
    pub fn import(proof: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(proof.trim())
            .map_err(|e| StorageError::InvalidProof(format!("proof is not base64: {}", e)))?;

        let archive = CarArchive::from_bytes(&bytes).map_err(into_proof_error)?;
        let root = archive.roots[0];
        let ucan = archive.root_ipld().map_err(into_proof_error)?;

        let capabilities = find_field(&ucan, "att", MAX_DELEGATION_DEPTH)
            .and_then(|att| match att {
                Ipld::List(caps) => Some(caps),
                _ => None,
            })
            .ok_or_else(|| StorageError::InvalidProof("delegation has no capabilities".to_string()))?;

        let space = capabilities
            .iter()
            .find_map(|cap| match field(cap, "with") {
                Some(Ipld::String(with)) if with.starts_with("did:") => Some(with.clone()),
                _ => None,
            })
            .ok_or_else(|| StorageError::InvalidProof("delegation names no space".to_string()))?;

        let expiration = match find_field(&ucan, "exp", MAX_DELEGATION_DEPTH) {
            Some(Ipld::Integer(exp)) => i64::try_from(*exp).ok(),
            _ => None,
        };

        Ok(Self {
            root,
            space,
            expiration,
            blocks: archive.blocks,
        })
    }

    /// Whether the delegation has expired at `now` (unix seconds)
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expiration.is_some_and(|exp| exp <= now)
    }

    /// Whether the delegation has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(chrono::Utc::now().timestamp())
    }

    /// Expiry for an invocation issued at `now`, never past the delegation's own
    fn invocation_expiry(&self, now: i64) -> i64 {
        let exp = now + INVOCATION_TTL;
        self.expiration.map_or(exp, |limit| exp.min(limit))
    }
}

impl std::fmt::Debug for Delegation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delegation")
            .field("root", &self.root)
            .field("space", &self.space)
            .field("expiration", &self.expiration)
            .field("blocks", &self.blocks.len())
            .finish()
    }
}

fn into_proof_error(err: StorageError) -> StorageError {
    match err {
        StorageError::InvalidArchive(reason) => StorageError::InvalidProof(reason),
        other => other,
    }
}

/// Depth-limited search for a map field, looking through nested
/// envelopes (`ucan/*` payload keys, signature wrappers)
fn find_field<'a>(ipld: &'a Ipld, name: &str, depth: usize) -> Option<&'a Ipld> {
    match ipld {
        Ipld::Map(map) => map.get(name).or_else(|| {
            if depth == 0 {
                return None;
            }
            map.values().find_map(|value| find_field(value, name, depth - 1))
        }),
        Ipld::List(items) if depth > 0 => {
            items.iter().find_map(|item| find_field(item, name, depth - 1))
        }
        _ => None,
    }
}

/// w3up client
pub struct W3upClient {
    http: Transport,
    config: W3upConfig,
    signer: AgentSigner,
    delegation: Delegation,
}

impl W3upClient {
    /// Create a client from a config, an agent key and a delegation proof
    pub fn new(config: W3upConfig, key: &str, proof: &str) -> Result<Self> {
        url::Url::parse(&config.url).map_err(|e| {
            StorageError::Configuration(format!("invalid w3up url {}: {}", config.url, e))
        })?;
        principal_bytes(&config.service_did)?;

        let signer = AgentSigner::parse(key)?;
        let delegation = Delegation::import(proof)?;

        if delegation.is_expired() {
            warn!(
                space = %delegation.space,
                expiration = ?delegation.expiration,
                "Delegation has expired, uploads will be rejected"
            );
        }

        Ok(Self {
            http: Transport::new(config.timeout)?,
            config,
            signer,
            delegation,
        })
    }

    /// Agent identity
    pub fn agent(&self) -> &str {
        self.signer.did()
    }

    /// Space uploads are written to
    pub fn space(&self) -> &str {
        &self.delegation.space
    }

    /// Invoke `capability` on the service and return the receipt's `ok` value
    async fn invoke(&self, capability: Capability) -> Result<Ipld> {
        let ability = capability.can.clone();
        let now = chrono::Utc::now().timestamp();
        let invocation = Invocation {
            issuer: self.signer.did().to_string(),
            audience: self.config.service_did.clone(),
            capability,
            expiration: Some(self.delegation.invocation_expiry(now)),
            proofs: vec![self.delegation.root],
        }
        .sign(&self.signer)?;

        let request = self
            .http
            .client()
            .post(&self.config.url)
            .header(CONTENT_TYPE, CAR_MIME)
            .header(ACCEPT, CAR_MIME)
            .body(request_car(&invocation, &self.delegation.blocks)?);
        let response = self
            .http
            .send(request, &format!("{} failed", ability))
            .await?;
        let body = self.http.bytes(response).await?;

        let out = read_receipt(&body, &invocation.cid, &ability)?;
        debug!(ability = %ability, invocation = %invocation.cid, "Invocation succeeded");
        Ok(out)
    }

    /// PUT a shard to the presigned target a `store/add` receipt names
    async fn put_shard(&self, target: &Ipld, shard: Bytes) -> Result<()> {
        let Some(Ipld::String(url)) = field(target, "url") else {
            return Err(StorageError::Deserialization(
                "store/add receipt has no upload url".to_string(),
            ));
        };

        let mut request = self.http.client().put(url.as_str());
        if let Some(Ipld::Map(headers)) = field(target, "headers") {
            for (name, value) in headers {
                // reqwest sets the length from the body
                if name.eq_ignore_ascii_case(CONTENT_LENGTH.as_str()) {
                    continue;
                }
                if let Ipld::String(value) = value {
                    request = request.header(name.as_str(), value.as_str());
                }
            }
        }

        self.http
            .send(request.body(shard), "shard upload rejected")
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for W3upClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("W3upClient")
            .field("config", &self.config)
            .field("signer", &self.signer)
            .field("delegation", &self.delegation)
            .finish()
    }
}

#[async_trait]
impl Uploader for W3upClient {
    fn backend(&self) -> &'static str {
        "w3up"
    }

    #[instrument(skip(self, data), fields(size = data.len(), space = %self.delegation.space))]
    async fn upload(&self, data: Bytes, content_type: &str) -> Result<UploadResult> {
        let dag = build_file(&data)?;
        let shard = Bytes::from(write_car(&[dag.root], &dag.blocks)?);
        let shard_cid = block_cid(CAR_CODEC, &shard)?;

        let stored = self
            .invoke(
                Capability::new("store/add", &self.delegation.space)
                    .with_caveat("link", Ipld::Link(shard_cid))
                    .with_caveat("size", Ipld::Integer(shard.len() as i128)),
            )
            .await?;

        match field(&stored, "status") {
            Some(Ipld::String(status)) if status == "upload" => {
                self.put_shard(&stored, shard).await?;
            }
            Some(Ipld::String(status)) if status == "done" => {
                debug!(shard = %shard_cid, "Shard already stored");
            }
            other => {
                return Err(StorageError::Deserialization(format!(
                    "unexpected store/add status {:?}",
                    other
                )));
            }
        }

        self.invoke(
            Capability::new("upload/add", &self.delegation.space)
                .with_caveat("root", Ipld::Link(dag.root))
                .with_caveat("shards", Ipld::List(vec![Ipld::Link(shard_cid)])),
        )
        .await?;

        info!(root = %dag.root, shard = %shard_cid, blocks = dag.blocks.len(), "Upload registered");
        Ok(UploadResult::new(&self.config.gateway, dag.root.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cid_utils::raw_cid;
    use crate::ucan::testing::{encode_key, executed, map, response_car};
    use ed25519_dalek::{Signature, SigningKey, Verifier};
    use std::collections::BTreeMap;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    const SPACE: &str = "did:key:z6MkjK5CZw1bF3Lw8xNCDWc6s3cYBw1Ef9K1VqDTpHcuxbGw";
    const AGENT_SECRET: [u8; 32] = [9u8; 32];

    fn capability(with: &str, can: &str) -> Ipld {
        map([
            ("with", Ipld::String(with.to_string())),
            ("can", Ipld::String(can.to_string())),
        ])
    }

    fn encode_proof(payload: Ipld) -> String {
        let block = CarBlock::dag_cbor(&payload).unwrap();
        STANDARD.encode(write_car(&[block.cid], [&block]).unwrap())
    }

    fn flat_delegation(exp: Option<i64>) -> String {
        encode_proof(map([
            ("v", Ipld::String("0.9.1".to_string())),
            (
                "att",
                Ipld::List(vec![
                    capability(SPACE, "store/*"),
                    capability(SPACE, "upload/*"),
                ]),
            ),
            ("exp", exp.map_or(Ipld::Null, |e| Ipld::Integer(e.into()))),
        ]))
    }

    fn client(server: &MockServer) -> W3upClient {
        let config = W3upConfig::new(server.uri(), "https://w3s.link/ipfs");
        W3upClient::new(config, &encode_key(AGENT_SECRET), &flat_delegation(None)).unwrap()
    }

    /// Answer every invocation with `out(ability)`
    async fn mount_service(server: &MockServer, out: impl Fn(&str) -> Ipld + Send + Sync + 'static) {
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("content-type", CAR_MIME))
            .and(header("accept", CAR_MIME))
            .respond_with(move |request: &Request| {
                let (_, invocations) = executed(&request.body);
                let (cid, token) = &invocations[0];
                let Some(Ipld::List(att)) = field(token, "att") else {
                    return ResponseTemplate::new(400);
                };
                let Some(Ipld::String(can)) = field(&att[0], "can") else {
                    return ResponseTemplate::new(400);
                };
                ResponseTemplate::new(200)
                    .insert_header("content-type", CAR_MIME)
                    .set_body_bytes(response_car(cid, out(can)))
            })
            .mount(server)
            .await;
    }

    fn ok(value: Ipld) -> Ipld {
        map([("ok", value)])
    }

    /// Check the token was signed by the agent and return the capability
    fn verified_capability(token: &Ipld, agent: &str) -> Capability {
        assert_eq!(
            field(token, "iss"),
            Some(&Ipld::Bytes(principal_bytes(agent).unwrap()))
        );
        assert_eq!(
            field(token, "aud"),
            Some(&Ipld::Bytes(principal_bytes(DEFAULT_SERVICE_DID).unwrap()))
        );

        let Some(Ipld::List(att)) = field(token, "att") else {
            panic!("token has no capabilities");
        };
        let text = |name: &str| match field(&att[0], name) {
            Some(Ipld::String(s)) => s.clone(),
            other => panic!("capability {name} is {other:?}"),
        };
        let nb = match field(&att[0], "nb") {
            Some(Ipld::Map(nb)) => nb.clone(),
            _ => BTreeMap::new(),
        };
        let capability = Capability {
            can: text("can"),
            with: text("with"),
            nb,
        };

        let Some(Ipld::Integer(exp)) = field(token, "exp") else {
            panic!("invocation never expires");
        };
        let Some(Ipld::List(prf)) = field(token, "prf") else {
            panic!("token has no proofs");
        };
        let proofs = prf
            .iter()
            .map(|p| match p {
                Ipld::Link(cid) => *cid,
                other => panic!("proof is not a link: {other:?}"),
            })
            .collect();

        let unsigned = Invocation {
            issuer: agent.to_string(),
            audience: DEFAULT_SERVICE_DID.to_string(),
            capability: capability.clone(),
            expiration: Some(*exp as i64),
            proofs,
        };
        let Some(Ipld::Bytes(s)) = field(token, "s") else {
            panic!("token is unsigned");
        };
        let signature = Signature::from_slice(&s[4..]).unwrap();
        assert!(SigningKey::from_bytes(&AGENT_SECRET)
            .verifying_key()
            .verify(unsigned.signing_payload().unwrap().as_bytes(), &signature)
            .is_ok());

        capability
    }

    #[test]
    fn test_import_flat_delegation() {
        let delegation = Delegation::import(&flat_delegation(Some(4_102_444_800))).unwrap();
        assert_eq!(delegation.space, SPACE);
        assert_eq!(delegation.expiration, Some(4_102_444_800));
        assert_eq!(delegation.blocks.len(), 1);
        assert_eq!(delegation.blocks[0].cid, delegation.root);
        assert!(!delegation.is_expired_at(1_700_000_000));
        assert!(delegation.is_expired_at(4_102_444_800));
    }

    #[test]
    fn test_import_enveloped_delegation() {
        // UCAN 1.0 style: [signature, {"h": header, "ucan/dlg@1.0.0-rc.1": payload}]
        let payload = map([("att", Ipld::List(vec![capability(SPACE, "upload/add")]))]);
        let signed = map([
            ("h", Ipld::Bytes(vec![0x34, 0xed])),
            ("ucan/dlg@1.0.0-rc.1", payload),
        ]);
        let envelope = Ipld::List(vec![Ipld::Bytes(vec![0u8; 64]), signed]);

        let delegation = Delegation::import(&encode_proof(envelope)).unwrap();
        assert_eq!(delegation.space, SPACE);
        assert_eq!(delegation.expiration, None);
        assert!(!delegation.is_expired());
    }

    #[rstest::rstest]
    #[case::no_space(encode_proof(map([("att", Ipld::List(vec![capability("https://example.com", "upload/add")]))])))]
    #[case::not_a_ucan(encode_proof(Ipld::Integer(1)))]
    #[case::not_base64("%%% not base64".to_string())]
    #[case::not_a_car(STANDARD.encode(b"not a car"))]
    fn test_invalid_delegation(#[case] proof: String) {
        assert!(matches!(
            Delegation::import(&proof),
            Err(StorageError::InvalidProof(_))
        ));
    }

    #[test]
    fn test_invocation_expiry_capped_by_delegation() {
        let delegation = Delegation::import(&flat_delegation(Some(1_000_100))).unwrap();
        assert_eq!(delegation.invocation_expiry(1_000_000), 1_000_100);
        assert_eq!(delegation.invocation_expiry(900_000), 900_300);

        let open = Delegation::import(&flat_delegation(None)).unwrap();
        assert_eq!(open.invocation_expiry(1_000_000), 1_000_300);
    }

    #[rstest::rstest]
    #[case::bad_url(W3upConfig::new("not a url", "https://w3s.link/ipfs"))]
    #[case::bad_service_did(
        W3upConfig::new("https://up.web3.storage", "https://w3s.link/ipfs").with_service_did("web3.storage")
    )]
    fn test_invalid_config(#[case] config: W3upConfig) {
        assert!(matches!(
            W3upClient::new(config, &encode_key(AGENT_SECRET), &flat_delegation(None)),
            Err(StorageError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_upload_stores_shard_then_registers_root() {
        let server = MockServer::start().await;
        let client = client(&server);
        let shard_url = format!("{}/shard", server.uri());

        mount_service(&server, move |can| match can {
            "store/add" => ok(map([
                ("status", Ipld::String("upload".to_string())),
                ("url", Ipld::String(shard_url.clone())),
                (
                    "headers",
                    map([
                        ("content-length", Ipld::String("1".to_string())),
                        ("x-amz-checksum-sha256", Ipld::String("c2hhcmQ=".to_string())),
                    ]),
                ),
            ])),
            _ => ok(Ipld::Map(BTreeMap::new())),
        })
        .await;

        Mock::given(method("PUT"))
            .and(path("/shard"))
            .and(header("x-amz-checksum-sha256", "c2hhcmQ="))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let result = client
            .upload(Bytes::from_static(b"hello"), "text/plain")
            .await
            .unwrap();

        let root = raw_cid(b"hello").unwrap();
        assert_eq!(result.cid, root.to_string());
        assert_eq!(result.uri, format!("https://w3s.link/ipfs/{}", root));

        let requests = server.received_requests().await.unwrap();
        let shard = requests.iter().find(|r| r.method.as_str() == "PUT").unwrap();
        let shard_cid = block_cid(CAR_CODEC, &shard.body).unwrap();
        let car = CarArchive::from_bytes(&shard.body).unwrap();
        assert_eq!(car.roots, vec![root]);

        let invocations: Vec<_> = requests
            .iter()
            .filter(|r| r.method.as_str() == "POST")
            .map(|r| {
                let (archive, mut executed) = executed(&r.body);
                assert!(archive.get(&client.delegation.root).is_some());
                executed.remove(0).1
            })
            .collect();
        assert_eq!(invocations.len(), 2);

        let store = verified_capability(&invocations[0], client.agent());
        assert_eq!(store.can, "store/add");
        assert_eq!(store.with, SPACE);
        assert_eq!(store.nb.get("link"), Some(&Ipld::Link(shard_cid)));
        assert_eq!(
            store.nb.get("size"),
            Some(&Ipld::Integer(shard.body.len() as i128))
        );

        let upload = verified_capability(&invocations[1], client.agent());
        assert_eq!(upload.can, "upload/add");
        assert_eq!(upload.nb.get("root"), Some(&Ipld::Link(root)));
        assert_eq!(
            upload.nb.get("shards"),
            Some(&Ipld::List(vec![Ipld::Link(shard_cid)]))
        );

        let Some(Ipld::List(prf)) = field(&invocations[0], "prf") else {
            panic!("invocation has no proofs");
        };
        assert_eq!(prf, &vec![Ipld::Link(client.delegation.root)]);
    }

    #[tokio::test]
    async fn test_upload_skips_stored_shard() {
        let server = MockServer::start().await;
        let client = client(&server);

        mount_service(&server, |can| match can {
            "store/add" => ok(map([("status", Ipld::String("done".to_string()))])),
            _ => ok(Ipld::Map(BTreeMap::new())),
        })
        .await;

        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let result = client
            .upload(Bytes::from_static(b"again"), "text/plain")
            .await
            .unwrap();
        assert_eq!(result.cid, raw_cid(b"again").unwrap().to_string());
    }

    #[tokio::test]
    async fn test_upload_rejected_by_receipt() {
        let server = MockServer::start().await;
        let client = client(&server);

        mount_service(&server, |_| {
            map([(
                "error",
                map([
                    ("name", Ipld::String("Unauthorized".to_string())),
                    ("message", Ipld::String("space not provisioned".to_string())),
                ]),
            )])
        })
        .await;

        let err = client
            .upload(Bytes::from_static(b"hello"), "text/plain")
            .await
            .unwrap_err();

        match err {
            StorageError::Rejected { ability, message } => {
                assert_eq!(ability, "store/add");
                assert_eq!(message, "space not provisioned");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_upload_service_error() {
        let server = MockServer::start().await;
        let client = client(&server);

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = client
            .upload(Bytes::from_static(b"hello"), "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Backend { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_upload_timeout_reports_configured_limit() {
        let server = MockServer::start().await;
        let config = W3upConfig::new(server.uri(), "https://w3s.link/ipfs")
            .with_timeout(Duration::from_secs(1));
        let client =
            W3upClient::new(config, &encode_key(AGENT_SECRET), &flat_delegation(None)).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let err = client
            .upload(Bytes::from_static(b"hello"), "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Timeout { seconds: 1 }));
    }

    #[tokio::test]
    async fn test_funding_unsupported() {
        let config = W3upConfig::new("https://up.web3.storage", "https://w3s.link/ipfs");
        let client =
            W3upClient::new(config, &encode_key(AGENT_SECRET), &flat_delegation(None)).unwrap();

        assert!(matches!(
            client.fund(1024).await,
            Err(StorageError::FundingUnsupported("w3up"))
        ));
    }
}
