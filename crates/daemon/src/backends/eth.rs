/// Ethereum JSON-RPC naming backend
///
/// Resolves `.eth` labels through the on-chain registry: namehash the
/// full name, ask the registry for its resolver contract, then ask the
/// resolver for the content hash field. Everything rides on `eth_call`
/// against a single JSON-RPC endpoint.

use async_trait::async_trait;
use onionens_common::{BackendError, BackendResult, ContentId};
use onionens_core::backend::{ContentRecord, NamingBackend};
use serde::Deserialize;
use serde_json::json;
use sha3::{Digest, Keccak256};
use std::time::Duration;
use tracing::debug;

/// ENS registry deployment shared by mainnet and the public testnets.
const REGISTRY_ADDRESS: &str = "0x00000000000C2E074eC69A0dFb2997BA6C7d2e1e";

/// `resolver(bytes32)` selector.
const SELECTOR_RESOLVER: [u8; 4] = [0x01, 0x78, 0xb8, 0xbf];
/// `contenthash(bytes32)` selector.
const SELECTOR_CONTENTHASH: [u8; 4] = [0xbc, 0x1c, 0x58, 0xd1];

/// Content-hash namespace prefix for immutable storage identifiers.
const CODEC_IMMUTABLE: [u8; 2] = [0xe3, 0x01];
/// Content-hash namespace prefix for mutable naming pointers.
const CODEC_MUTABLE: [u8; 2] = [0xe5, 0x01];

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

pub struct EthRpcNaming {
    client: reqwest::Client,
    endpoint: String,
    registry: String,
    /// Top-level domain appended to gateway labels (`eth`).
    tld: String,
}

impl EthRpcNaming {
    pub fn new(endpoint: impl Into<String>, tld: impl Into<String>) -> BackendResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(
                onionens_common::config::gateway::RPC_TIMEOUT_SECS,
            ))
            .build()
            .map_err(|e| BackendError::unavailable(format!("RPC client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            registry: REGISTRY_ADDRESS.to_string(),
            tld: tld.into(),
        })
    }

    /// Hierarchical name hash: fold each label's digest into the
    /// parent's, right to left, starting from the zero node.
    fn namehash(name: &str) -> [u8; 32] {
        let mut node = [0u8; 32];
        for label in name.rsplit('.').filter(|l| !l.is_empty()) {
            let label_hash: [u8; 32] = Keccak256::digest(label.as_bytes()).into();
            let mut hasher = Keccak256::new();
            hasher.update(node);
            hasher.update(label_hash);
            node = hasher.finalize().into();
        }
        node
    }

    async fn eth_call(&self, to: &str, data: &[u8]) -> BackendResult<Vec<u8>> {
        let params = json!([
            { "to": to, "data": format!("0x{}", hex::encode(data)) },
            "latest"
        ]);

        let response: RpcResponse = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "jsonrpc": "2.0",
                "method": "eth_call",
                "params": params,
                "id": 1,
            }))
            .send()
            .await
            .map_err(|e| BackendError::unavailable(format!("RPC endpoint: {}", e)))?
            .json()
            .await
            .map_err(|e| BackendError::malformed(format!("RPC response: {}", e)))?;

        if let Some(error) = response.error {
            return Err(BackendError::rejected(format!(
                "RPC error {}: {}",
                error.code, error.message
            )));
        }

        let result = response
            .result
            .ok_or_else(|| BackendError::malformed("RPC response missing result"))?;
        hex::decode(result.trim_start_matches("0x"))
            .map_err(|e| BackendError::malformed(format!("RPC result hex: {}", e)))
    }

    /// Resolver contract address for a name node, if one is registered.
    async fn resolver_address(&self, node: &[u8; 32]) -> BackendResult<Option<String>> {
        let mut data = SELECTOR_RESOLVER.to_vec();
        data.extend_from_slice(node);

        let word = self.eth_call(&self.registry, &data).await?;
        if word.len() < 32 || word[12..32].iter().all(|b| *b == 0) {
            return Ok(None);
        }
        Ok(Some(format!("0x{}", hex::encode(&word[12..32]))))
    }

    /// Content hash bytes stored on the resolver, if any.
    async fn contenthash(&self, resolver: &str, node: &[u8; 32]) -> BackendResult<Option<Vec<u8>>> {
        let mut data = SELECTOR_CONTENTHASH.to_vec();
        data.extend_from_slice(node);

        let word = self.eth_call(resolver, &data).await?;
        Ok(Self::decode_dynamic_bytes(&word))
    }

    /// ABI dynamic `bytes` return value: offset word, length word, data.
    fn decode_dynamic_bytes(word: &[u8]) -> Option<Vec<u8>> {
        if word.len() < 64 {
            return None;
        }
        let offset = usize::try_from(u64::from_be_bytes(word[24..32].try_into().ok()?)).ok()?;
        let length_start = offset.checked_add(32)?;
        if word.len() < length_start {
            return None;
        }
        let length = usize::try_from(u64::from_be_bytes(
            word[length_start - 8..length_start].try_into().ok()?,
        ))
        .ok()?;
        if length == 0 {
            return None;
        }
        let data_end = length_start.checked_add(length)?;
        if word.len() < data_end {
            return None;
        }
        Some(word[length_start..data_end].to_vec())
    }

    /// Map content-hash bytes onto a naming record.
    fn record_from_contenthash(hash: &[u8]) -> BackendResult<ContentRecord> {
        if let Some(cid_bytes) = hash.strip_prefix(&CODEC_IMMUTABLE) {
            let id = ContentId::from_cid_bytes(cid_bytes)
                .map_err(|e| BackendError::malformed(format!("content hash: {}", e)))?;
            return Ok(ContentRecord::Immutable(id.as_str().as_bytes().to_vec()));
        }

        if let Some(pointer) = hash.strip_prefix(&CODEC_MUTABLE) {
            return Ok(ContentRecord::Pointer(pointer.to_vec()));
        }

        // Some other namespace (swarm, arweave): the name is
        // registered, just not servable here.
        Ok(ContentRecord::Unrecognized)
    }
}

#[async_trait]
impl NamingBackend for EthRpcNaming {
    async fn content_record(&self, label: &str) -> BackendResult<Option<ContentRecord>> {
        let name = format!("{}.{}", label, self.tld);
        let node = Self::namehash(&name);

        let resolver = match self.resolver_address(&node).await? {
            Some(address) => address,
            None => {
                debug!("no resolver registered for {}", name);
                return Ok(None);
            }
        };

        let hash = match self.contenthash(&resolver, &node).await? {
            Some(hash) => hash,
            None => {
                debug!("no content hash set for {}", name);
                return Ok(None);
            }
        };

        Self::record_from_contenthash(&hash).map(Some)
    }
}
