/// Storage daemon client over the IPFS HTTP API
///
/// All endpoints are POSTs with querystring arguments against a local
/// API socket. `fetch` streams the whole payload as a tar archive;
/// pinning endpoints guard cached entries against the daemon's garbage
/// collector.

use async_trait::async_trait;
use data_encoding::BASE32_NOPAD;
use onionens_common::{BackendError, BackendResult, ContentId};
use onionens_core::backend::StorageBackend;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct PinListResponse {
    #[serde(rename = "Keys", default)]
    keys: HashMap<String, PinEntry>,
}

#[derive(Debug, Deserialize)]
struct PinEntry {
    #[serde(rename = "Type")]
    _kind: String,
}

#[derive(Debug, Deserialize)]
struct NameResolveResponse {
    #[serde(rename = "Path")]
    path: String,
}

pub struct IpfsApiStorage {
    client: reqwest::Client,
    api_base: String,
}

impl IpfsApiStorage {
    pub fn new(api_base: impl Into<String>) -> BackendResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(
                onionens_common::config::gateway::FETCH_TIMEOUT_SECS,
            ))
            .build()
            .map_err(|e| BackendError::unavailable(format!("storage client: {}", e)))?;

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    async fn api_post(&self, path: &str, arg: &str) -> BackendResult<reqwest::Response> {
        let url = format!("{}/api/v0/{}", self.api_base, path);
        let response = self
            .client
            .post(&url)
            .query(&[("arg", arg)])
            .send()
            .await
            .map_err(|e| BackendError::unavailable(format!("storage API: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::rejected(format!(
                "storage API {} returned {}: {}",
                path, status, body
            )));
        }
        Ok(response)
    }

    /// Printable name for a mutable pointer. Pointers arrive either as
    /// text already or as raw identifier bytes needing encoding.
    fn pointer_name(pointer: &[u8]) -> String {
        match std::str::from_utf8(pointer) {
            Ok(text) if text.chars().all(|c| c.is_ascii_graphic()) => text.to_string(),
            _ => format!("b{}", BASE32_NOPAD.encode(pointer).to_lowercase()),
        }
    }
}

#[async_trait]
impl StorageBackend for IpfsApiStorage {
    async fn fetch(&self, id: &ContentId) -> BackendResult<Vec<u8>> {
        debug!("fetching {} from storage daemon", id);
        let response = self.api_post("get", id.as_str()).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| BackendError::unavailable(format!("storage API body: {}", e)))?;
        Ok(bytes.to_vec())
    }

    async fn pin(&self, id: &ContentId) -> BackendResult<()> {
        self.api_post("pin/add", id.as_str()).await?;
        Ok(())
    }

    async fn unpin(&self, id: &ContentId) -> BackendResult<()> {
        self.api_post("pin/rm", id.as_str()).await?;
        Ok(())
    }

    async fn list_pinned(&self) -> BackendResult<Vec<ContentId>> {
        let response = self.api_post("pin/ls", "").await?;
        let listing: PinListResponse = response
            .json()
            .await
            .map_err(|e| BackendError::malformed(format!("pin listing: {}", e)))?;

        // Identifiers in other encodings than ours are still retained,
        // just not addressable through this gateway.
        Ok(listing
            .keys
            .keys()
            .filter_map(|key| ContentId::parse(key).ok())
            .collect())
    }

    async fn resolve_name(&self, pointer: &[u8]) -> BackendResult<Vec<String>> {
        let name = Self::pointer_name(pointer);
        let response = self.api_post("name/resolve", &name).await?;
        let resolved: NameResolveResponse = response
            .json()
            .await
            .map_err(|e| BackendError::malformed(format!("name resolution: {}", e)))?;
        Ok(vec![resolved.path])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn textual_pointer_passes_through() {
        assert_eq!(
            IpfsApiStorage::pointer_name(b"k51qzi5uqu5dgutdk6i1"),
            "k51qzi5uqu5dgutdk6i1"
        );
    }

    #[test]
    fn binary_pointer_is_encoded() {
        let name = IpfsApiStorage::pointer_name(&[0x01, 0x72, 0x00, 0x24]);
        assert!(name.starts_with('b'));
        assert_eq!(name, name.to_lowercase());
    }

    #[test]
    fn api_base_trailing_slash_is_trimmed() {
        let storage = IpfsApiStorage::new("http://127.0.0.1:5001/").unwrap();
        assert_eq!(storage.api_base, "http://127.0.0.1:5001");
    }
}
