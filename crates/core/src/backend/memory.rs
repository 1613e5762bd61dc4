/// In-memory backend implementations
///
/// Process-local stand-ins for the four external collaborators, used by
/// the component tests here and by the daemon's router tests. Call
/// counters let tests assert idempotency and single-flight behavior.

use super::{
    CertificateAuthority, CertificateMaterial, ContentRecord, NamingBackend, OnionController,
    OnionService, StorageBackend,
};
use async_trait::async_trait;
use onionens_common::{BackendError, BackendResult, ContentId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Naming backend over a fixed record table.
#[derive(Default)]
pub struct MemoryNaming {
    records: Mutex<HashMap<String, ContentRecord>>,
    unavailable: AtomicBool,
}

impl MemoryNaming {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_immutable(&self, label: &str, id: &ContentId) {
        let record = ContentRecord::Immutable(id.as_str().as_bytes().to_vec());
        self.records.lock().await.insert(label.to_string(), record);
    }

    pub async fn insert_pointer(&self, label: &str, pointer: &[u8]) {
        let record = ContentRecord::Pointer(pointer.to_vec());
        self.records.lock().await.insert(label.to_string(), record);
    }

    pub async fn insert_raw(&self, label: &str, record: ContentRecord) {
        self.records.lock().await.insert(label.to_string(), record);
    }

    /// Make subsequent lookups fail as if the RPC endpoint were down.
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl NamingBackend for MemoryNaming {
    async fn content_record(&self, label: &str) -> BackendResult<Option<ContentRecord>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::unavailable("naming backend offline"));
        }
        Ok(self.records.lock().await.get(label).cloned())
    }
}

/// Storage backend over in-process payload and pointer tables.
#[derive(Default)]
pub struct MemoryStorage {
    payloads: Mutex<HashMap<ContentId, Vec<u8>>>,
    pointers: Mutex<HashMap<Vec<u8>, Vec<String>>>,
    pinned: Mutex<HashSet<ContentId>>,
    fetch_delay: Mutex<Duration>,
    fetch_count: AtomicUsize,
    pin_count: AtomicUsize,
    unpin_count: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_payload(&self, id: &ContentId, bytes: Vec<u8>) {
        self.payloads.lock().await.insert(id.clone(), bytes);
    }

    pub async fn insert_pointer(&self, pointer: &[u8], path: Vec<String>) {
        self.pointers.lock().await.insert(pointer.to_vec(), path);
    }

    /// Delay applied to every fetch, so tests can overlap callers.
    pub async fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().await = delay;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    pub fn pin_count(&self) -> usize {
        self.pin_count.load(Ordering::SeqCst)
    }

    pub fn unpin_count(&self) -> usize {
        self.unpin_count.load(Ordering::SeqCst)
    }

    pub async fn is_pinned(&self, id: &ContentId) -> bool {
        self.pinned.lock().await.contains(id)
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn fetch(&self, id: &ContentId) -> BackendResult<Vec<u8>> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        let delay = *self.fetch_delay.lock().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.payloads
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| BackendError::rejected(format!("unknown identifier {}", id)))
    }

    async fn pin(&self, id: &ContentId) -> BackendResult<()> {
        self.pin_count.fetch_add(1, Ordering::SeqCst);
        self.pinned.lock().await.insert(id.clone());
        Ok(())
    }

    async fn unpin(&self, id: &ContentId) -> BackendResult<()> {
        self.unpin_count.fetch_add(1, Ordering::SeqCst);
        self.pinned.lock().await.remove(id);
        Ok(())
    }

    async fn list_pinned(&self) -> BackendResult<Vec<ContentId>> {
        Ok(self.pinned.lock().await.iter().cloned().collect())
    }

    async fn resolve_name(&self, pointer: &[u8]) -> BackendResult<Vec<String>> {
        self.pointers
            .lock()
            .await
            .get(pointer)
            .cloned()
            .ok_or_else(|| BackendError::rejected("unknown naming pointer"))
    }
}

/// Onion controller keeping its service list in memory.
#[derive(Default)]
pub struct MemoryOnionController {
    services: Mutex<Vec<OnionService>>,
    create_count: AtomicUsize,
    reload_count: AtomicUsize,
    save_count: AtomicUsize,
}

impl MemoryOnionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_count(&self) -> usize {
        self.create_count.load(Ordering::SeqCst)
    }

    pub fn reload_count(&self) -> usize {
        self.reload_count.load(Ordering::SeqCst)
    }

    /// Deterministic onion hostname for a service name.
    pub fn derive_hostname(name: &str) -> String {
        let encoded = data_encoding::BASE32_NOPAD
            .encode(name.as_bytes())
            .to_lowercase();
        let short: String = encoded.chars().take(16).collect();
        format!("{}.onion", short)
    }
}

#[async_trait]
impl OnionController for MemoryOnionController {
    async fn list_services(&self) -> BackendResult<Vec<OnionService>> {
        Ok(self.services.lock().await.clone())
    }

    async fn create_service(&self, name: &str, _local_port: u16) -> BackendResult<()> {
        self.create_count.fetch_add(1, Ordering::SeqCst);
        let mut services = self.services.lock().await;
        if services.iter().any(|s| s.name == name) {
            return Ok(());
        }
        services.push(OnionService {
            name: name.to_string(),
            hostname: Self::derive_hostname(name),
        });
        Ok(())
    }

    async fn reload(&self) -> BackendResult<()> {
        self.reload_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn save(&self) -> BackendResult<()> {
        self.save_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Certificate authority issuing self-signed material on demand.
#[derive(Default)]
pub struct MemoryAuthority {
    issued: Mutex<HashMap<String, CertificateMaterial>>,
    issue_count: AtomicUsize,
    fail_issuance: AtomicBool,
    issue_delay: Mutex<Duration>,
}

impl MemoryAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue_count(&self) -> usize {
        self.issue_count.load(Ordering::SeqCst)
    }

    pub fn set_fail_issuance(&self, fail: bool) {
        self.fail_issuance.store(fail, Ordering::SeqCst);
    }

    /// Delay applied to issuance, for handshake-timeout tests.
    pub async fn set_issue_delay(&self, delay: Duration) {
        *self.issue_delay.lock().await = delay;
    }
}

#[async_trait]
impl CertificateAuthority for MemoryAuthority {
    async fn issue(&self, hostname: &str, alt_names: &[String]) -> BackendResult<()> {
        self.issue_count.fetch_add(1, Ordering::SeqCst);
        let delay = *self.issue_delay.lock().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_issuance.load(Ordering::SeqCst) {
            return Err(BackendError::rejected("issuance disabled"));
        }

        let mut issued = self.issued.lock().await;
        if issued.contains_key(hostname) {
            return Ok(());
        }

        let mut names = vec![hostname.to_string()];
        names.extend_from_slice(alt_names);
        let cert = rcgen::generate_simple_self_signed(names)
            .map_err(|e| BackendError::rejected(format!("certificate generation: {}", e)))?;

        issued.insert(
            hostname.to_string(),
            CertificateMaterial {
                cert_pem: cert.cert.pem(),
                key_pem: cert.key_pair.serialize_pem(),
            },
        );
        Ok(())
    }

    async fn get(&self, hostname: &str) -> BackendResult<Option<CertificateMaterial>> {
        Ok(self.issued.lock().await.get(hostname).cloned())
    }
}
