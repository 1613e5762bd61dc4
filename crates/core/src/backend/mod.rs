/// External-collaborator interfaces
///
/// The gateway core never talks to a blockchain node, storage daemon,
/// onion controller, or certificate authority directly; it consumes
/// these traits. The daemon crate provides the wire clients, and
/// `memory` provides in-process implementations for tests.

pub mod memory;

use async_trait::async_trait;
use onionens_common::{BackendResult, ContentId};

/// A naming record as stored by the blockchain registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentRecord {
    /// The payload encodes the content identifier's canonical string
    /// directly.
    Immutable(Vec<u8>),
    /// A mutable naming pointer, resolved through the storage backend
    /// on every request.
    Pointer(Vec<u8>),
    /// A record exists but uses a namespace this gateway cannot serve.
    /// Distinct from having no record at all.
    Unrecognized,
}

/// Blockchain-registered name lookup.
#[async_trait]
pub trait NamingBackend: Send + Sync {
    /// Fetch the content record registered for `label`, if any.
    async fn content_record(&self, label: &str) -> BackendResult<Option<ContentRecord>>;
}

/// Content-addressed storage daemon.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Fetch the full archived payload for an identifier.
    async fn fetch(&self, id: &ContentId) -> BackendResult<Vec<u8>>;

    /// Mark the payload as retained against garbage collection.
    async fn pin(&self, id: &ContentId) -> BackendResult<()>;

    /// Release a retention marker.
    async fn unpin(&self, id: &ContentId) -> BackendResult<()>;

    /// Identifiers the backend currently retains.
    async fn list_pinned(&self) -> BackendResult<Vec<ContentId>>;

    /// Resolve a mutable naming pointer to a content path.
    ///
    /// Returns the path strings the backend walked; the final one names
    /// the current immutable target (`/ipfs/<id>`).
    async fn resolve_name(&self, pointer: &[u8]) -> BackendResult<Vec<String>>;
}

/// One registered hidden service as reported by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnionService {
    /// Stable service name (a canonical content identifier string).
    pub name: String,
    /// Onion hostname the anonymity network assigned.
    pub hostname: String,
}

/// Anonymity-network controller.
#[async_trait]
pub trait OnionController: Send + Sync {
    /// Current registered services.
    async fn list_services(&self) -> BackendResult<Vec<OnionService>>;

    /// Register a new hidden service forwarding to a local port.
    async fn create_service(&self, name: &str, local_port: u16) -> BackendResult<()>;

    /// Re-read controller state that may have changed out-of-band.
    async fn reload(&self) -> BackendResult<()>;

    /// Persist controller state.
    async fn save(&self) -> BackendResult<()>;
}

/// PEM key material for one hostname.
#[derive(Debug, Clone)]
pub struct CertificateMaterial {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Certificate authority client.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Issue key material for a hostname. Idempotent: issuing for a
    /// hostname that already has material is a no-op.
    async fn issue(&self, hostname: &str, alt_names: &[String]) -> BackendResult<()>;

    /// Fetch previously issued material, if any.
    async fn get(&self, hostname: &str) -> BackendResult<Option<CertificateMaterial>>;
}
