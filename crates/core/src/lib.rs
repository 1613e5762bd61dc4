/// OnionENS Core Library
///
/// Gateway internals: name resolution, the on-disk content cache, the
/// hidden-service directory, and per-handshake TLS context selection.
/// All external collaborators are reached through the `backend` traits;
/// the daemon crate wires in the real clients.

pub mod backend;
pub mod cache;
pub mod onion;
pub mod resolver;
pub mod tls;

pub use backend::{
    CertificateAuthority, CertificateMaterial, ContentRecord, NamingBackend, OnionController,
    OnionService, StorageBackend,
};
pub use cache::{CacheEntry, CacheError, ContentCache, EntryForm};
pub use onion::{DirectoryError, HiddenServiceDirectory};
pub use resolver::{NameResolver, ResolutionError};
pub use tls::{CertificateError, CertificateStore, SelfSignedAuthority, TlsContextProvider};
