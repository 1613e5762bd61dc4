/// Name Resolver - blockchain label to content identifier
///
/// Turns a naming-system label (`example.eth`) into a canonical content
/// identifier. Immutable records decode directly; mutable pointers are
/// resolved one hop through the storage backend's naming-resolution
/// call on every request, since their target can change between
/// resolutions.

use crate::backend::{ContentRecord, NamingBackend, StorageBackend};
use onionens_common::{ContentId, ResolvedName};
use std::sync::Arc;
use tracing::debug;

/// Name resolution errors
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("no naming record for label")]
    NotFound,

    #[error("naming record is neither immutable content nor a known pointer")]
    Unsupported,

    #[error("naming backend unavailable: {0}")]
    BackendUnavailable(String),
}

/// Resolves labels against the naming backend.
///
/// No retries happen at this layer; callers treat every error as
/// terminal for the current request.
pub struct NameResolver {
    naming: Arc<dyn NamingBackend>,
    storage: Arc<dyn StorageBackend>,
}

impl NameResolver {
    pub fn new(naming: Arc<dyn NamingBackend>, storage: Arc<dyn StorageBackend>) -> Self {
        Self { naming, storage }
    }

    /// Resolve a label to the content identifier it names.
    pub async fn resolve(&self, label: &str) -> Result<ResolvedName, ResolutionError> {
        let record = self
            .naming
            .content_record(label)
            .await
            .map_err(|e| ResolutionError::BackendUnavailable(e.to_string()))?
            .ok_or(ResolutionError::NotFound)?;

        match record {
            ContentRecord::Immutable(payload) => {
                let text =
                    std::str::from_utf8(&payload).map_err(|_| ResolutionError::Unsupported)?;
                let id = ContentId::parse(text).map_err(|_| ResolutionError::Unsupported)?;

                debug!("resolved {} to immutable {}", label, id);
                Ok(ResolvedName::immutable(id))
            }
            // Mutable pointer: ask the storage backend where it
            // currently points and take the trailing
            // content-identifier segment.
            ContentRecord::Pointer(pointer) => {
                let path = self
                    .storage
                    .resolve_name(&pointer)
                    .await
                    .map_err(|e| ResolutionError::BackendUnavailable(e.to_string()))?;

                let target = path
                    .last()
                    .and_then(|segment| segment.rsplit('/').next())
                    .ok_or(ResolutionError::Unsupported)?;
                let id = ContentId::parse(target).map_err(|_| ResolutionError::Unsupported)?;

                debug!("resolved {} through pointer to {}", label, id);
                Ok(ResolvedName::mutable(id))
            }
            // Registered, but not something this gateway can serve.
            ContentRecord::Unrecognized => Err(ResolutionError::Unsupported),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryNaming, MemoryStorage};
    use crate::backend::ContentRecord;
    use onionens_common::ContentKind;

    fn test_id(seed: u8) -> ContentId {
        let mut mh = vec![0x12, 0x20];
        mh.extend_from_slice(&[seed; 32]);
        ContentId::from_cid_bytes(&mh).unwrap()
    }

    fn resolver(naming: Arc<MemoryNaming>, storage: Arc<MemoryStorage>) -> NameResolver {
        NameResolver::new(naming, storage)
    }

    #[tokio::test]
    async fn unknown_label_is_not_found() {
        let resolver = resolver(Arc::new(MemoryNaming::new()), Arc::new(MemoryStorage::new()));
        let err = resolver.resolve("missing.eth").await.unwrap_err();
        assert!(matches!(err, ResolutionError::NotFound));
    }

    #[tokio::test]
    async fn immutable_record_resolves_directly() {
        let naming = Arc::new(MemoryNaming::new());
        let id = test_id(1);
        naming.insert_immutable("example.eth", &id).await;

        let resolver = resolver(naming, Arc::new(MemoryStorage::new()));
        let resolved = resolver.resolve("example.eth").await.unwrap();

        assert_eq!(resolved.id, id);
        assert_eq!(resolved.kind, ContentKind::Immutable);
    }

    #[tokio::test]
    async fn resolution_is_idempotent() {
        let naming = Arc::new(MemoryNaming::new());
        let id = test_id(2);
        naming.insert_immutable("example.eth", &id).await;

        let resolver = resolver(naming, Arc::new(MemoryStorage::new()));
        let first = resolver.resolve("example.eth").await.unwrap();
        let second = resolver.resolve("example.eth").await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn mutable_pointer_resolves_through_storage() {
        let naming = Arc::new(MemoryNaming::new());
        let storage = Arc::new(MemoryStorage::new());
        let target = test_id(3);

        let pointer = b"ipns-pointer".to_vec();
        naming.insert_pointer("example.eth", &pointer).await;
        storage
            .insert_pointer(&pointer, vec![format!("/ipfs/{}", target)])
            .await;

        let resolver = resolver(naming, storage);
        let resolved = resolver.resolve("example.eth").await.unwrap();

        assert_eq!(resolved.id, target);
        assert_eq!(resolved.kind, ContentKind::Mutable);
    }

    #[tokio::test]
    async fn undecodable_record_is_unsupported() {
        let naming = Arc::new(MemoryNaming::new());
        naming
            .insert_raw("weird.eth", ContentRecord::Immutable(vec![0xff, 0xfe]))
            .await;

        let resolver = resolver(naming, Arc::new(MemoryStorage::new()));
        let err = resolver.resolve("weird.eth").await.unwrap_err();
        assert!(matches!(err, ResolutionError::Unsupported));
    }

    #[tokio::test]
    async fn unrecognized_record_is_unsupported_not_missing() {
        let naming = Arc::new(MemoryNaming::new());
        naming
            .insert_raw("swarm.eth", ContentRecord::Unrecognized)
            .await;

        let resolver = resolver(naming, Arc::new(MemoryStorage::new()));
        let err = resolver.resolve("swarm.eth").await.unwrap_err();
        assert!(matches!(err, ResolutionError::Unsupported));
    }

    #[tokio::test]
    async fn backend_outage_is_surfaced() {
        let naming = Arc::new(MemoryNaming::new());
        naming.set_unavailable(true);

        let resolver = resolver(naming, Arc::new(MemoryStorage::new()));
        let err = resolver.resolve("example.eth").await.unwrap_err();
        assert!(matches!(err, ResolutionError::BackendUnavailable(_)));
    }
}
