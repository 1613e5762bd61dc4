/// Hidden-Service Directory - content identifier to onion address
///
/// Keeps a bidirectional index over the onion controller's service
/// list, keyed by canonical content identifier one way and by
/// case-normalized onion hostname the other. Services are provisioned
/// lazily, single-flight per identifier.

use crate::backend::OnionController;
use onionens_common::ContentId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Directory errors
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("hidden service provisioning failed: {0}")]
    ProvisioningFailed(String),

    #[error("no hidden service for this name")]
    NotFound,

    #[error("onion controller unavailable: {0}")]
    ControllerUnavailable(String),
}

#[derive(Default)]
struct DirectoryIndex {
    by_id: HashMap<ContentId, String>,
    by_hostname: HashMap<String, ContentId>,
}

/// Bidirectional identifier/onion-address directory.
pub struct HiddenServiceDirectory {
    controller: Arc<dyn OnionController>,
    /// Local port hidden services forward to.
    local_port: u16,
    index: RwLock<DirectoryIndex>,
    provisioning: Mutex<HashMap<ContentId, Arc<Mutex<()>>>>,
}

impl HiddenServiceDirectory {
    pub fn new(controller: Arc<dyn OnionController>, local_port: u16) -> Self {
        Self {
            controller,
            local_port,
            index: RwLock::new(DirectoryIndex::default()),
            provisioning: Mutex::new(HashMap::new()),
        }
    }

    /// Reload controller state and rebuild both index maps.
    ///
    /// The controller's configuration is shared process-wide and may
    /// have been mutated by another in-flight request; last reload wins,
    /// which is safe because service identity is keyed by content
    /// identifier rather than load order.
    async fn refresh(&self) -> Result<(), DirectoryError> {
        self.controller
            .reload()
            .await
            .map_err(|e| DirectoryError::ControllerUnavailable(e.to_string()))?;

        let services = self
            .controller
            .list_services()
            .await
            .map_err(|e| DirectoryError::ControllerUnavailable(e.to_string()))?;

        let mut index = DirectoryIndex::default();
        for service in services {
            let id = match ContentId::parse(&service.name) {
                Ok(id) => id,
                Err(_) => {
                    // Foreign services in the same controller are not ours.
                    debug!("skipping non-content service {}", service.name);
                    continue;
                }
            };
            let hostname = service.hostname.trim().to_lowercase();
            index.by_id.insert(id.clone(), hostname.clone());
            index.by_hostname.insert(hostname, id);
        }

        *self.index.write().await = index;
        Ok(())
    }

    /// Onion address for an identifier, provisioning a hidden service on
    /// first use.
    pub async fn address_for(&self, id: &ContentId) -> Result<String, DirectoryError> {
        self.refresh().await?;
        if let Some(hostname) = self.index.read().await.by_id.get(id) {
            return Ok(hostname.clone());
        }

        let lock = self.provision_lock(id).await;
        let result = {
            let _guard = lock.lock().await;
            self.provision(id).await
        };
        self.release_provision_lock(id, &lock).await;
        result
    }

    async fn provision(&self, id: &ContentId) -> Result<String, DirectoryError> {
        // A concurrent request may have provisioned while we waited.
        self.refresh().await?;
        if let Some(hostname) = self.index.read().await.by_id.get(id) {
            return Ok(hostname.clone());
        }

        info!("provisioning hidden service for {}", id);
        self.controller
            .create_service(id.as_str(), self.local_port)
            .await
            .map_err(|e| DirectoryError::ProvisioningFailed(e.to_string()))?;

        if let Err(e) = self.controller.save().await {
            warn!("failed to persist onion controller state: {}", e);
        }

        self.refresh().await?;
        self.index
            .read()
            .await
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| {
                DirectoryError::ProvisioningFailed(format!(
                    "service for {} missing after creation",
                    id
                ))
            })
    }

    /// Reverse lookup by onion hostname.
    ///
    /// Returns `None` for unmapped or stale hostnames; that is an
    /// expected outcome, not a failure.
    pub async fn identifier_for(&self, hostname: &str) -> Result<Option<ContentId>, DirectoryError> {
        self.refresh().await?;
        let hostname = hostname.trim().to_lowercase();
        Ok(self.index.read().await.by_hostname.get(&hostname).cloned())
    }

    async fn provision_lock(&self, id: &ContentId) -> Arc<Mutex<()>> {
        let mut locks = self.provisioning.lock().await;
        locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the per-id lock entry once the last waiter is done with it,
    /// so the map stays bounded by the number of in-flight provisions.
    async fn release_provision_lock(&self, id: &ContentId, lock: &Arc<Mutex<()>>) {
        let mut locks = self.provisioning.lock().await;
        if let Some(existing) = locks.get(id) {
            // One reference in the map, one held by this caller.
            if Arc::ptr_eq(existing, lock) && Arc::strong_count(existing) <= 2 {
                locks.remove(id);
            }
        }
    }
}
