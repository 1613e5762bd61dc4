/// Content Cache Manager - fetch, extract, validate, pin
///
/// Owns the on-disk cache root. Payloads arrive from the storage
/// backend as tar archives and land either as `<root>/<id>/` with an
/// `index.html` entry point or as a single file renamed to
/// `<root>/<id>.html`. An entry is Ready only while a servable entry
/// point exists; anything less is torn down completely.

use crate::backend::StorageBackend;
use onionens_common::config::gateway;
use onionens_common::ContentId;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

/// Cache errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("content fetch failed: {0}")]
    FetchFailed(String),

    #[error("payload has no servable entry point")]
    NoStaticContent,

    #[error("payload extraction failed: {0}")]
    ExtractionFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// On-disk shape of a ready entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryForm {
    /// `<root>/<id>/` containing `index.html`
    Directory,
    /// `<root>/<id>.html`
    SingleFile,
}

/// A ready cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub id: ContentId,
    pub form: EntryForm,
    /// Content directory (directory form) or rendered file (single-file form).
    pub path: PathBuf,
    /// Whether the storage backend retains the payload, as last observed.
    pub pinned: bool,
}

impl CacheEntry {
    /// The file served for a bare request.
    pub fn entry_point(&self) -> PathBuf {
        match self.form {
            EntryForm::Directory => self.path.join(gateway::ENTRY_POINT),
            EntryForm::SingleFile => self.path.clone(),
        }
    }
}

/// Outcome of one fill, shared by every request that joined it.
type FillOutcome = Result<CacheEntry, Arc<CacheError>>;

/// Manages the shared cache directory.
///
/// Fetches are single-flight per identifier: the fill runs on a
/// detached task that broadcasts its one outcome, so concurrent and
/// late-arriving requests for the same identifier all observe the same
/// result, and a disconnecting client cannot abort or restart work
/// other waiters will reuse.
pub struct ContentCache {
    root: PathBuf,
    storage: Arc<dyn StorageBackend>,
    fills: Mutex<HashMap<ContentId, watch::Receiver<Option<FillOutcome>>>>,
    pinned_seen: Mutex<HashSet<ContentId>>,
}

impl ContentCache {
    pub fn new(root: impl Into<PathBuf>, storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            root: root.into(),
            storage,
            fills: Mutex::new(HashMap::new()),
            pinned_seen: Mutex::new(HashSet::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir_path(&self, id: &ContentId) -> PathBuf {
        self.root.join(id.as_str())
    }

    fn file_path(&self, id: &ContentId) -> PathBuf {
        self.root
            .join(format!("{}.{}", id.as_str(), gateway::ENTRY_SUFFIX))
    }

    /// Look up a ready entry on disk, preferring the directory form.
    ///
    /// Reads require no locking: ready entries are never mutated in
    /// place, only deleted wholesale and refetched.
    pub async fn lookup(&self, id: &ContentId) -> Option<CacheEntry> {
        let dir = self.dir_path(id);
        if dir.join(gateway::ENTRY_POINT).is_file() {
            return Some(CacheEntry {
                id: id.clone(),
                form: EntryForm::Directory,
                path: dir,
                pinned: self.pinned_seen.lock().await.contains(id),
            });
        }

        let file = self.file_path(id);
        if file.is_file() {
            return Some(CacheEntry {
                id: id.clone(),
                form: EntryForm::SingleFile,
                path: file,
                pinned: self.pinned_seen.lock().await.contains(id),
            });
        }

        None
    }

    /// Ensure the identifier's payload is cached and pinned.
    pub async fn ensure_cached(&self, id: &ContentId) -> Result<CacheEntry, CacheError> {
        loop {
            if let Some(entry) = self.lookup(id).await {
                debug!("cache hit for {}", id);
                return Ok(self.ensure_pinned(entry).await);
            }

            let mut slot = {
                let mut fills = self.fills.lock().await;
                match fills.get(id) {
                    // Join the in-flight fill.
                    Some(slot) if slot.borrow().is_none() => slot.clone(),
                    // A finished fill whose waiters were all cancelled
                    // before pruning; clear it and re-inspect the disk.
                    Some(_) => {
                        fills.remove(id);
                        continue;
                    }
                    None => {
                        let slot = self.spawn_fill(id);
                        fills.insert(id.clone(), slot.clone());
                        slot
                    }
                }
            };

            let outcome = match slot.wait_for(|outcome| outcome.is_some()).await {
                Ok(value) => value.clone(),
                Err(_) => None,
            };

            self.prune_fill(id, &slot).await;

            return match outcome {
                Some(Ok(entry)) => {
                    if entry.pinned {
                        self.pinned_seen.lock().await.insert(id.clone());
                    }
                    Ok(entry)
                }
                Some(Err(shared)) => Err(replay_error(&shared)),
                // The fill task died without reporting.
                None => Err(CacheError::ExtractionFailed(
                    "cache fill task failed".to_string(),
                )),
            };
        }
    }

    /// Start one detached fill and hand back its broadcast slot.
    fn spawn_fill(&self, id: &ContentId) -> watch::Receiver<Option<FillOutcome>> {
        let (tx, rx) = watch::channel(None);
        let root = self.root.clone();
        let storage = self.storage.clone();
        let fill_id = id.clone();

        // Detached so the fill outlives any cancelled waiter.
        tokio::spawn(async move {
            let outcome = fill(root, storage, fill_id).await.map_err(Arc::new);
            let _ = tx.send(Some(outcome));
        });
        rx
    }

    /// Drop the completed fill's slot so the map stays bounded by the
    /// number of in-flight fills.
    async fn prune_fill(&self, id: &ContentId, slot: &watch::Receiver<Option<FillOutcome>>) {
        let mut fills = self.fills.lock().await;
        if let Some(existing) = fills.get(id) {
            if existing.same_channel(slot) {
                fills.remove(id);
            }
        }
    }

    /// Re-pin a disk-resident entry the backend may have forgotten
    /// (e.g., after a gateway restart). Best effort.
    async fn ensure_pinned(&self, mut entry: CacheEntry) -> CacheEntry {
        if entry.pinned {
            return entry;
        }

        let pinned = pin_unless_retained(self.storage.as_ref(), &entry.id).await;
        if pinned {
            self.pinned_seen.lock().await.insert(entry.id.clone());
        }
        entry.pinned = pinned;
        entry
    }
}

/// Rebuild a caller-owned error from a fill outcome shared by several
/// waiters.
fn replay_error(err: &CacheError) -> CacheError {
    match err {
        CacheError::FetchFailed(msg) => CacheError::FetchFailed(msg.clone()),
        CacheError::NoStaticContent => CacheError::NoStaticContent,
        CacheError::ExtractionFailed(msg) => CacheError::ExtractionFailed(msg.clone()),
        CacheError::Io(e) => CacheError::Io(std::io::Error::new(e.kind(), e.to_string())),
    }
}

/// Fetch, extract and validate one identifier's payload.
///
/// Any failure tears down every on-disk artifact for the identifier and
/// releases the backend retention marker before returning.
async fn fill(
    root: PathBuf,
    storage: Arc<dyn StorageBackend>,
    id: ContentId,
) -> Result<CacheEntry, CacheError> {
    match fill_inner(&root, storage.as_ref(), &id).await {
        Ok(mut entry) => {
            entry.pinned = pin_unless_retained(storage.as_ref(), &id).await;
            Ok(entry)
        }
        Err(err) => {
            teardown(&root, storage.as_ref(), &id).await;
            Err(err)
        }
    }
}

async fn fill_inner(
    root: &Path,
    storage: &dyn StorageBackend,
    id: &ContentId,
) -> Result<CacheEntry, CacheError> {
    let bytes = storage
        .fetch(id)
        .await
        .map_err(|e| CacheError::FetchFailed(e.to_string()))?;

    // An empty archive is a failed fetch, not an empty payload.
    if bytes.is_empty() {
        return Err(CacheError::FetchFailed("backend returned zero bytes".to_string()));
    }

    debug!("fetched {} bytes for {}", bytes.len(), id);

    tokio::fs::create_dir_all(root).await?;
    let staging = root.join(format!("{}.tar", id.as_str()));
    tokio::fs::write(&staging, &bytes).await?;

    let unpack_root = root.to_path_buf();
    let unpack_src = staging.clone();
    let unpacked = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let file = std::fs::File::open(&unpack_src)?;
        tar::Archive::new(file).unpack(&unpack_root)
    })
    .await;

    // The staging archive never outlives the fill.
    let _ = tokio::fs::remove_file(&staging).await;

    match unpacked {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(CacheError::ExtractionFailed(e.to_string())),
        Err(e) => {
            return Err(CacheError::ExtractionFailed(format!(
                "extraction task failed: {}",
                e
            )))
        }
    }

    let dir = root.join(id.as_str());
    let file = root.join(format!("{}.{}", id.as_str(), gateway::ENTRY_SUFFIX));

    // A single rendered file is renamed to carry the entry-point suffix
    // so later lookups are uniform.
    if dir.is_file() {
        tokio::fs::rename(&dir, &file).await?;
    }

    if dir.join(gateway::ENTRY_POINT).is_file() {
        Ok(CacheEntry {
            id: id.clone(),
            form: EntryForm::Directory,
            path: dir,
            pinned: false,
        })
    } else if file.is_file() {
        Ok(CacheEntry {
            id: id.clone(),
            form: EntryForm::SingleFile,
            path: file,
            pinned: false,
        })
    } else {
        Err(CacheError::NoStaticContent)
    }
}

/// Pin the identifier unless the backend already retains it.
/// Pin failures are logged, never propagated.
async fn pin_unless_retained(storage: &dyn StorageBackend, id: &ContentId) -> bool {
    match storage.list_pinned().await {
        Ok(list) if list.contains(id) => return true,
        Ok(_) => {}
        Err(e) => warn!("pin listing failed for {}: {}", id, e),
    }

    match storage.pin(id).await {
        Ok(()) => true,
        Err(e) => {
            warn!("pin request failed for {}: {}", id, e);
            false
        }
    }
}

/// Remove every on-disk artifact for an identifier and release its
/// retention marker. Unpin failures are logged, never propagated.
async fn teardown(root: &Path, storage: &dyn StorageBackend, id: &ContentId) {
    let dir = root.join(id.as_str());
    let file = root.join(format!("{}.{}", id.as_str(), gateway::ENTRY_SUFFIX));
    let staging = root.join(format!("{}.tar", id.as_str()));

    let _ = tokio::fs::remove_dir_all(&dir).await;
    let _ = tokio::fs::remove_file(&file).await;
    let _ = tokio::fs::remove_file(&staging).await;

    if let Err(e) = storage.unpin(id).await {
        warn!("unpin request failed for {}: {}", id, e);
    }
}
