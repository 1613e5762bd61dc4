/// Certificate bindings keyed by hostname
///
/// Holds the static default pair plus dynamically issued per-hostname
/// pairs. Lookup order is exact hostname, wildcard of the parent, then
/// the caller falls back to the default.

use super::CertificateError;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Build a rustls signing key from PEM text.
pub fn certified_key_from_pem(
    cert_pem: &str,
    key_pem: &str,
) -> Result<Arc<CertifiedKey>, CertificateError> {
    let cert_chain: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CertificateError::InvalidMaterial(format!("certificate PEM: {}", e)))?;

    if cert_chain.is_empty() {
        return Err(CertificateError::InvalidMaterial(
            "no certificates in PEM".to_string(),
        ));
    }

    let private_key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut key_pem.as_bytes())
        .map_err(|e| CertificateError::InvalidMaterial(format!("private key PEM: {}", e)))?
        .ok_or_else(|| CertificateError::InvalidMaterial("no private key in PEM".to_string()))?;

    let signing_key = rustls::crypto::ring::sign::any_supported_type(&private_key)
        .map_err(|e| CertificateError::InvalidMaterial(format!("unsupported key: {}", e)))?;

    Ok(Arc::new(CertifiedKey::new(cert_chain, signing_key)))
}

/// Load a certified key from PEM files on disk.
pub fn certified_key_from_files(
    cert_path: &Path,
    key_path: &Path,
) -> Result<Arc<CertifiedKey>, CertificateError> {
    let cert_pem = std::fs::read_to_string(cert_path)
        .map_err(|e| CertificateError::InvalidMaterial(format!("{}: {}", cert_path.display(), e)))?;
    let key_pem = std::fs::read_to_string(key_path)
        .map_err(|e| CertificateError::InvalidMaterial(format!("{}: {}", key_path.display(), e)))?;
    certified_key_from_pem(&cert_pem, &key_pem)
}

/// Hostname-keyed certificate bindings.
pub struct CertificateStore {
    default: Arc<CertifiedKey>,
    bindings: RwLock<HashMap<String, Arc<CertifiedKey>>>,
}

impl CertificateStore {
    pub fn new(default: Arc<CertifiedKey>) -> Self {
        Self {
            default,
            bindings: RwLock::new(HashMap::new()),
        }
    }

    /// The static default pair covering the root domain.
    pub fn default_key(&self) -> Arc<CertifiedKey> {
        self.default.clone()
    }

    /// Exact binding, else a wildcard binding for the parent domain.
    pub async fn lookup(&self, hostname: &str) -> Option<Arc<CertifiedKey>> {
        let hostname = hostname.to_lowercase();
        let bindings = self.bindings.read().await;

        if let Some(key) = bindings.get(&hostname) {
            return Some(key.clone());
        }

        let (_, parent) = hostname.split_once('.')?;
        bindings.get(&format!("*.{}", parent)).cloned()
    }

    pub async fn insert(&self, hostname: &str, key: Arc<CertifiedKey>) {
        self.bindings
            .write()
            .await
            .insert(hostname.to_lowercase(), key);
    }

    pub async fn len(&self) -> usize {
        self.bindings.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Generate a throwaway self-signed key, for defaults and tests.
pub fn self_signed_key(hostnames: Vec<String>) -> Result<Arc<CertifiedKey>, CertificateError> {
    let cert = rcgen::generate_simple_self_signed(hostnames)
        .map_err(|e| CertificateError::InvalidMaterial(e.to_string()))?;
    certified_key_from_pem(&cert.cert.pem(), &cert.key_pair.serialize_pem())
}
