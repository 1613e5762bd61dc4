/// Self-signed certificate authority
///
/// Stand-in for an external ACME client: generates self-signed pairs on
/// demand, keeps them in memory, and optionally persists them so
/// restarts keep serving the same material.

use crate::backend::{CertificateAuthority, CertificateMaterial};
use async_trait::async_trait;
use onionens_common::{BackendError, BackendResult};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub struct SelfSignedAuthority {
    issued: Mutex<HashMap<String, CertificateMaterial>>,
    /// Directory holding `<hostname>.crt` / `<hostname>.key` pairs.
    state_dir: Option<PathBuf>,
}

impl SelfSignedAuthority {
    pub fn new() -> Self {
        Self {
            issued: Mutex::new(HashMap::new()),
            state_dir: None,
        }
    }

    /// Persist issued pairs under `dir` and reload them on demand.
    pub fn with_state_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            issued: Mutex::new(HashMap::new()),
            state_dir: Some(dir.into()),
        }
    }

    fn pair_paths(&self, hostname: &str) -> Option<(PathBuf, PathBuf)> {
        let dir = self.state_dir.as_ref()?;
        Some((
            dir.join(format!("{}.crt", hostname)),
            dir.join(format!("{}.key", hostname)),
        ))
    }

    async fn load_persisted(&self, hostname: &str) -> Option<CertificateMaterial> {
        let (cert_path, key_path) = self.pair_paths(hostname)?;
        let cert_pem = tokio::fs::read_to_string(&cert_path).await.ok()?;
        let key_pem = tokio::fs::read_to_string(&key_path).await.ok()?;
        debug!("loaded persisted certificate for {}", hostname);
        Some(CertificateMaterial { cert_pem, key_pem })
    }

    async fn persist(&self, hostname: &str, material: &CertificateMaterial) {
        let Some((cert_path, key_path)) = self.pair_paths(hostname) else {
            return;
        };
        let result = async {
            if let Some(dir) = self.state_dir.as_ref() {
                tokio::fs::create_dir_all(dir).await?;
            }
            tokio::fs::write(&cert_path, &material.cert_pem).await?;
            tokio::fs::write(&key_path, &material.key_pem).await?;
            Ok::<_, std::io::Error>(())
        }
        .await;

        // Persistence is best-effort; the in-memory pair stays valid.
        if let Err(e) = result {
            warn!("failed to persist certificate for {}: {}", hostname, e);
        }
    }
}

impl Default for SelfSignedAuthority {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CertificateAuthority for SelfSignedAuthority {
    async fn issue(&self, hostname: &str, alt_names: &[String]) -> BackendResult<()> {
        let mut issued = self.issued.lock().await;
        if issued.contains_key(hostname) {
            return Ok(());
        }

        if let Some(material) = self.load_persisted(hostname).await {
            issued.insert(hostname.to_string(), material);
            return Ok(());
        }

        let mut names = vec![hostname.to_string()];
        names.extend_from_slice(alt_names);
        let cert = rcgen::generate_simple_self_signed(names)
            .map_err(|e| BackendError::rejected(format!("certificate generation: {}", e)))?;

        let material = CertificateMaterial {
            cert_pem: cert.cert.pem(),
            key_pem: cert.key_pair.serialize_pem(),
        };
        self.persist(hostname, &material).await;
        issued.insert(hostname.to_string(), material);
        Ok(())
    }

    async fn get(&self, hostname: &str) -> BackendResult<Option<CertificateMaterial>> {
        if let Some(material) = self.issued.lock().await.get(hostname) {
            return Ok(Some(material.clone()));
        }
        Ok(self.load_persisted(hostname).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn issue_then_get_returns_material() {
        let ca = SelfSignedAuthority::new();
        ca.issue("site.3th.ws", &[]).await.unwrap();

        let material = ca.get("site.3th.ws").await.unwrap().unwrap();
        assert!(material.cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(material.key_pem.contains("PRIVATE KEY"));
    }

    #[tokio::test]
    async fn issue_is_idempotent() {
        let ca = SelfSignedAuthority::new();
        ca.issue("site.3th.ws", &[]).await.unwrap();
        let first = ca.get("site.3th.ws").await.unwrap().unwrap();

        ca.issue("site.3th.ws", &[]).await.unwrap();
        let second = ca.get("site.3th.ws").await.unwrap().unwrap();

        assert_eq!(first.cert_pem, second.cert_pem);
    }

    #[tokio::test]
    async fn unknown_hostname_is_none() {
        let ca = SelfSignedAuthority::new();
        assert!(ca.get("never.3th.ws").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn persisted_pairs_survive_restart() {
        let dir = tempfile::tempdir().unwrap();

        let ca = SelfSignedAuthority::with_state_dir(dir.path());
        ca.issue("site.3th.ws", &[]).await.unwrap();
        let before = ca.get("site.3th.ws").await.unwrap().unwrap();

        let reborn = SelfSignedAuthority::with_state_dir(dir.path());
        let after = reborn.get("site.3th.ws").await.unwrap().unwrap();

        assert_eq!(before.cert_pem, after.cert_pem);
        assert_eq!(before.key_pem, after.key_pem);
    }
}
