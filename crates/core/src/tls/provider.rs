/// Per-handshake certificate selection with lazy issuance
///
/// `context_for` runs synchronously in the handshake path, so issuance
/// is bounded by a timeout; on expiry or failure the default pair is
/// served instead of stalling the client.

use super::store::{certified_key_from_pem, CertificateStore};
use super::CertificateError;
use crate::backend::CertificateAuthority;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Selects or issues a certificate for each incoming handshake.
pub struct TlsContextProvider {
    store: Arc<CertificateStore>,
    ca: Arc<dyn CertificateAuthority>,
    /// Managed domain suffix; only subdomains of it get dedicated pairs.
    suffix: String,
    issue_timeout: Duration,
    /// Issuance for the same hostname is single-flight.
    issuing: Mutex<()>,
}

impl TlsContextProvider {
    pub fn new(
        store: Arc<CertificateStore>,
        ca: Arc<dyn CertificateAuthority>,
        suffix: impl Into<String>,
        issue_timeout: Duration,
    ) -> Self {
        Self {
            store,
            ca,
            suffix: suffix.into().to_lowercase(),
            issue_timeout,
            issuing: Mutex::new(()),
        }
    }

    /// True for subdomains of the managed suffix; the root itself and
    /// foreign names stay on the default pair.
    fn eligible(&self, hostname: &str) -> bool {
        hostname != self.suffix && hostname.ends_with(&format!(".{}", self.suffix))
    }

    /// Certificate for one handshake. Never fails; every unresolved
    /// case falls back to the default pair.
    pub async fn context_for(&self, sni: Option<&str>) -> Arc<CertifiedKey> {
        let hostname = match sni {
            Some(name) => name.trim().to_lowercase(),
            None => return self.store.default_key(),
        };

        if !self.eligible(&hostname) {
            return self.store.default_key();
        }

        if let Some(key) = self.store.lookup(&hostname).await {
            return key;
        }

        match tokio::time::timeout(self.issue_timeout, self.issue_and_bind(&hostname)).await {
            Ok(Ok(key)) => key,
            Ok(Err(e)) => {
                warn!("certificate issuance for {} failed: {}", hostname, e);
                self.store.default_key()
            }
            Err(_) => {
                warn!(
                    "certificate issuance for {} timed out after {:?}",
                    hostname, self.issue_timeout
                );
                self.store.default_key()
            }
        }
    }

    async fn issue_and_bind(&self, hostname: &str) -> Result<Arc<CertifiedKey>, CertificateError> {
        let _guard = self.issuing.lock().await;

        // Another handshake may have bound the hostname while we waited.
        if let Some(key) = self.store.lookup(hostname).await {
            return Ok(key);
        }

        debug!("requesting certificate for {}", hostname);

        let material = match self
            .ca
            .get(hostname)
            .await
            .map_err(|e| CertificateError::IssuanceFailed(e.to_string()))?
        {
            Some(material) => material,
            None => {
                self.ca
                    .issue(hostname, &[])
                    .await
                    .map_err(|e| CertificateError::IssuanceFailed(e.to_string()))?;
                self.ca
                    .get(hostname)
                    .await
                    .map_err(|e| CertificateError::IssuanceFailed(e.to_string()))?
                    .ok_or_else(|| {
                        CertificateError::IssuanceFailed(
                            "authority has no material after issuance".to_string(),
                        )
                    })?
            }
        };

        let key = certified_key_from_pem(&material.cert_pem, &material.key_pem)?;
        self.store.insert(hostname, key.clone()).await;
        Ok(key)
    }

    /// Server configuration presenting one already-selected key.
    pub fn server_config(key: Arc<CertifiedKey>) -> Arc<ServerConfig> {
        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_cert_resolver(Arc::new(SelectedCert(key)));
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        Arc::new(config)
    }
}

/// Resolver that always presents the key chosen before the handshake.
#[derive(Debug)]
struct SelectedCert(Arc<CertifiedKey>);

impl ResolvesServerCert for SelectedCert {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryAuthority;
    use crate::tls::store::self_signed_key;

    fn provider(ca: Arc<MemoryAuthority>, timeout: Duration) -> TlsContextProvider {
        let default = self_signed_key(vec!["3th.ws".to_string()]).unwrap();
        let store = Arc::new(CertificateStore::new(default));
        TlsContextProvider::new(store, ca, "3th.ws", timeout)
    }

    #[tokio::test]
    async fn root_domain_gets_default() {
        let ca = Arc::new(MemoryAuthority::new());
        let provider = provider(ca.clone(), Duration::from_secs(5));

        let key = provider.context_for(Some("3th.ws")).await;
        assert!(Arc::ptr_eq(&key, &provider.store.default_key()));
        assert_eq!(ca.issue_count(), 0);
    }

    #[tokio::test]
    async fn foreign_hostname_gets_default() {
        let ca = Arc::new(MemoryAuthority::new());
        let provider = provider(ca.clone(), Duration::from_secs(5));

        let key = provider.context_for(Some("evil.example.com")).await;
        assert!(Arc::ptr_eq(&key, &provider.store.default_key()));
        assert_eq!(ca.issue_count(), 0);
    }

    #[tokio::test]
    async fn missing_sni_gets_default() {
        let ca = Arc::new(MemoryAuthority::new());
        let provider = provider(ca, Duration::from_secs(5));

        let key = provider.context_for(None).await;
        assert!(Arc::ptr_eq(&key, &provider.store.default_key()));
    }

    #[tokio::test]
    async fn subdomain_issues_once_then_reuses() {
        let ca = Arc::new(MemoryAuthority::new());
        let provider = provider(ca.clone(), Duration::from_secs(5));

        let first = provider.context_for(Some("sub.3th.ws")).await;
        assert!(!Arc::ptr_eq(&first, &provider.store.default_key()));
        assert_eq!(ca.issue_count(), 1);

        let second = provider.context_for(Some("sub.3th.ws")).await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(ca.issue_count(), 1);
    }

    #[tokio::test]
    async fn issuance_failure_falls_back_to_default() {
        let ca = Arc::new(MemoryAuthority::new());
        ca.set_fail_issuance(true);
        let provider = provider(ca, Duration::from_secs(5));

        let key = provider.context_for(Some("sub.3th.ws")).await;
        assert!(Arc::ptr_eq(&key, &provider.store.default_key()));
    }

    #[tokio::test]
    async fn slow_issuance_times_out_to_default() {
        let ca = Arc::new(MemoryAuthority::new());
        ca.set_issue_delay(Duration::from_secs(30)).await;
        let provider = provider(ca, Duration::from_millis(50));

        let key = provider.context_for(Some("slow.3th.ws")).await;
        assert!(Arc::ptr_eq(&key, &provider.store.default_key()));
    }

    #[tokio::test]
    async fn wildcard_binding_skips_issuance() {
        let ca = Arc::new(MemoryAuthority::new());
        let provider = provider(ca.clone(), Duration::from_secs(5));

        let wild = self_signed_key(vec!["*.3th.ws".to_string()]).unwrap();
        provider.store.insert("*.3th.ws", wild.clone()).await;

        let key = provider.context_for(Some("anything.3th.ws")).await;
        assert!(Arc::ptr_eq(&key, &wild));
        assert_eq!(ca.issue_count(), 0);
    }

    #[tokio::test]
    async fn server_config_forces_http1() {
        let key = self_signed_key(vec!["3th.ws".to_string()]).unwrap();
        let config = TlsContextProvider::server_config(key);
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }
}
