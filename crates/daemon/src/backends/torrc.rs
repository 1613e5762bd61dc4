/// Onion controller over a managed torrc fragment
///
/// The anonymity daemon is configured entirely through files: a torrc
/// fragment listing one `HiddenServiceDir`/`HiddenServicePort` block per
/// service, and a per-service directory where the daemon drops the
/// assigned `hostname`. This controller owns the fragment, keeps an
/// in-memory mirror, and re-reads everything on reload so addresses the
/// daemon rotated out-of-band are picked up.

use async_trait::async_trait;
use data_encoding::BASE32_NOPAD;
use onionens_common::config::gateway::ONION_VIRTUAL_PORT;
use onionens_common::BackendResult;
use onionens_core::backend::{OnionController, OnionService};
use sha3::{Digest, Keccak256};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone)]
struct ServiceEntry {
    name: String,
    hostname: String,
    local_port: u16,
}

pub struct TorrcController {
    state_dir: PathBuf,
    services: Mutex<Vec<ServiceEntry>>,
}

impl TorrcController {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            services: Mutex::new(Vec::new()),
        }
    }

    fn torrc_path(&self) -> PathBuf {
        self.state_dir.join("torrc")
    }

    fn service_dir(&self, name: &str) -> PathBuf {
        self.state_dir.join("services").join(name)
    }

    /// Placeholder address written on creation; the daemon overwrites
    /// the hostname file with the real one once the service publishes,
    /// and the next reload picks it up.
    fn derive_hostname(name: &str) -> String {
        let digest: [u8; 32] = Keccak256::digest(name.as_bytes()).into();
        format!("{}.onion", BASE32_NOPAD.encode(&digest).to_lowercase())
    }

    fn render_torrc(services: &[ServiceEntry], state_dir: &Path) -> String {
        let mut torrc = String::new();
        for service in services {
            torrc.push_str(&format!(
                "HiddenServiceDir {}\n",
                state_dir.join("services").join(&service.name).display()
            ));
            torrc.push_str(&format!(
                "HiddenServicePort {} 127.0.0.1:{}\n",
                ONION_VIRTUAL_PORT, service.local_port
            ));
        }
        torrc
    }

    async fn parse_torrc(&self) -> BackendResult<Vec<ServiceEntry>> {
        let torrc = match tokio::fs::read_to_string(self.torrc_path()).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        let mut pending_dir: Option<PathBuf> = None;

        for line in torrc.lines() {
            let line = line.trim();
            if let Some(path) = line.strip_prefix("HiddenServiceDir ") {
                pending_dir = Some(PathBuf::from(path.trim()));
            } else if let Some(spec) = line.strip_prefix("HiddenServicePort ") {
                let Some(dir) = pending_dir.take() else {
                    continue;
                };
                let Some(name) = dir.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let local_port = spec
                    .split(&[' ', ':'])
                    .next_back()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(ONION_VIRTUAL_PORT);

                let hostname_path = dir.join("hostname");
                let hostname = match tokio::fs::read_to_string(&hostname_path).await {
                    Ok(text) => text.trim().to_string(),
                    Err(_) => {
                        // Not yet published by the daemon.
                        debug!("service {} has no hostname file yet", name);
                        continue;
                    }
                };

                entries.push(ServiceEntry {
                    name: name.to_string(),
                    hostname,
                    local_port,
                });
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl OnionController for TorrcController {
    async fn list_services(&self) -> BackendResult<Vec<OnionService>> {
        Ok(self
            .services
            .lock()
            .await
            .iter()
            .map(|entry| OnionService {
                name: entry.name.clone(),
                hostname: entry.hostname.clone(),
            })
            .collect())
    }

    async fn create_service(&self, name: &str, local_port: u16) -> BackendResult<()> {
        let mut services = self.services.lock().await;
        if services.iter().any(|entry| entry.name == name) {
            return Ok(());
        }

        let dir = self.service_dir(name);
        tokio::fs::create_dir_all(&dir).await?;

        // The daemon refuses service directories readable by others.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700)).await?;
        }

        let hostname_path = dir.join("hostname");
        let hostname = match tokio::fs::read_to_string(&hostname_path).await {
            Ok(text) => text.trim().to_string(),
            Err(_) => {
                let derived = Self::derive_hostname(name);
                tokio::fs::write(&hostname_path, format!("{}\n", derived)).await?;
                derived
            }
        };

        debug!("registered hidden service {} as {}", name, hostname);
        services.push(ServiceEntry {
            name: name.to_string(),
            hostname,
            local_port,
        });

        // Write-through so a reload between create and save cannot
        // drop the new block.
        let torrc = Self::render_torrc(&services, &self.state_dir);
        tokio::fs::create_dir_all(&self.state_dir).await?;
        tokio::fs::write(self.torrc_path(), torrc).await?;
        Ok(())
    }

    async fn reload(&self) -> BackendResult<()> {
        let entries = self.parse_torrc().await?;
        *self.services.lock().await = entries;
        Ok(())
    }

    async fn save(&self) -> BackendResult<()> {
        let services = self.services.lock().await;
        let torrc = Self::render_torrc(&services, &self.state_dir);
        tokio::fs::create_dir_all(&self.state_dir).await?;
        tokio::fs::write(self.torrc_path(), torrc).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_reload_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let controller = TorrcController::new(dir.path());

        controller.create_service("bafyexample", 3000).await.unwrap();
        controller.save().await.unwrap();
        controller.reload().await.unwrap();

        let services = controller.list_services().await.unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name, "bafyexample");
        assert!(services[0].hostname.ends_with(".onion"));
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let controller = TorrcController::new(dir.path());

        controller.create_service("bafyexample", 3000).await.unwrap();
        controller.create_service("bafyexample", 3000).await.unwrap();

        assert_eq!(controller.list_services().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fresh_state_dir_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let controller = TorrcController::new(dir.path());

        controller.reload().await.unwrap();
        assert!(controller.list_services().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reload_picks_up_daemon_assigned_hostname() {
        let dir = tempfile::tempdir().unwrap();
        let controller = TorrcController::new(dir.path());

        controller.create_service("bafyexample", 3000).await.unwrap();

        // The daemon rewrites the hostname file once it publishes.
        let hostname_path = dir.path().join("services/bafyexample/hostname");
        tokio::fs::write(&hostname_path, "realaddress.onion\n")
            .await
            .unwrap();

        controller.reload().await.unwrap();
        let services = controller.list_services().await.unwrap();
        assert_eq!(services[0].hostname, "realaddress.onion");
    }

    #[tokio::test]
    async fn torrc_blocks_carry_the_forward_port() {
        let dir = tempfile::tempdir().unwrap();
        let controller = TorrcController::new(dir.path());

        controller.create_service("bafyexample", 3123).await.unwrap();
        controller.save().await.unwrap();

        let torrc = tokio::fs::read_to_string(dir.path().join("torrc"))
            .await
            .unwrap();
        assert!(torrc.contains("HiddenServicePort 80 127.0.0.1:3123"));
        assert!(torrc.contains("services/bafyexample"));
    }
}
