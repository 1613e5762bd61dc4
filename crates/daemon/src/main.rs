/// OnionENS Gateway Daemon
///
/// Serves blockchain-registered names over two listeners at once:
/// - Public HTTPS with per-SNI certificate issuance
/// - A local HTTP listener that hidden services forward to
///
/// Content is resolved through the naming registry, fetched from the
/// storage daemon, cached on disk, and pinned against collection.

use anyhow::Result;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};

use onionens_common::GatewayConfig;
use onionens_core::backend::OnionController;
use onionens_core::{
    CertificateStore, ContentCache, HiddenServiceDirectory, NameResolver, SelfSignedAuthority,
    TlsContextProvider,
};
use onionens_daemon::{
    clearnet_app, onion_app, tls_listener, EthRpcNaming, Gateway, IpfsApiStorage, TorrcController,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("Starting OnionENS Gateway v{}", env!("CARGO_PKG_VERSION"));

    // Both the listeners and the outbound clients speak TLS; settle on
    // one crypto provider before any of them initialize.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = load_config();

    // External collaborators
    let naming = Arc::new(EthRpcNaming::new(&config.rpc_provider, &config.name_tld)?);
    let storage = Arc::new(IpfsApiStorage::new(&config.storage_api)?);

    let controller = Arc::new(TorrcController::new(&config.onion_state_dir));
    controller.reload().await?;

    // Gateway components
    let resolver = Arc::new(NameResolver::new(naming, storage.clone()));
    let cache = Arc::new(ContentCache::new(&config.cache_root, storage));
    let onions = Arc::new(HiddenServiceDirectory::new(controller, config.onion_port));

    let provider = Arc::new(build_tls_provider(&config)?);

    let gateway = Arc::new(Gateway {
        resolver,
        cache,
        onions,
        config: config.clone(),
    });

    // Hidden services forward to this loopback listener.
    let onion_addr: SocketAddr = format!("127.0.0.1:{}", config.onion_port).parse()?;
    let onion_router = onion_app(gateway.clone());
    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(onion_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                warn!("onion listener failed to bind {}: {}", onion_addr, e);
                return;
            }
        };
        info!("onion listener accepting on {}", onion_addr);
        if let Err(e) = axum::serve(listener, onion_router).await {
            warn!("onion listener error: {}", e);
        }
    });

    let clearnet_addr: SocketAddr =
        format!("{}:{}", config.listen_addr, config.clearnet_port).parse()?;
    let listener = tokio::net::TcpListener::bind(clearnet_addr).await?;
    tls_listener::serve(listener, provider, clearnet_app(gateway)).await
}

/// Load `gateway.toml` next to the binary, writing defaults on first run.
fn load_config() -> GatewayConfig {
    let config_path = PathBuf::from("gateway.toml");
    if config_path.exists() {
        match GatewayConfig::from_file(&config_path) {
            Ok(config) => {
                info!("Loaded configuration from {:?}", config_path);
                return config;
            }
            Err(e) => {
                warn!("Failed to load {:?}: {}; using defaults", config_path, e);
                return GatewayConfig::default();
            }
        }
    }

    info!("No configuration file found, using defaults");
    let config = GatewayConfig::default();
    if let Err(e) = config.to_file(&config_path) {
        warn!("Failed to save default config: {}", e);
    } else {
        info!("Saved default configuration to {:?}", config_path);
    }
    config
}

/// Default pair from the configured PEM files, or a fresh self-signed
/// pair when they are absent (development setups).
fn build_tls_provider(config: &GatewayConfig) -> Result<TlsContextProvider> {
    let default_key = match onionens_core::tls::store::certified_key_from_files(
        std::path::Path::new(&config.default_cert),
        std::path::Path::new(&config.default_key),
    ) {
        Ok(key) => {
            info!("Loaded default certificate from {}", config.default_cert);
            key
        }
        Err(e) => {
            warn!(
                "Default certificate unavailable ({}); generating a self-signed pair",
                e
            );
            onionens_core::tls::store::self_signed_key(vec![
                config.gateway_suffix.clone(),
                format!("*.{}", config.gateway_suffix),
            ])?
        }
    };

    let store = Arc::new(CertificateStore::new(default_key));
    let authority = Arc::new(SelfSignedAuthority::with_state_dir(
        PathBuf::from(&config.onion_state_dir).join("certs"),
    ));

    Ok(TlsContextProvider::new(
        store,
        authority,
        config.gateway_suffix.clone(),
        config.issue_timeout(),
    ))
}
