/// Public TLS listener with per-handshake certificate selection
///
/// Each accepted connection pauses after the ClientHello so the context
/// provider can pick (or issue) a certificate for the requested SNI
/// name, then finishes the handshake with a per-connection server
/// config and hands the stream to the HTTP router.

use anyhow::Result;
use axum::Router;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use onionens_core::tls::TlsContextProvider;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::LazyConfigAcceptor;
use tracing::{debug, info};

pub async fn serve(
    listener: TcpListener,
    provider: Arc<TlsContextProvider>,
    app: Router,
) -> Result<()> {
    info!("TLS listener accepting on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = listener.accept().await?;
        let provider = provider.clone();
        let app = app.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, provider, app).await {
                // Scanners and dropped handshakes are routine.
                debug!("connection from {} ended: {:#}", peer, e);
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    provider: Arc<TlsContextProvider>,
    app: Router,
) -> Result<()> {
    let acceptor = LazyConfigAcceptor::new(rustls::server::Acceptor::default(), stream);
    let start = acceptor.await?;

    let sni = start
        .client_hello()
        .server_name()
        .map(|name| name.to_string());
    let key = provider.context_for(sni.as_deref()).await;

    let config = TlsContextProvider::server_config(key);
    let tls = start.into_stream(config).await?;

    hyper::server::conn::http1::Builder::new()
        .serve_connection(TokioIo::new(tls), TowerToHyperService::new(app))
        .await?;
    Ok(())
}
