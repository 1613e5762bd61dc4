/// Gateway routers for both listeners
///
/// The public listener resolves the Host header against the blockchain
/// registry and serves the cached payload (or redirects to its onion
/// address); the hidden-service listener reverse-maps the onion
/// hostname back to an identifier and serves the same cached bytes.
/// Resolution failures are reported as plain-text pages to the visitor
/// rather than bare status codes.

pub mod host;

use axum::body::Body;
use axum::extract::{Host, State};
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use host::parse_host;
use onionens_common::config::gateway;
use onionens_common::GatewayConfig;
use onionens_core::cache::{CacheEntry, CacheError, ContentCache, EntryForm};
use onionens_core::onion::HiddenServiceDirectory;
use onionens_core::resolver::{NameResolver, ResolutionError};
use std::path::{Component, Path};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{debug, warn};

const MSG_LANDING: &str =
    "This gateway serves blockchain-registered names. Visit <name>.<gateway domain> \
     to browse a registered site.";
const MSG_NOT_REGISTERED: &str =
    "This name is not registered, or has no content published under it.";
const MSG_UNSUPPORTED: &str =
    "This name is registered, but its record does not point at content this gateway can serve.";
const MSG_BACKEND_DOWN: &str =
    "The gateway's resolution backends are currently unavailable. Please try again shortly.";
const MSG_NO_STATIC: &str =
    "This name's content has no static entry page, so it cannot be served as a website.";
const MSG_FETCH_FAILED: &str =
    "The gateway could not retrieve this name's content from the storage network.";
const MSG_NO_ONION: &str =
    "No hidden-service address could be provisioned for this name. Please try again shortly.";
const MSG_REVERSE_FAILED: &str =
    "This hidden service is not mapped to any content on this gateway.";
const MSG_NOT_CACHED: &str =
    "This content is not cached on the gateway yet. Visit its public name first.";

/// Shared state behind both routers.
pub struct Gateway {
    pub config: GatewayConfig,
    pub resolver: Arc<NameResolver>,
    pub cache: Arc<ContentCache>,
    pub onions: Arc<HiddenServiceDirectory>,
}

/// Router for the public TLS listener.
pub fn clearnet_app(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .fallback(clearnet_handler)
        .layer(CorsLayer::permissive())
        .with_state(gateway)
}

/// Router for the local listener hidden services forward to.
pub fn onion_app(gateway: Arc<Gateway>) -> Router {
    Router::new().fallback(onion_handler).with_state(gateway)
}

/// Failure pages go out as OK so browsers render the text instead of
/// swapping in their own error page.
fn notice(message: &'static str) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        message,
    )
        .into_response()
}

async fn clearnet_handler(
    State(gateway): State<Arc<Gateway>>,
    Host(host): Host,
    uri: Uri,
) -> Response {
    let Some(requested) = parse_host(
        &host,
        &gateway.config.gateway_suffix,
        &gateway.config.onion_marker,
    ) else {
        return notice(MSG_LANDING);
    };

    debug!(
        "clearnet request for {} (onion mode: {})",
        requested.label, requested.onion_mode
    );

    let resolved = match gateway.resolver.resolve(&requested.label).await {
        Ok(resolved) => resolved,
        Err(ResolutionError::NotFound) => return notice(MSG_NOT_REGISTERED),
        Err(ResolutionError::Unsupported) => return notice(MSG_UNSUPPORTED),
        Err(ResolutionError::BackendUnavailable(reason)) => {
            warn!("resolution failed for {}: {}", requested.label, reason);
            return notice(MSG_BACKEND_DOWN);
        }
    };

    let entry = match gateway.cache.ensure_cached(&resolved.id).await {
        Ok(entry) => entry,
        Err(CacheError::NoStaticContent) => return notice(MSG_NO_STATIC),
        Err(err) => {
            warn!("cache fill failed for {}: {}", resolved.id, err);
            return notice(MSG_FETCH_FAILED);
        }
    };

    if requested.onion_mode {
        return match gateway.onions.address_for(&resolved.id).await {
            Ok(hostname) => onion_redirect(&hostname),
            Err(err) => {
                warn!("onion provisioning failed for {}: {}", resolved.id, err);
                notice(MSG_NO_ONION)
            }
        };
    }

    serve_entry(&entry, uri.path()).await
}

async fn onion_handler(
    State(gateway): State<Arc<Gateway>>,
    Host(host): Host,
    uri: Uri,
) -> Response {
    let hostname = host
        .rsplit_once(':')
        .map(|(name, _port)| name)
        .unwrap_or(&host);

    let id = match gateway.onions.identifier_for(hostname).await {
        Ok(Some(id)) => id,
        Ok(None) => return notice(MSG_REVERSE_FAILED),
        Err(err) => {
            warn!("reverse lookup failed for {}: {}", hostname, err);
            return notice(MSG_REVERSE_FAILED);
        }
    };

    // Hidden services are only provisioned for already-cached content,
    // so a miss here means the cache was cleared out from under us.
    match gateway.cache.lookup(&id).await {
        Some(entry) => serve_entry(&entry, uri.path()).await,
        None => notice(MSG_NOT_CACHED),
    }
}

/// Redirect onto the plain-HTTP onion origin; the anonymity network
/// provides the transport security TLS would.
fn onion_redirect(hostname: &str) -> Response {
    (
        StatusCode::MOVED_PERMANENTLY,
        [(header::LOCATION, format!("http://{}/", hostname))],
    )
        .into_response()
}

/// Serve one request path out of a ready cache entry.
async fn serve_entry(entry: &CacheEntry, request_path: &str) -> Response {
    let file = match entry.form {
        // A single rendered page answers every path.
        EntryForm::SingleFile => entry.path.clone(),
        EntryForm::Directory => {
            let Some(relative) = sanitize_path(request_path) else {
                return StatusCode::NOT_FOUND.into_response();
            };
            let mut file = entry.path.join(relative);
            if file.is_dir() {
                file = file.join(gateway::ENTRY_POINT);
            }
            file
        }
    };

    match tokio::fs::read(&file).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, content_type_for(&file))],
            Body::from(bytes),
        )
            .into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Normalize a request path to a safe relative path inside the entry.
fn sanitize_path(request_path: &str) -> Option<std::path::PathBuf> {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Some(gateway::ENTRY_POINT.into());
    }

    let mut clean = std::path::PathBuf::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            // Traversal and absolute components never escape the entry.
            _ => return None,
        }
    }

    if clean.as_os_str().is_empty() {
        return Some(gateway::ENTRY_POINT.into());
    }
    Some(clean)
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "text/javascript",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("txt") => "text/plain; charset=utf-8",
        Some("wasm") => "application/wasm",
        Some("woff2") => "font/woff2",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::Request;
    use onionens_common::ContentId;
    use onionens_core::backend::memory::{MemoryNaming, MemoryOnionController, MemoryStorage};
    use onionens_core::backend::ContentRecord;
    use tower::ServiceExt;

    fn test_id(seed: u8) -> ContentId {
        let mut mh = vec![0x12, 0x20];
        mh.extend_from_slice(&[seed; 32]);
        ContentId::from_cid_bytes(&mh).unwrap()
    }

    fn site_tar(id: &ContentId) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, body) in [
            (format!("{}/index.html", id.as_str()), "<html>home</html>"),
            (format!("{}/style.css", id.as_str()), "body {}"),
        ] {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, body.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap()
    }

    struct Fixture {
        gateway: Arc<Gateway>,
        naming: Arc<MemoryNaming>,
        storage: Arc<MemoryStorage>,
        _cache_dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let cache_dir = tempfile::tempdir().unwrap();
        let naming = Arc::new(MemoryNaming::new());
        let storage = Arc::new(MemoryStorage::new());
        let controller = Arc::new(MemoryOnionController::new());

        let config = GatewayConfig::default();
        let gateway = Arc::new(Gateway {
            resolver: Arc::new(NameResolver::new(naming.clone(), storage.clone())),
            cache: Arc::new(ContentCache::new(cache_dir.path(), storage.clone())),
            onions: Arc::new(HiddenServiceDirectory::new(
                controller,
                config.onion_port,
            )),
            config,
        });

        Fixture {
            gateway,
            naming,
            storage,
            _cache_dir: cache_dir,
        }
    }

    async fn get(app: Router, host: &str, path: &str) -> (StatusCode, Response) {
        let request = Request::builder()
            .uri(path)
            .header(header::HOST, host)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        (response.status(), response)
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn serves_registered_site() {
        let fx = fixture();
        let id = test_id(1);
        fx.naming.insert_immutable("example", &id).await;
        fx.storage.insert_payload(&id, site_tar(&id)).await;

        let app = clearnet_app(fx.gateway.clone());
        let (status, response) = get(app, "example.3th.ws", "/").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body_text(response).await, "<html>home</html>");
    }

    #[tokio::test]
    async fn serves_site_behind_mutable_pointer() {
        let fx = fixture();
        let id = test_id(9);
        let pointer = b"k51qzi5uqu5dgutdk6i1".to_vec();
        fx.naming.insert_pointer("example", &pointer).await;
        fx.storage
            .insert_pointer(&pointer, vec![format!("/ipfs/{}", id)])
            .await;
        fx.storage.insert_payload(&id, site_tar(&id)).await;

        let app = clearnet_app(fx.gateway.clone());
        let (status, response) = get(app, "example.3th.ws", "/").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body_text(response).await, "<html>home</html>");
    }

    #[tokio::test]
    async fn serves_nested_assets() {
        let fx = fixture();
        let id = test_id(2);
        fx.naming.insert_immutable("example", &id).await;
        fx.storage.insert_payload(&id, site_tar(&id)).await;

        let app = clearnet_app(fx.gateway.clone());
        let (status, response) = get(app, "example.3th.ws", "/style.css").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/css"
        );
    }

    #[tokio::test]
    async fn missing_asset_is_not_found() {
        let fx = fixture();
        let id = test_id(3);
        fx.naming.insert_immutable("example", &id).await;
        fx.storage.insert_payload(&id, site_tar(&id)).await;

        let app = clearnet_app(fx.gateway.clone());
        let (status, _) = get(app, "example.3th.ws", "/missing.png").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unregistered_label_gets_notice_page() {
        let fx = fixture();
        let app = clearnet_app(fx.gateway.clone());
        let (status, response) = get(app, "nobody.3th.ws", "/").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body_text(response).await, MSG_NOT_REGISTERED);
    }

    #[tokio::test]
    async fn foreign_namespace_record_gets_unsupported_notice() {
        let fx = fixture();
        fx.naming
            .insert_raw("swarmsite", ContentRecord::Unrecognized)
            .await;

        let app = clearnet_app(fx.gateway.clone());
        let (status, response) = get(app, "swarmsite.3th.ws", "/").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body_text(response).await, MSG_UNSUPPORTED);
    }

    #[tokio::test]
    async fn bare_gateway_domain_gets_landing_page() {
        let fx = fixture();
        let app = clearnet_app(fx.gateway.clone());
        let (status, response) = get(app, "3th.ws", "/").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body_text(response).await, MSG_LANDING);
    }

    #[tokio::test]
    async fn backend_outage_gets_notice_page() {
        let fx = fixture();
        fx.naming.set_unavailable(true);

        let app = clearnet_app(fx.gateway.clone());
        let (status, response) = get(app, "example.3th.ws", "/").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body_text(response).await, MSG_BACKEND_DOWN);
    }

    #[tokio::test]
    async fn onion_mode_redirects_to_hidden_service() {
        let fx = fixture();
        let id = test_id(4);
        fx.naming.insert_immutable("example", &id).await;
        fx.storage.insert_payload(&id, site_tar(&id)).await;

        let app = clearnet_app(fx.gateway.clone());
        let (status, response) = get(app, "onion.example.3th.ws", "/").await;

        assert_eq!(status, StatusCode::MOVED_PERMANENTLY);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert!(location.starts_with("http://"));
        assert!(location.contains(".onion"));
    }

    #[tokio::test]
    async fn onion_listener_serves_mapped_content() {
        let fx = fixture();
        let id = test_id(5);
        fx.naming.insert_immutable("example", &id).await;
        fx.storage.insert_payload(&id, site_tar(&id)).await;

        // Cache and provision through the public path first.
        let clearnet = clearnet_app(fx.gateway.clone());
        let (_, response) = get(clearnet, "onion.example.3th.ws", "/").await;
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        let onion_host = location
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_string();

        let app = onion_app(fx.gateway.clone());
        let (status, response) = get(app, &onion_host, "/").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body_text(response).await, "<html>home</html>");
    }

    #[tokio::test]
    async fn unmapped_onion_host_gets_notice_page() {
        let fx = fixture();
        let app = onion_app(fx.gateway.clone());
        let (status, response) = get(app, "unmapped.onion", "/").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body_text(response).await, MSG_REVERSE_FAILED);
    }

    #[test]
    fn path_sanitization_blocks_traversal() {
        assert_eq!(sanitize_path("/"), Some("index.html".into()));
        assert_eq!(sanitize_path("/a/b.css"), Some("a/b.css".into()));
        assert_eq!(sanitize_path("/../etc/passwd"), None);
        assert_eq!(sanitize_path("/a/../../b"), None);
    }
}
