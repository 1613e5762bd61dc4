/// TLS Context Provider - per-handshake certificate selection
///
/// Certificates are selected by SNI hostname: exact binding, then a
/// wildcard binding for the parent, then on-demand issuance through the
/// certificate authority client, then the static default pair. Selection
/// runs in the handshake path and never fails; issuance is bounded by a
/// timeout after which the default pair is used.

pub mod ca;
pub mod provider;
pub mod store;

pub use ca::SelfSignedAuthority;
pub use provider::TlsContextProvider;
pub use store::CertificateStore;

/// Certificate errors
#[derive(Debug, thiserror::Error)]
pub enum CertificateError {
    #[error("certificate issuance failed: {0}")]
    IssuanceFailed(String),

    #[error("invalid certificate material: {0}")]
    InvalidMaterial(String),
}
