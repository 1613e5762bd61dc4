/// Shared types for the onionens gateway
///
/// This crate holds the domain vocabulary used by every other crate:
/// content identifiers, resolution results, the gateway configuration,
/// and the common backend error type.

pub mod config;
pub mod error;
pub mod types;

pub use config::{ConfigError, GatewayConfig};
pub use error::{BackendError, BackendResult};
pub use types::{ContentId, ContentIdError, ContentKind, ResolvedName};
