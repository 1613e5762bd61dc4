/// OnionENS Daemon Library
///
/// Wire clients for the external collaborators, the HTTP routers for
/// both listeners, and the SNI-aware TLS accept loop.

pub mod backends;
pub mod router;
pub mod tls_listener;

pub use backends::{EthRpcNaming, IpfsApiStorage, TorrcController};
pub use router::{clearnet_app, onion_app, Gateway};
