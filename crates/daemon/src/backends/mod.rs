/// Wire clients for the gateway's external collaborators

pub mod eth;
pub mod ipfs;
pub mod torrc;

pub use eth::EthRpcNaming;
pub use ipfs::IpfsApiStorage;
pub use torrc::TorrcController;
