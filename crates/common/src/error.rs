use thiserror::Error;

/// Transport-level failures from the external collaborators.
///
/// Every backend client (naming RPC, storage daemon, onion controller,
/// certificate authority) reports through this one type so the core
/// components can translate failures into their own error taxonomies
/// without knowing which wire protocol was involved.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend rejected request: {0}")]
    Rejected(String),

    #[error("malformed backend response: {0}")]
    Malformed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BackendError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

/// Result type for backend calls
pub type BackendResult<T> = std::result::Result<T, BackendError>;
