//! Error types for the knowledge memory engine.

/// Result type alias used throughout memory-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the storage, lifecycle, retrieval and ledger layers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Adapter error: {0}")]
    Adapter(String),

    #[error("Knowledge item not found: {0}")]
    NotFound(i64),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state transition: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error represents a transient fault a caller may retry,
    /// as opposed to a structural fault that will recur on retry.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Storage(_) => true,
            Error::Adapter(_) => true,
            Error::NotFound(_) => false,
            Error::SessionNotFound(_) => false,
            Error::Serialization(_) => false,
            Error::InvalidArgument(_) => false,
            Error::InvalidState(_) => false,
            Error::Io(_) => true,
        }
    }
}
