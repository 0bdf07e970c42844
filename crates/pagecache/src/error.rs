//! Error types for pagecache

use std::fmt;

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for cache operations
#[derive(Debug)]
pub enum Error {
    /// Persistent store failure
    Store(pagestore::Error),

    /// Payload could not be encoded or decoded
    Codec(String),

    /// Rejected configuration
    InvalidConfig(String),

    /// A live helper is already bound to this tag
    AlreadyAttached(String),

    /// The cache has been shut down
    ShutDown,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Store(e) => write!(f, "Store error: {}", e),
            Error::Codec(msg) => write!(f, "Codec error: {}", msg),
            Error::InvalidConfig(msg) => write!(f, "Invalid config: {}", msg),
            Error::AlreadyAttached(tag) => write!(f, "Tag '{}' is already attached", tag),
            Error::ShutDown => write!(f, "Cache is shut down"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<pagestore::Error> for Error {
    fn from(err: pagestore::Error) -> Self {
        Error::Store(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Codec(err.to_string())
    }
}
