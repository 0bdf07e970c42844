//! Error types for pagestore

use std::fmt;
use std::io;

/// Result type alias for pagestore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for store operations
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(io::Error),

    /// Parse error (corrupt header or record frame)
    Parse(String),

    /// Record body too large (max 1 MB)
    ValueTooLarge(usize),

    /// Store file full (max 1 GB)
    DatabaseFull(u64),

    /// Store is closed
    Closed,

    /// Backend refused the operation
    Unavailable(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Parse(msg) => write!(f, "Parse error: {}", msg),
            Error::ValueTooLarge(size) => write!(f, "Record too large: {} bytes (max 1 MB)", size),
            Error::DatabaseFull(size) => write!(f, "Store full: {} bytes (max 1 GB)", size),
            Error::Closed => write!(f, "Store is closed"),
            Error::Unavailable(msg) => write!(f, "Store unavailable: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<nom::Err<nom::error::Error<&[u8]>>> for Error {
    fn from(err: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        Error::Parse(format!("{:?}", err))
    }
}
