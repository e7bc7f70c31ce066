use std::fmt;
use std::io;

/// Unified error type for the storage engine.
///
/// Key-not-found is deliberately *not* an error: reads return `Ok(None)`.
/// A membership-filter false positive is recovered internally by routing
/// to the next level and never surfaces here.
#[derive(Debug)]
pub enum Error {
    /// IO error from disk operations.
    Io(io::Error),
    /// Data corruption detected (length prefix overruns the file,
    /// CRC mismatch, bad format).
    Corruption(String),
    /// Bad construction input: empty key range, zero fan-out,
    /// out-of-range filter probability, malformed record.
    InvalidParameter(String),
    /// The write buffer was asked to hold more than its capacity.
    /// Unreachable while the swap-at-capacity discipline holds; seeing
    /// it means a concurrency bug, so it is fatal to the write path.
    CapacityExceeded,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {e}"),
            Error::Corruption(msg) => write!(f, "Corruption: {msg}"),
            Error::InvalidParameter(msg) => write!(f, "Invalid parameter: {msg}"),
            Error::CapacityExceeded => write!(f, "Buffer capacity exceeded"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;
