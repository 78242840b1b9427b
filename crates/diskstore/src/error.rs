//! Error types for diskstore and the caches built on it

use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Result type alias for disk cache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error produced by a value codec
pub type CodecError = Box<dyn StdError + Send + Sync + 'static>;

/// Error types for disk cache operations
#[derive(Debug)]
pub enum Error {
    /// I/O error while reading, writing, deleting or scanning
    Io(io::Error),

    /// The value codec failed to serialize or deserialize
    Codec(CodecError),

    /// Configuration rejected when building a cache
    InvalidConfig(String),

    /// The cache or its executor has been shut down
    ShutDown,
}

impl Error {
    /// Wrap a codec failure
    pub fn codec<E>(err: E) -> Self
    where
        E: Into<CodecError>,
    {
        Error::Codec(err.into())
    }

    /// Sort a codec failure into `Io` or `Codec`
    ///
    /// Codecs propagate sink and source failures with `?`, which boxes the
    /// `io::Error`. Those are disk failures, not serialization failures.
    pub fn from_codec(err: CodecError) -> Self {
        match err.downcast::<io::Error>() {
            Ok(io) => Error::Io(*io),
            Err(other) => Error::Codec(other),
        }
    }

    /// Returns true for `Error::Io` with kind `NotFound`
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::NotFound)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Codec(e) => write!(f, "Codec error: {}", e),
            Error::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::ShutDown => write!(f, "Cache has been shut down"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Codec(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}
