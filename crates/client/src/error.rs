//! Error types for the client runtime.

use protocol::ProtocolError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors returned by clients, processes and data streams.
#[derive(Error, Debug)]
pub enum Error {
    /// The caller cancelled the operation. The channel and session stay usable.
    #[error("operation cancelled")]
    Cancelled,

    /// The call is not valid in the object's current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),

    /// The remote process closed its channel without an exit status.
    #[error("remote process exited without reporting an exit status")]
    NoExitStatus,

    /// A fault reported by the session or channel.
    #[error(transparent)]
    Protocol(ProtocolError),

    /// Invalid runtime or process configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error, from the OS or from a caller-supplied sink.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true if this error is a cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Cancelled => Error::Cancelled,
            other => Error::Protocol(other),
        }
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
