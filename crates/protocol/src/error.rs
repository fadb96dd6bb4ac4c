//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering the failures a channel or session can report.
///
/// The type is `Clone` because a channel fault is sticky: every pending and
/// later operation on the faulted channel observes the same error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    // Connection errors
    /// The transport connection was closed unexpectedly.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// The session was closed or disposed before the operation completed.
    #[error("session closed")]
    SessionClosed,

    /// Operation timed out.
    #[error("operation timed out: {0}")]
    Timeout(String),

    // Channel errors
    /// The channel was closed or disposed before the operation completed.
    #[error("channel closed")]
    ChannelClosed,

    /// The remote side refused to open the channel.
    #[error("channel open failed: {0}")]
    ChannelOpenFailed(String),

    /// The protocol layer failed while moving data for this channel.
    #[error("transport failure: {0}")]
    Transport(String),

    // Cancellation
    /// The caller cancelled the operation. Not a fault: the channel and
    /// session stay usable.
    #[error("operation cancelled")]
    Cancelled,
}

impl ProtocolError {
    /// Returns true if this error is a cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProtocolError::Cancelled)
    }
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::TimedOut => ProtocolError::Timeout(err.to_string()),
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => ProtocolError::ConnectionClosed(err.to_string()),
            _ => ProtocolError::Transport(err.to_string()),
        }
    }
}
