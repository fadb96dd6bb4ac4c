//! Channel contract between the runtime and the SSH protocol layer.
//!
//! A channel is one logical multiplexed stream inside a session: a remote
//! command's standard streams, a forwarded TCP or Unix connection, or a
//! subsystem such as SFTP. The protocol layer owns the wire-level buffering;
//! this module only describes what a reader of the channel observes.

use std::future::Future;
use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Which stream a chunk of channel data belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Regular channel data (a command's standard output).
    StandardOutput,
    /// Extended data of type stderr.
    StandardError,
}

/// Outcome of a single channel read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadType {
    /// Bytes were copied into the standard output destination.
    StandardOutput,
    /// Bytes were copied into the standard error destination.
    StandardError,
    /// End of a data segment. No bytes were produced; callers retry and never
    /// surface this to their own callers.
    Eof,
    /// The channel is closed. Terminal: every later read returns `Closed`
    /// and the exit status, if any, is available.
    Closed,
}

impl ReadType {
    /// Returns true for the terminal `Closed` state.
    pub fn is_closed(self) -> bool {
        matches!(self, ReadType::Closed)
    }
}

impl From<StreamKind> for ReadType {
    fn from(kind: StreamKind) -> Self {
        match kind {
            StreamKind::StandardOutput => ReadType::StandardOutput,
            StreamKind::StandardError => ReadType::StandardError,
        }
    }
}

/// What the caller asks the protocol layer to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRequest {
    /// Run a command on the remote host (`exec` request on a session channel).
    Exec {
        /// The command line passed to the remote shell.
        command: String,
    },
    /// Connect to a TCP endpoint reachable from the remote host (`direct-tcpip`).
    DirectTcp {
        /// Target host name or address.
        host: String,
        /// Target port.
        port: u16,
    },
    /// Connect to a Unix socket on the remote host (`direct-streamlocal`).
    DirectStreamLocal {
        /// Path of the remote socket.
        path: PathBuf,
    },
    /// Start a subsystem such as `sftp` on a session channel.
    Subsystem {
        /// Subsystem name.
        name: String,
    },
}

impl ChannelRequest {
    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelRequest::Exec { .. } => "exec",
            ChannelRequest::DirectTcp { .. } => "direct-tcpip",
            ChannelRequest::DirectStreamLocal { .. } => "direct-streamlocal",
            ChannelRequest::Subsystem { .. } => "subsystem",
        }
    }
}

/// An asynchronous, multiplexed byte channel.
///
/// Every operation takes a cancellation token. Cancelling unblocks the
/// waiting caller with [`ProtocolError::Cancelled`](crate::ProtocolError::Cancelled)
/// and leaves the channel usable for another read or for disposal.
pub trait Channel: Send {
    /// Reads the next chunk of data.
    ///
    /// At most one stream kind is drained per call, into the destination of
    /// that kind. Data for a kind whose destination is `None` is discarded.
    /// Returns the read type and the number of bytes copied.
    fn read(
        &mut self,
        stdout: Option<&mut [u8]>,
        stderr: Option<&mut [u8]>,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(ReadType, usize)>> + Send;

    /// Queues `data` for sending, waiting while the outbound buffer is full.
    fn write(
        &mut self,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<()>> + Send;

    /// The remote exit status, populated once the remote process terminated.
    fn exit_code(&self) -> Option<i32>;

    /// Releases the channel. Idempotent.
    fn dispose(&mut self);
}
