//! Sessions and the driver seam to the SSH protocol layer.
//!
//! A [`Session`] is one transport connection. Its protocol state lives in a
//! [`SessionDriver`] supplied by the protocol layer; the session wraps the
//! driver in a gate so the poll thread and synchronous callers never advance
//! the same protocol state concurrently.

use std::io;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use protocol::{ChannelRequest, PollFlags, ProtocolError};
use tokio::sync::Notify;
use uuid::Uuid;

use super::channel::ChannelEndpoint;

/// Unique identifier for a session, used in logs.
pub type SessionId = String;

/// The protocol state machine of one SSH connection.
///
/// Every method is called with the session's gate held, either from the poll
/// thread or from a caller opening channels or disconnecting. Implementations
/// must never block: `process` performs one non-blocking pass.
pub trait SessionDriver: AsFd + Send + 'static {
    /// Socket events the driver is currently waiting for.
    fn poll_interest(&self) -> PollFlags;

    /// Advances protocol state by one non-blocking pass and delivers any
    /// buffered data to open channels. Redundant calls must be harmless.
    fn process(&mut self, socket: BorrowedFd<'_>) -> protocol::Result<()>;

    /// Whether the transport has been closed.
    fn is_closed(&self) -> bool;

    /// Whether key exchange and authentication completed.
    fn is_established(&self) -> bool;

    /// Starts opening a channel. The driver keeps `endpoint` and resolves it
    /// with `confirm` or `reject` once the remote side answers.
    fn open_channel(
        &mut self,
        request: ChannelRequest,
        endpoint: ChannelEndpoint,
    ) -> protocol::Result<()>;

    /// Tears down the connection. Called once, when the owning client is
    /// disposed.
    fn disconnect(&mut self);
}

/// One transport connection, gated for exclusive protocol processing.
pub struct Session {
    /// Unique session identifier.
    id: SessionId,
    /// The gate: all protocol processing happens with this lock held.
    gate: Mutex<Box<dyn SessionDriver>>,
    /// Set once the owning client is disposed or the driver misbehaved.
    closed: AtomicBool,
    /// Signalled after every processing pass.
    progress: Notify,
}

impl Session {
    /// Wraps a driver in a new session.
    pub fn new<D: SessionDriver>(driver: D) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            gate: Mutex::new(Box::new(driver)),
            closed: AtomicBool::new(false),
            progress: Notify::new(),
        })
    }

    /// Returns the session ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns whether the session was closed by its owner or isolated after
    /// a driver fault.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Marks the session closed. Returns true for the call that closed it.
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    /// Notified after each processing pass and when the session closes.
    pub fn progress(&self) -> &Notify {
        &self.progress
    }

    /// Runs `f` with the gate held.
    ///
    /// This is the synchronous entry point into the session; it serializes
    /// with the poll thread's processing passes.
    pub fn with_driver<R>(
        &self,
        f: impl FnOnce(&mut dyn SessionDriver) -> R,
    ) -> protocol::Result<R> {
        let mut driver = self.lock()?;
        Ok(f(&mut **driver))
    }

    /// Duplicates the driver's socket into a handle owned by the poll thread.
    pub(crate) fn try_clone_socket(&self) -> io::Result<OwnedFd> {
        let driver = self
            .lock()
            .map_err(|e| io::Error::new(io::ErrorKind::NotConnected, e))?;
        driver.as_fd().try_clone_to_owned()
    }

    /// Current poll interest, or none once the session or transport closed.
    pub(crate) fn poll_interest(&self) -> PollFlags {
        if self.is_closed() {
            return PollFlags::NONE;
        }
        match self.lock() {
            Ok(driver) if !driver.is_closed() => driver.poll_interest(),
            _ => PollFlags::NONE,
        }
    }

    /// Runs one processing pass on behalf of the poll thread.
    ///
    /// Driver errors are logged and swallowed. A panicking driver closes its
    /// session so it cannot stall the loop again; other sessions are
    /// unaffected.
    pub(crate) fn process_pending(&self, socket: BorrowedFd<'_>) {
        if self.is_closed() {
            return;
        }

        {
            let Ok(mut driver) = self.lock() else {
                tracing::warn!(session_id = %self.id, "Skipping session with poisoned gate");
                return;
            };
            if driver.is_closed() {
                return;
            }

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| driver.process(socket)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(
                        session_id = %self.id,
                        error = %e,
                        "Session processing failed"
                    );
                }
                Err(_) => {
                    tracing::error!(
                        session_id = %self.id,
                        "Session driver panicked, closing session"
                    );
                    self.closed.store(true, Ordering::SeqCst);
                }
            }
        }

        self.progress.notify_waiters();
    }

    fn lock(&self) -> protocol::Result<MutexGuard<'_, Box<dyn SessionDriver>>> {
        self.gate.lock().map_err(|_| ProtocolError::SessionClosed)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
