//! The poll thread: one OS thread that waits for socket readiness across all
//! registered sessions and runs their protocol processing.
//!
//! Each pass of the loop:
//!
//! 1. Sets the blocked marker.
//! 2. Snapshots the registry and asks every session for its poll interest.
//! 3. Waits in `poll(2)` on the interested sockets plus the wake channel.
//! 4. Clears the blocked marker and processes every ready session under its
//!    gate.
//! 5. Drains the wake channel if it fired.
//!
//! Callers that change what a session is interested in (a registration, a
//! channel write) call [`PollThread::interrupt`] so the loop recomputes its
//! wait set. Interrupts only write a wake byte when the loop is blocked, so
//! bursts of interrupts cost at most one byte per pass.

use std::io;
use std::os::fd::{AsFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollTimeout};
use once_cell::sync::OnceCell;
use protocol::PollFlags;

use super::registry::{RegistryEntry, SessionRegistry};
use super::wake::WakeChannel;
use crate::config::RuntimeConfig;
use crate::session::{Session, SessionId};

/// Name of the process-wide poll thread.
pub const DEFAULT_POLL_THREAD_NAME: &str = "ssh-poll";

/// Pause after an unexpected `poll(2)` failure before retrying.
const POLL_ERROR_BACKOFF: Duration = Duration::from_millis(10);

static GLOBAL: OnceCell<PollThread> = OnceCell::new();

struct Shared {
    name: String,
    registry: SessionRegistry,
    wake: WakeChannel,
    /// True while the loop is (about to be) blocked in `poll(2)`.
    blocked: AtomicBool,
    stopping: AtomicBool,
    global: bool,
}

/// Handle to a running poll thread. Cheap to clone.
#[derive(Clone)]
pub struct PollThread {
    shared: Arc<Shared>,
}

/// Proof of a session's registration, consumed by
/// [`PollThread::remove_session`].
#[derive(Debug)]
pub struct Registration {
    key: RawFd,
    session_id: SessionId,
}

impl Registration {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

impl PollThread {
    /// Returns the process-wide poll thread, starting it on first use.
    ///
    /// The global thread lives for the rest of the process.
    pub fn global() -> io::Result<PollThread> {
        GLOBAL
            .get_or_try_init(|| Self::spawn(DEFAULT_POLL_THREAD_NAME, true))
            .cloned()
    }

    /// Starts a dedicated poll thread, stopped with [`shutdown`](Self::shutdown).
    pub fn start(name: &str) -> io::Result<PollThread> {
        Self::spawn(name, false)
    }

    /// Starts a dedicated poll thread named by the runtime configuration.
    pub fn from_config(config: &RuntimeConfig) -> io::Result<PollThread> {
        Self::start(&config.poll_thread_name)
    }

    fn spawn(name: &str, global: bool) -> io::Result<PollThread> {
        let shared = Arc::new(Shared {
            name: name.to_string(),
            registry: SessionRegistry::new(),
            wake: WakeChannel::new()?,
            blocked: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            global,
        });

        let loop_shared = shared.clone();
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(&loop_shared))?;

        tracing::info!(thread = %name, global, "Poll thread started");
        Ok(PollThread { shared })
    }

    /// Name of the OS thread running the loop.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Registers a session and wakes the loop so it is polled promptly.
    pub fn add_session(&self, session: &Arc<Session>) -> io::Result<Registration> {
        let poll_socket = session.try_clone_socket()?;
        let entry = Arc::new(RegistryEntry::new(poll_socket, session));
        let key = entry.key();

        if !self.shared.registry.insert(entry) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("poll socket {key} is already registered"),
            ));
        }
        self.interrupt();

        tracing::debug!(
            session_id = %session.id(),
            fd = key,
            sessions = self.shared.registry.len(),
            "Session added to poll thread"
        );
        Ok(Registration {
            key,
            session_id: session.id().clone(),
        })
    }

    /// Unregisters a session. The loop stops polling its socket on the next
    /// pass. Returns false if the session was no longer registered.
    pub fn remove_session(&self, registration: Registration) -> bool {
        let removed = self.shared.registry.remove(registration.key).is_some();
        self.interrupt();

        tracing::debug!(
            session_id = %registration.session_id,
            removed,
            "Session removed from poll thread"
        );
        removed
    }

    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Wakes the loop if it is blocked waiting for readiness.
    pub fn interrupt(&self) {
        if self
            .shared
            .blocked
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            if let Err(e) = self.shared.wake.wake() {
                tracing::warn!(error = %e, "Failed to wake poll thread");
            }
        }
    }

    /// Stops a dedicated poll thread after its current pass. Has no effect on
    /// the global thread.
    pub fn shutdown(&self) {
        if self.shared.global {
            return;
        }
        if self.shared.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.shared.wake.wake() {
            tracing::warn!(error = %e, "Failed to wake poll thread for shutdown");
        }
    }
}

impl std::fmt::Debug for PollThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollThread")
            .field("name", &self.shared.name)
            .field("sessions", &self.shared.registry.len())
            .field("global", &self.shared.global)
            .finish()
    }
}

fn to_poll_events(interest: PollFlags) -> nix::poll::PollFlags {
    let mut events = nix::poll::PollFlags::empty();
    if interest.is_read_pending() {
        events |= nix::poll::PollFlags::POLLIN;
    }
    if interest.is_write_pending() {
        events |= nix::poll::PollFlags::POLLOUT;
    }
    events
}

fn run(shared: &Shared) {
    tracing::debug!(thread = %shared.name, "Poll loop running");
    let mut ready: Vec<Arc<RegistryEntry>> = Vec::new();

    while !shared.stopping.load(Ordering::SeqCst) {
        shared.blocked.store(true, Ordering::SeqCst);

        let mut interested = Vec::new();
        for entry in shared.registry.snapshot() {
            let Some(session) = entry.session() else {
                continue;
            };
            let events = to_poll_events(session.poll_interest());
            if !events.is_empty() {
                interested.push((entry, events));
            }
        }

        let wake_ready = {
            let mut fds = Vec::with_capacity(interested.len() + 1);
            fds.push(PollFd::new(shared.wake.as_fd(), nix::poll::PollFlags::POLLIN));
            for (entry, events) in &interested {
                fds.push(PollFd::new(entry.as_fd(), *events));
            }

            let result = poll(&mut fds, PollTimeout::NONE);
            shared.blocked.store(false, Ordering::SeqCst);

            match result {
                Ok(_) => {}
                Err(Errno::EINTR) | Err(Errno::EBADF) => continue,
                Err(e) => {
                    tracing::error!(error = %e, "Poll wait failed");
                    thread::sleep(POLL_ERROR_BACKOFF);
                    continue;
                }
            }

            let is_ready = |fd: &PollFd<'_>| fd.revents().is_some_and(|r| !r.is_empty());
            for (fd, (entry, _)) in fds[1..].iter().zip(&interested) {
                if is_ready(fd) {
                    ready.push(entry.clone());
                }
            }
            is_ready(&fds[0])
        };

        for entry in ready.drain(..) {
            if !shared.registry.contains(entry.key()) {
                continue;
            }
            if let Some(session) = entry.session() {
                session.process_pending(entry.as_fd());
            }
        }

        if wake_ready {
            if let Err(e) = shared.wake.drain() {
                tracing::warn!(error = %e, "Failed to drain wake channel");
            }
        }
    }

    tracing::info!(thread = %shared.name, "Poll thread stopped");
}
