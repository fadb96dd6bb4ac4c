//! Channel halves shared between the poll thread and async callers.
//!
//! [`channel_pair`] creates an [`SshChannel`], handed to the caller, and a
//! [`ChannelEndpoint`], handed to the session driver. The driver pushes
//! inbound data through the endpoint from the poll thread and drains outbound
//! data from it; the caller awaits reads and writes on the channel.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Buf, Bytes};
use protocol::{Channel, ProtocolError, ReadType, StreamKind};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::poll::PollThread;

/// Inbound items, consumed in arrival order.
#[derive(Debug)]
enum Inbound {
    Data(StreamKind, Bytes),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
enum OpenState {
    Pending,
    Open,
    Rejected(String),
}

#[derive(Debug)]
struct ChannelState {
    open: OpenState,
    inbound: VecDeque<Inbound>,
    inbound_len: usize,
    outbound: VecDeque<Bytes>,
    outbound_len: usize,
    /// Bytes buffered in each direction before backpressure applies.
    capacity: usize,
    closed: bool,
    exit_code: Option<i32>,
    /// Sticky transport fault.
    fault: Option<ProtocolError>,
    disposed: bool,
}

impl ChannelState {
    /// Terminal error for writes and open waits, if any.
    fn write_error(&self) -> Option<ProtocolError> {
        if let Some(fault) = &self.fault {
            return Some(fault.clone());
        }
        if self.closed || self.disposed {
            return Some(ProtocolError::ChannelClosed);
        }
        None
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<ChannelState>,
    /// Inbound data, EOF, close, fault or open-state change.
    readable: Notify,
    /// Outbound space freed, or the channel became unwritable.
    writable: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify_all(&self) {
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }
}

/// Creates a connected channel and endpoint.
///
/// `capacity` bounds buffered bytes in each direction. When `poll` is set,
/// writes and disposal interrupt that poll thread so the owning session
/// recomputes its interest.
pub fn channel_pair(capacity: usize, poll: Option<PollThread>) -> (SshChannel, ChannelEndpoint) {
    let shared = Arc::new(Shared {
        state: Mutex::new(ChannelState {
            open: OpenState::Pending,
            inbound: VecDeque::new(),
            inbound_len: 0,
            outbound: VecDeque::new(),
            outbound_len: 0,
            capacity: capacity.max(1),
            closed: false,
            exit_code: None,
            fault: None,
            disposed: false,
        }),
        readable: Notify::new(),
        writable: Notify::new(),
    });

    let channel = SshChannel {
        shared: shared.clone(),
        poll,
    };
    let endpoint = ChannelEndpoint {
        shared,
        finished: false,
    };
    (channel, endpoint)
}

/// Caller side of a channel.
#[derive(Debug)]
pub struct SshChannel {
    shared: Arc<Shared>,
    poll: Option<PollThread>,
}

impl SshChannel {
    /// Waits until the remote side confirms or rejects the open request.
    pub async fn wait_open(&self, cancel: &CancellationToken) -> protocol::Result<()> {
        self.wait(&self.shared.readable, cancel, |state| match &state.open {
            OpenState::Open => Some(Ok(())),
            OpenState::Rejected(reason) => {
                Some(Err(ProtocolError::ChannelOpenFailed(reason.clone())))
            }
            OpenState::Pending => state.write_error().map(Err),
        })
        .await?
    }

    /// Returns true once the remote side confirmed the channel.
    pub fn is_open(&self) -> bool {
        self.shared.lock().open == OpenState::Open
    }

    fn interrupt_poll(&self) {
        if let Some(poll) = &self.poll {
            poll.interrupt();
        }
    }

    /// Waits on `notify` until `check` yields a value.
    ///
    /// The notification is armed before `check` runs so a wakeup between the
    /// check and the wait is never lost.
    async fn wait<T>(
        &self,
        notify: &Notify,
        cancel: &CancellationToken,
        mut check: impl FnMut(&mut ChannelState) -> Option<T>,
    ) -> protocol::Result<T> {
        loop {
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.shared.lock();
                if let Some(value) = check(&mut state) {
                    return Ok(value);
                }
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = cancel.cancelled() => return Err(ProtocolError::Cancelled),
            }
        }
    }
}

/// Pops the next readable item into the matching destination.
///
/// Returns `None` when the caller has to wait.
fn take_inbound(
    state: &mut ChannelState,
    mut stdout: Option<&mut [u8]>,
    mut stderr: Option<&mut [u8]>,
) -> Option<protocol::Result<(ReadType, usize)>> {
    while let Some(item) = state.inbound.front_mut() {
        let (kind, data) = match item {
            Inbound::Eof => {
                state.inbound.pop_front();
                return Some(Ok((ReadType::Eof, 0)));
            }
            Inbound::Data(kind, data) => (*kind, data),
        };

        let destination = match kind {
            StreamKind::StandardOutput => stdout.as_deref_mut(),
            StreamKind::StandardError => stderr.as_deref_mut(),
        };

        let Some(destination) = destination else {
            state.inbound_len -= data.len();
            state.inbound.pop_front();
            continue;
        };

        let n = destination.len().min(data.len());
        destination[..n].copy_from_slice(&data[..n]);
        if n == data.len() {
            state.inbound.pop_front();
        } else {
            data.advance(n);
        }
        state.inbound_len -= n;
        return Some(Ok((ReadType::from(kind), n)));
    }

    if let Some(fault) = &state.fault {
        return Some(Err(fault.clone()));
    }
    if state.closed {
        return Some(Ok((ReadType::Closed, 0)));
    }
    if state.disposed {
        return Some(Err(ProtocolError::ChannelClosed));
    }
    None
}

impl Channel for SshChannel {
    async fn read(
        &mut self,
        mut stdout: Option<&mut [u8]>,
        mut stderr: Option<&mut [u8]>,
        cancel: &CancellationToken,
    ) -> protocol::Result<(ReadType, usize)> {
        let mut was_full = false;
        let result = self
            .wait(&self.shared.readable, cancel, |state| {
                let full = state.inbound_len >= state.capacity;
                let taken = take_inbound(state, stdout.as_deref_mut(), stderr.as_deref_mut())?;
                was_full = full && state.inbound_len < state.capacity;
                Some(taken)
            })
            .await?;

        // The driver may have stopped reading the socket while the buffer
        // was full.
        if was_full {
            self.interrupt_poll();
        }
        result
    }

    async fn write(&mut self, data: &[u8], cancel: &CancellationToken) -> protocol::Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        self.wait(&self.shared.writable, cancel, |state| {
            if let Some(err) = state.write_error() {
                return Some(Err(err));
            }
            if state.open != OpenState::Open || state.outbound_len >= state.capacity {
                return None;
            }
            state.outbound.push_back(Bytes::copy_from_slice(data));
            state.outbound_len += data.len();
            Some(Ok(()))
        })
        .await??;

        self.interrupt_poll();
        Ok(())
    }

    fn exit_code(&self) -> Option<i32> {
        self.shared.lock().exit_code
    }

    fn dispose(&mut self) {
        {
            let mut state = self.shared.lock();
            if state.disposed {
                return;
            }
            // Queued writes already returned Ok; the driver still drains them.
            state.disposed = true;
            state.inbound.clear();
            state.inbound_len = 0;
        }
        tracing::trace!("Channel disposed");
        self.shared.notify_all();
        self.interrupt_poll();
    }
}

impl Drop for SshChannel {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Protocol-layer side of a channel, driven from the poll thread.
///
/// Every method is synchronous and never blocks. Dropping an endpoint that
/// was not closed or rejected faults the channel with
/// [`ProtocolError::SessionClosed`].
#[derive(Debug)]
pub struct ChannelEndpoint {
    shared: Arc<Shared>,
    finished: bool,
}

impl ChannelEndpoint {
    /// Marks the channel open.
    pub fn confirm(&self) {
        {
            let mut state = self.shared.lock();
            if state.open != OpenState::Pending {
                return;
            }
            state.open = OpenState::Open;
        }
        self.shared.notify_all();
    }

    /// Rejects the open request.
    pub fn reject(mut self, reason: impl Into<String>) {
        self.shared.lock().open = OpenState::Rejected(reason.into());
        self.finished = true;
        self.shared.notify_all();
    }

    /// Buffers inbound data. Data for a disposed channel is dropped.
    pub fn deliver(&self, kind: StreamKind, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        {
            let mut state = self.shared.lock();
            if state.disposed || state.closed {
                return;
            }
            state.inbound_len += data.len();
            state
                .inbound
                .push_back(Inbound::Data(kind, Bytes::copy_from_slice(data)));
        }
        self.shared.readable.notify_waiters();
    }

    /// Marks the end of a data segment.
    pub fn deliver_eof(&self) {
        {
            let mut state = self.shared.lock();
            if state.disposed || state.closed {
                return;
            }
            state.inbound.push_back(Inbound::Eof);
        }
        self.shared.readable.notify_waiters();
    }

    /// Closes the channel, recording the remote exit status if one arrived.
    pub fn close(mut self, exit_code: Option<i32>) {
        {
            let mut state = self.shared.lock();
            state.closed = true;
            state.exit_code = exit_code;
        }
        self.finished = true;
        self.shared.notify_all();
    }

    /// Faults the channel. Every pending and later operation fails with `err`
    /// once buffered data is consumed.
    pub fn fail(mut self, err: ProtocolError) {
        self.set_fault(err);
        self.finished = true;
    }

    /// Takes the next chunk of outbound data.
    pub fn take_outbound(&self) -> Option<Bytes> {
        let chunk = {
            let mut state = self.shared.lock();
            let chunk = state.outbound.pop_front()?;
            state.outbound_len -= chunk.len();
            chunk
        };
        self.shared.writable.notify_waiters();
        Some(chunk)
    }

    /// Returns true if outbound data is waiting to be sent.
    pub fn has_outbound(&self) -> bool {
        !self.shared.lock().outbound.is_empty()
    }

    /// Bytes delivered but not yet read.
    pub fn buffered_len(&self) -> usize {
        self.shared.lock().inbound_len
    }

    /// Returns true while the reader can accept more data without exceeding
    /// the channel's buffer capacity.
    pub fn has_capacity(&self) -> bool {
        let state = self.shared.lock();
        state.inbound_len < state.capacity
    }

    /// Returns true once the caller disposed its side.
    pub fn is_disposed(&self) -> bool {
        self.shared.lock().disposed
    }

    /// Returns true once the caller disposed its side and every queued write
    /// was taken. The driver may then release the endpoint.
    pub fn is_drained(&self) -> bool {
        let state = self.shared.lock();
        state.disposed && state.outbound.is_empty()
    }

    fn set_fault(&self, err: ProtocolError) {
        {
            let mut state = self.shared.lock();
            if state.fault.is_none() && !state.closed {
                state.fault = Some(err);
            }
        }
        self.shared.notify_all();
    }
}

impl Drop for ChannelEndpoint {
    fn drop(&mut self) {
        if !self.finished {
            self.set_fault(ProtocolError::SessionClosed);
        }
    }
}
