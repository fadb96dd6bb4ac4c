//! Minimal drivers for unit tests.

use std::io::{self, Read};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use protocol::{ChannelRequest, PollFlags, ProtocolError};

use super::{ChannelEndpoint, SessionDriver};

/// Observable state shared between a [`CountingDriver`] and its test.
#[derive(Default)]
pub(crate) struct Counters {
    pub processed: AtomicUsize,
    pub bytes: AtomicUsize,
    pub transport_closed: AtomicBool,
    pub established: AtomicBool,
    pub disconnected: AtomicUsize,
    pub panic_on_process: AtomicBool,
    pub reject_opens: AtomicBool,
    pub endpoints: Mutex<Vec<(ChannelRequest, ChannelEndpoint)>>,
}

/// Driver that drains its socket on every pass and counts passes.
pub(crate) struct CountingDriver {
    stream: UnixStream,
    interest: PollFlags,
    counters: Arc<Counters>,
}

/// Builds a driver over one end of a socket pair and returns the other end.
pub(crate) fn counting_driver(interest: PollFlags) -> (CountingDriver, UnixStream, Arc<Counters>) {
    let (stream, peer) = UnixStream::pair().unwrap();
    stream.set_nonblocking(true).unwrap();
    let counters = Arc::new(Counters::default());
    counters.established.store(true, Ordering::SeqCst);
    let driver = CountingDriver {
        stream,
        interest,
        counters: counters.clone(),
    };
    (driver, peer, counters)
}

impl AsFd for CountingDriver {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

impl SessionDriver for CountingDriver {
    fn poll_interest(&self) -> PollFlags {
        self.interest
    }

    fn process(&mut self, _socket: BorrowedFd<'_>) -> protocol::Result<()> {
        if self.counters.panic_on_process.load(Ordering::SeqCst) {
            panic!("driver failure");
        }
        self.counters.processed.fetch_add(1, Ordering::SeqCst);

        let mut buffer = [0u8; 256];
        loop {
            match self.stream.read(&mut buffer) {
                Ok(0) => {
                    self.counters.transport_closed.store(true, Ordering::SeqCst);
                    return Ok(());
                }
                Ok(n) => {
                    self.counters.bytes.fetch_add(n, Ordering::SeqCst);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.counters.transport_closed.load(Ordering::SeqCst)
    }

    fn is_established(&self) -> bool {
        self.counters.established.load(Ordering::SeqCst)
    }

    fn open_channel(
        &mut self,
        request: ChannelRequest,
        endpoint: ChannelEndpoint,
    ) -> protocol::Result<()> {
        if self.counters.reject_opens.load(Ordering::SeqCst) {
            endpoint.reject(format!("{} refused", request.kind()));
            return Ok(());
        }
        let mut endpoints = self
            .counters
            .endpoints
            .lock()
            .map_err(|_| ProtocolError::SessionClosed)?;
        endpoints.push((request, endpoint));
        Ok(())
    }

    fn disconnect(&mut self) {
        self.counters.disconnected.fetch_add(1, Ordering::SeqCst);
        self.counters.transport_closed.store(true, Ordering::SeqCst);
    }
}
