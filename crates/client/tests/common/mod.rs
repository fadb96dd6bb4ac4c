//! A scripted SSH driver for integration tests.
//!
//! The test plays the remote host through [`Remote`]: it queues actions and
//! pokes the driver's socket, the poll thread wakes up, and the driver applies
//! the actions during its processing pass, exactly as a real protocol layer
//! would apply incoming packets.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use client::{
    ChannelEndpoint, ChannelRequest, Config, PollFlags, PollThread, ProtocolError, RemoteProcess,
    SessionDriver, SshChannel, SshClient, StreamKind,
};
use tokio_util::sync::CancellationToken;

/// Something the remote host does.
#[derive(Debug)]
pub enum Action {
    Establish,
    Confirm(usize),
    Reject(usize, String),
    Deliver(usize, StreamKind, Vec<u8>),
    Eof(usize),
    Close(usize, Option<i32>),
    Fail(usize, ProtocolError),
}

#[derive(Default)]
struct Script {
    actions: Mutex<VecDeque<Action>>,
    requests: Mutex<Vec<ChannelRequest>>,
    outbound: Mutex<Vec<Vec<u8>>>,
    established: AtomicBool,
    transport_closed: AtomicBool,
    disconnects: AtomicUsize,
    passes: AtomicUsize,
}

pub struct ScriptedDriver {
    stream: UnixStream,
    script: Arc<Script>,
    channels: Vec<Option<ChannelEndpoint>>,
}

/// The test's handle on the remote side of a [`ScriptedDriver`].
pub struct Remote {
    peer: Option<UnixStream>,
    script: Arc<Script>,
}

pub fn scripted_driver() -> (ScriptedDriver, Remote) {
    let (stream, peer) = UnixStream::pair().unwrap();
    stream.set_nonblocking(true).unwrap();
    let script = Arc::new(Script::default());
    let driver = ScriptedDriver {
        stream,
        script: script.clone(),
        channels: Vec::new(),
    };
    let remote = Remote {
        peer: Some(peer),
        script,
    };
    (driver, remote)
}

impl ScriptedDriver {
    fn apply(&mut self, action: Action) {
        match action {
            Action::Establish => self.script.established.store(true, Ordering::SeqCst),
            Action::Confirm(index) => {
                if let Some(endpoint) = self.endpoint(index) {
                    endpoint.confirm();
                }
            }
            Action::Reject(index, reason) => {
                if let Some(endpoint) = self.take_endpoint(index) {
                    endpoint.reject(reason);
                }
            }
            Action::Deliver(index, kind, data) => {
                if let Some(endpoint) = self.endpoint(index) {
                    endpoint.deliver(kind, &data);
                }
            }
            Action::Eof(index) => {
                if let Some(endpoint) = self.endpoint(index) {
                    endpoint.deliver_eof();
                }
            }
            Action::Close(index, exit_code) => {
                if let Some(endpoint) = self.take_endpoint(index) {
                    endpoint.close(exit_code);
                }
            }
            Action::Fail(index, err) => {
                if let Some(endpoint) = self.take_endpoint(index) {
                    endpoint.fail(err);
                }
            }
        }
    }

    fn endpoint(&self, index: usize) -> Option<&ChannelEndpoint> {
        self.channels.get(index).and_then(Option::as_ref)
    }

    fn take_endpoint(&mut self, index: usize) -> Option<ChannelEndpoint> {
        self.channels.get_mut(index).and_then(Option::take)
    }

    fn flush_outbound(&mut self) {
        let mut outbound = self.script.outbound.lock().unwrap();
        for (index, slot) in self.channels.iter().enumerate() {
            let Some(endpoint) = slot else { continue };
            while let Some(chunk) = endpoint.take_outbound() {
                outbound[index].extend_from_slice(&chunk);
            }
        }
    }
}

impl AsFd for ScriptedDriver {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

impl SessionDriver for ScriptedDriver {
    fn poll_interest(&self) -> PollFlags {
        let writing = self.channels.iter().flatten().any(ChannelEndpoint::has_outbound);
        PollFlags::READ_PENDING.with_write_pending(writing)
    }

    fn process(&mut self, _socket: BorrowedFd<'_>) -> client::protocol::Result<()> {
        self.script.passes.fetch_add(1, Ordering::SeqCst);

        let mut buffer = [0u8; 64];
        loop {
            match self.stream.read(&mut buffer) {
                Ok(0) => {
                    self.script.transport_closed.store(true, Ordering::SeqCst);
                    // Dropping the endpoints faults every open channel.
                    self.channels.clear();
                    return Err(ProtocolError::ConnectionClosed("peer hung up".to_string()));
                }
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }

        loop {
            let next = self.script.actions.lock().unwrap().pop_front();
            let Some(action) = next else { break };
            self.apply(action);
        }

        self.flush_outbound();
        for slot in &mut self.channels {
            if slot.as_ref().is_some_and(ChannelEndpoint::is_drained) {
                slot.take();
            }
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.script.transport_closed.load(Ordering::SeqCst)
    }

    fn is_established(&self) -> bool {
        self.script.established.load(Ordering::SeqCst)
    }

    fn open_channel(
        &mut self,
        request: ChannelRequest,
        endpoint: ChannelEndpoint,
    ) -> client::protocol::Result<()> {
        self.script.requests.lock().unwrap().push(request);
        self.script.outbound.lock().unwrap().push(Vec::new());
        self.channels.push(Some(endpoint));
        Ok(())
    }

    fn disconnect(&mut self) {
        self.script.disconnects.fetch_add(1, Ordering::SeqCst);
        self.script.transport_closed.store(true, Ordering::SeqCst);
        self.channels.clear();
    }
}

impl Remote {
    /// Queues an action and wakes the driver.
    pub fn push(&mut self, action: Action) {
        self.script.actions.lock().unwrap().push_back(action);
        if let Some(peer) = self.peer.as_mut() {
            peer.write_all(&[0]).unwrap();
        }
    }

    /// Closes the transport from the remote side.
    pub fn hang_up(&mut self) {
        self.peer = None;
    }

    pub fn requests(&self) -> Vec<ChannelRequest> {
        self.script.requests.lock().unwrap().clone()
    }

    pub async fn wait_for_requests(&self, count: usize) {
        while self.script.requests.lock().unwrap().len() < count {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    /// Bytes the client sent on channel `index`.
    pub fn outbound(&self, index: usize) -> Vec<u8> {
        self.script.outbound.lock().unwrap()[index].clone()
    }

    pub async fn wait_for_outbound(&self, index: usize, len: usize) -> Vec<u8> {
        loop {
            let sent = self.outbound(index);
            if sent.len() >= len {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    pub fn disconnects(&self) -> usize {
        self.script.disconnects.load(Ordering::SeqCst)
    }

    pub fn passes(&self) -> usize {
        self.script.passes.load(Ordering::SeqCst)
    }
}

/// Connects a client over a scripted driver on `poll`.
pub async fn connect(poll: &PollThread) -> (SshClient, Remote) {
    let (driver, mut remote) = scripted_driver();
    remote.push(Action::Establish);
    let cancel = CancellationToken::new();
    let client = SshClient::connect_with(driver, Config::default(), poll.clone(), &cancel)
        .await
        .unwrap();
    (client, remote)
}

/// Runs `command`, confirming the channel from the remote side. Returns the
/// process and its channel index.
pub async fn execute(
    client: &SshClient,
    remote: &mut Remote,
    command: &str,
) -> (RemoteProcess<SshChannel>, usize) {
    let cancel = CancellationToken::new();
    let index = remote.requests().len();
    let (process, ()) = tokio::join!(client.execute(command, &cancel), async {
        remote.wait_for_requests(index + 1).await;
        remote.push(Action::Confirm(index));
    });
    (process.unwrap(), index)
}
