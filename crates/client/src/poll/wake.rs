//! Wake channel used to interrupt a blocked readiness wait.
//!
//! A connected pair of local stream sockets: any thread writes a byte to one
//! end, the poll thread always includes the other end in its wait and drains
//! it after waking.

use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;

/// Size of the scratch buffer used when draining wake bytes.
const DRAIN_BUFFER_SIZE: usize = 64;

/// A socket pair whose only purpose is to wake the poll thread.
#[derive(Debug)]
pub struct WakeChannel {
    /// End polled by the loop.
    reader: UnixStream,
    /// End written by `wake`.
    writer: UnixStream,
}

impl WakeChannel {
    /// Creates a non-blocking connected socket pair.
    pub fn new() -> io::Result<Self> {
        let (writer, reader) = UnixStream::pair()?;
        writer.set_nonblocking(true)?;
        reader.set_nonblocking(true)?;
        Ok(Self { reader, writer })
    }

    /// Writes one wake byte.
    ///
    /// A full socket buffer counts as success: unread bytes are already
    /// pending, so the next wait returns immediately anyway.
    pub fn wake(&self) -> io::Result<()> {
        loop {
            match (&self.writer).write(&[1]) {
                Ok(_) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Reads every pending wake byte without blocking.
    ///
    /// Returns the number of bytes discarded.
    pub fn drain(&self) -> io::Result<usize> {
        let mut buffer = [0u8; DRAIN_BUFFER_SIZE];
        let mut total = 0;
        loop {
            match (&self.reader).read(&mut buffer) {
                Ok(0) => return Ok(total),
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(total),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl AsFd for WakeChannel {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.reader.as_fd()
    }
}
