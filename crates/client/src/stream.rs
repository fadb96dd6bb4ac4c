//! Byte streams over forwarded connections and subsystems.

use protocol::{Channel, ReadType};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::session::SshChannel;

/// A bidirectional byte stream carried by one channel: a forwarded TCP or
/// Unix socket connection, or a subsystem such as SFTP.
///
/// Reads return 0 once the remote side finished sending. Dropping the stream
/// disposes the channel.
#[derive(Debug)]
pub struct SshDataStream<C: Channel = SshChannel> {
    channel: C,
    at_end: bool,
}

impl<C: Channel> SshDataStream<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            at_end: false,
        }
    }

    /// Reads up to `buf.len()` bytes. Returns 0 at end of stream.
    pub async fn read(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while !self.at_end {
            let (read_type, n) = self.channel.read(Some(&mut *buf), None, cancel).await?;
            match read_type {
                ReadType::StandardOutput => return Ok(n),
                ReadType::StandardError => {}
                ReadType::Eof | ReadType::Closed => self.at_end = true,
            }
        }
        Ok(0)
    }

    /// Sends all of `data`.
    pub async fn write(&mut self, data: &[u8], cancel: &CancellationToken) -> Result<()> {
        self.channel.write(data, cancel).await?;
        Ok(())
    }

    /// Disposes the channel. Idempotent.
    pub fn close(&mut self) {
        self.channel.dispose();
    }
}

impl<C: Channel> Drop for SshDataStream<C> {
    fn drop(&mut self) {
        self.channel.dispose();
    }
}
