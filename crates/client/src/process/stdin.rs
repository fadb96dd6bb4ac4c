//! Encoded text writer for a process's standard input.

use std::io;

use encoding_rs::{CoderResult, Encoder, Encoding};
use protocol::{Channel, ProtocolError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// A channel fault surfaced through the stream-style stdin API.
#[derive(Debug, Error)]
#[error("unable to transport data: {0}")]
pub struct TransportFault(#[source] pub ProtocolError);

fn transport_error(err: ProtocolError) -> io::Error {
    let kind = match err {
        ProtocolError::Cancelled => io::ErrorKind::Interrupted,
        ProtocolError::Timeout(_) => io::ErrorKind::TimedOut,
        _ => io::ErrorKind::BrokenPipe,
    };
    io::Error::new(kind, TransportFault(err))
}

/// Encoder state kept by the process between stdin writes.
pub(crate) struct StdinState {
    encoder: Encoder,
    pending: Vec<u8>,
    auto_flush: bool,
}

impl StdinState {
    pub(crate) fn new(encoding: &'static Encoding) -> Self {
        Self {
            encoder: encoding.new_encoder(),
            pending: Vec::new(),
            auto_flush: true,
        }
    }

    fn encode(&mut self, mut text: &str) {
        while !text.is_empty() {
            let needed = self
                .encoder
                .max_buffer_length_from_utf8_if_no_unmappables(text.len())
                .unwrap_or(text.len());
            self.pending.reserve(needed.max(16));

            let (result, read, _) = self
                .encoder
                .encode_from_utf8_to_vec(text, &mut self.pending, false);
            text = &text[read..];
            if result == CoderResult::InputEmpty {
                break;
            }
        }
    }
}

/// Writes text to a remote process's standard input.
///
/// Text is encoded with the process's stdin encoding. With auto-flush
/// enabled (the default) every write is sent immediately; otherwise encoded
/// bytes accumulate until [`flush`](Self::flush).
pub struct StandardInput<'a, C: Channel> {
    pub(crate) channel: &'a mut C,
    pub(crate) state: &'a mut StdinState,
}

impl<C: Channel> StandardInput<'_, C> {
    pub fn auto_flush(&self) -> bool {
        self.state.auto_flush
    }

    pub fn set_auto_flush(&mut self, auto_flush: bool) {
        self.state.auto_flush = auto_flush;
    }

    /// Number of encoded bytes waiting for a flush.
    pub fn pending_len(&self) -> usize {
        self.state.pending.len()
    }

    /// Writes raw bytes after any pending text.
    pub async fn write_all(&mut self, data: &[u8], cancel: &CancellationToken) -> io::Result<()> {
        self.flush(cancel).await?;
        self.channel.write(data, cancel).await.map_err(transport_error)
    }

    pub async fn write_str(&mut self, text: &str, cancel: &CancellationToken) -> io::Result<()> {
        self.state.encode(text);
        self.flush_if_auto(cancel).await
    }

    /// Writes `text` followed by `\n`.
    pub async fn write_line(&mut self, text: &str, cancel: &CancellationToken) -> io::Result<()> {
        self.state.encode(text);
        self.state.encode("\n");
        self.flush_if_auto(cancel).await
    }

    /// Sends all pending encoded bytes.
    ///
    /// On failure the bytes stay pending so a retry resends them.
    pub async fn flush(&mut self, cancel: &CancellationToken) -> io::Result<()> {
        if self.state.pending.is_empty() {
            return Ok(());
        }
        // Cleared only once queued, so a dropped flush loses nothing.
        self.channel
            .write(&self.state.pending, cancel)
            .await
            .map_err(transport_error)?;
        self.state.pending.clear();
        Ok(())
    }

    async fn flush_if_auto(&mut self, cancel: &CancellationToken) -> io::Result<()> {
        if self.state.auto_flush {
            self.flush(cancel).await
        } else {
            Ok(())
        }
    }
}
