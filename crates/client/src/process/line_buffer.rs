//! Incremental decoding of one output stream into text and lines.
//!
//! Bytes are decoded into a fixed-capacity character buffer. Text that has
//! not been returned as a line when the buffer must be reused moves into a
//! growable overflow string, so lines of any length survive across refills.
//! Line terminators are `\n`, `\r` and `\r\n`; a `\r\n` pair split across two
//! refills still counts as one terminator.

use encoding_rs::{CoderResult, Decoder, Encoding};

fn is_terminator(c: char) -> bool {
    c == '\r' || c == '\n'
}

/// Decoder and line splitter for one stream.
///
/// Nothing is allocated until the first call that needs the decoder.
pub struct LineBuffer {
    encoding: &'static Encoding,
    chunk_size: usize,
    decoder: Option<Decoder>,
    /// Set once the decoder has been flushed at end of stream.
    finished: bool,
    /// Decoded text; `chars[pos..]` is unread.
    chars: String,
    pos: usize,
    /// Unread text carried over from earlier refills. Always precedes
    /// `chars[pos..]`.
    overflow: Option<String>,
    /// Set when `overflow` is known to contain no terminator.
    overflow_scanned: bool,
    /// Set after a `\r` terminator: a directly following `\n` belongs to it.
    skip_newline: bool,
}

impl LineBuffer {
    /// Creates a buffer decoding `encoding`, sized for refills of up to
    /// `chunk_size` bytes.
    pub fn new(encoding: &'static Encoding, chunk_size: usize) -> Self {
        Self {
            encoding,
            chunk_size,
            decoder: None,
            finished: false,
            chars: String::new(),
            pos: 0,
            overflow: None,
            overflow_scanned: true,
            skip_newline: false,
        }
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    pub fn is_initialized(&self) -> bool {
        self.decoder.is_some()
    }

    /// Creates the decoder and character buffer if not done yet.
    pub fn initialize(&mut self) {
        if self.decoder.is_some() {
            return;
        }
        let decoder = self.encoding.new_decoder_without_bom_handling();
        let capacity = decoder
            .max_utf8_buffer_length(self.chunk_size)
            .unwrap_or(self.chunk_size.saturating_mul(3))
            .max(16);
        self.chars = String::with_capacity(capacity);
        self.decoder = Some(decoder);
    }

    /// Decodes another chunk of raw bytes.
    ///
    /// Unread text from the previous chunk is preserved in the overflow.
    pub fn append_encoded(&mut self, bytes: &[u8]) {
        if bytes.is_empty() || self.finished {
            return;
        }
        self.initialize();
        if self.pos < self.chars.len() {
            self.spill();
            self.overflow_scanned = false;
        } else {
            self.chars.clear();
            self.pos = 0;
        }
        self.decode(bytes, false);
    }

    /// Flushes the decoder at end of stream. An incomplete trailing sequence
    /// decodes to U+FFFD.
    pub fn finish(&mut self) {
        if self.finished || self.decoder.is_none() {
            return;
        }
        self.decode(&[], true);
        self.finished = true;
    }

    /// Returns the next complete line without its terminator.
    ///
    /// With `is_final` set the stream has ended and any unterminated
    /// remainder is returned as the last line. Without it, unread text is
    /// moved to the overflow so the character buffer can be refilled.
    pub fn try_read_line(&mut self, is_final: bool) -> Option<String> {
        if self.decoder.is_none() {
            return None;
        }
        self.consume_skipped_newline();

        if !self.overflow_scanned {
            if let Some(overflow) = self.overflow.as_mut() {
                if let Some(i) = overflow.find(is_terminator) {
                    let terminator = overflow.as_bytes()[i];
                    let line = overflow[..i].to_string();
                    overflow.drain(..=i);
                    self.skip_newline = terminator == b'\r';
                    self.consume_skipped_newline();
                    return Some(line);
                }
            }
            self.overflow_scanned = true;
        }

        let pending = &self.chars[self.pos..];
        if let Some(i) = pending.find(is_terminator) {
            let terminator = pending.as_bytes()[i];
            let mut line = self.overflow.take().unwrap_or_default();
            line.push_str(&pending[..i]);
            self.pos += i + 1;
            self.skip_newline = terminator == b'\r';
            self.consume_skipped_newline();
            return Some(line);
        }

        if is_final {
            return self.has_pending().then(|| self.take_pending());
        }
        self.spill();
        None
    }

    /// Takes all decoded text, terminators included. `None` if the stream
    /// was never read.
    pub fn take_all(&mut self) -> Option<String> {
        self.decoder.as_ref()?;
        self.consume_skipped_newline();
        Some(self.take_pending())
    }

    fn has_pending(&self) -> bool {
        self.pos < self.chars.len() || self.overflow.as_ref().is_some_and(|o| !o.is_empty())
    }

    fn take_pending(&mut self) -> String {
        let mut text = self.overflow.take().unwrap_or_default();
        text.push_str(&self.chars[self.pos..]);
        self.chars.clear();
        self.pos = 0;
        self.overflow_scanned = true;
        text
    }

    /// Moves unread characters to the overflow and empties the buffer.
    fn spill(&mut self) {
        if self.pos < self.chars.len() {
            let pending = &self.chars[self.pos..];
            self.overflow
                .get_or_insert_with(|| String::with_capacity(pending.len() * 2))
                .push_str(pending);
        }
        self.chars.clear();
        self.pos = 0;
    }

    /// Drops a `\n` that completes a `\r\n` pair. Waits for more text if
    /// none is buffered yet.
    fn consume_skipped_newline(&mut self) {
        if !self.skip_newline {
            return;
        }
        if let Some(overflow) = self.overflow.as_mut().filter(|o| !o.is_empty()) {
            if overflow.starts_with('\n') {
                overflow.remove(0);
            }
            self.skip_newline = false;
        } else if self.pos < self.chars.len() {
            if self.chars.as_bytes()[self.pos] == b'\n' {
                self.pos += 1;
            }
            self.skip_newline = false;
        }
    }

    fn decode(&mut self, mut input: &[u8], last: bool) {
        let Some(decoder) = self.decoder.as_mut() else {
            return;
        };
        loop {
            let (result, read, _) = decoder.decode_to_string(input, &mut self.chars, last);
            input = &input[read..];
            match result {
                CoderResult::InputEmpty => return,
                CoderResult::OutputFull => {
                    let pending = &self.chars[self.pos..];
                    self.overflow
                        .get_or_insert_with(String::new)
                        .push_str(pending);
                    self.overflow_scanned = false;
                    self.chars.clear();
                    self.pos = 0;
                }
            }
        }
    }
}

impl std::fmt::Debug for LineBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineBuffer")
            .field("encoding", &self.encoding.name())
            .field("initialized", &self.decoder.is_some())
            .field("pending", &(self.chars.len() - self.pos))
            .field(
                "overflow",
                &self.overflow.as_ref().map_or(0, |o| o.len()),
            )
            .finish()
    }
}
