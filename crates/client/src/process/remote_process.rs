use futures_util::stream::{self, Stream};
use protocol::{Channel, ReadType, StreamKind};
use tokio_util::sync::CancellationToken;

use super::handler::ChunkHandler;
use super::line_buffer::LineBuffer;
use super::options::ExecuteOptions;
use super::stdin::{StandardInput, StdinState};
use crate::error::{Error, Result};

/// What a raw read on a process produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessReadType {
    StandardOutput,
    StandardError,
    /// The process exited; its exit code is available.
    ProcessExit,
}

/// How a process's output is being consumed. Fixed by the first read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadMode {
    Raw,
    Bulk,
    Lines,
}

/// A command running on the remote host.
///
/// Output can be consumed in one of three ways, which cannot be mixed on the
/// same process:
///
/// - raw: [`read`](Self::read) and [`read_to_end`](Self::read_to_end)
/// - bulk text: [`read_to_end_as_string`](Self::read_to_end_as_string)
/// - lines: [`read_line`](Self::read_line) and
///   [`read_all_lines`](Self::read_all_lines)
///
/// [`wait_for_exit`](Self::wait_for_exit) works in either mode. Dropping the
/// process disposes its channel.
pub struct RemoteProcess<C: Channel> {
    channel: C,
    options: ExecuteOptions,
    stdin: Option<StdinState>,
    /// Text-mode read buffer; the first half receives stdout, the second
    /// stderr.
    read_buffer: Vec<u8>,
    stdout: LineBuffer,
    stderr: LineBuffer,
    has_exited: bool,
    mode: Option<ReadMode>,
}

impl<C: Channel> RemoteProcess<C> {
    /// Wraps an open exec channel.
    pub fn new(channel: C, options: ExecuteOptions) -> Self {
        let stdout = LineBuffer::new(options.stdout_encoding, options.line_buffer_size);
        let stderr = LineBuffer::new(options.stderr_encoding, options.line_buffer_size);
        Self {
            channel,
            options,
            stdin: None,
            read_buffer: Vec::new(),
            stdout,
            stderr,
            has_exited: false,
            mode: None,
        }
    }

    pub fn options(&self) -> &ExecuteOptions {
        &self.options
    }

    /// Returns true once a read observed the channel closing.
    pub fn has_exited(&self) -> bool {
        self.has_exited
    }

    /// The remote exit code.
    ///
    /// Fails with [`Error::InvalidOperation`] until a read has observed the
    /// exit, and with [`Error::NoExitStatus`] if the remote side closed the
    /// channel without reporting one.
    pub fn exit_code(&self) -> Result<i32> {
        if !self.has_exited {
            return Err(Error::InvalidOperation("process has not exited"));
        }
        self.channel.exit_code().ok_or(Error::NoExitStatus)
    }

    fn enter_mode(&mut self, mode: ReadMode) -> Result<()> {
        match self.mode {
            None => {
                self.mode = Some(mode);
                Ok(())
            }
            Some(current) if current == mode => Ok(()),
            Some(_) => Err(Error::InvalidOperation(
                "raw, bulk text and line reads cannot be mixed on one process",
            )),
        }
    }

    /// Reads the next chunk of raw output.
    ///
    /// A `None` destination discards that stream's data. Returns
    /// [`ProcessReadType::ProcessExit`] with zero bytes once the process has
    /// exited, on this and every later call.
    pub async fn read(
        &mut self,
        mut stdout: Option<&mut [u8]>,
        mut stderr: Option<&mut [u8]>,
        cancel: &CancellationToken,
    ) -> Result<(ProcessReadType, usize)> {
        self.enter_mode(ReadMode::Raw)?;
        loop {
            let (read_type, n) = self
                .channel
                .read(stdout.as_deref_mut(), stderr.as_deref_mut(), cancel)
                .await?;
            match read_type {
                ReadType::StandardOutput => return Ok((ProcessReadType::StandardOutput, n)),
                ReadType::StandardError => return Ok((ProcessReadType::StandardError, n)),
                ReadType::Eof => continue,
                ReadType::Closed => {
                    self.has_exited = true;
                    return Ok((ProcessReadType::ProcessExit, 0));
                }
            }
        }
    }

    /// Forwards all remaining raw output to the given handlers until the
    /// process exits, then finishes both handlers.
    pub async fn read_to_end(
        &mut self,
        mut stdout: Option<&mut dyn ChunkHandler>,
        mut stderr: Option<&mut dyn ChunkHandler>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.enter_mode(ReadMode::Raw)?;

        let size = self.options.read_buffer_size.max(2);
        let mut buffer = vec![0u8; size];
        let (out_half, err_half) = buffer.split_at_mut(size / 2);

        loop {
            let out_dest = stdout.is_some().then_some(&mut *out_half);
            let err_dest = stderr.is_some().then_some(&mut *err_half);
            let (read_type, n) = self.channel.read(out_dest, err_dest, cancel).await?;
            match read_type {
                ReadType::StandardOutput => {
                    if let Some(handler) = stdout.as_deref_mut() {
                        handler.handle(&out_half[..n]).await?;
                    }
                }
                ReadType::StandardError => {
                    if let Some(handler) = stderr.as_deref_mut() {
                        handler.handle(&err_half[..n]).await?;
                    }
                }
                ReadType::Eof => {}
                ReadType::Closed => break,
            }
        }
        self.has_exited = true;

        if let Some(handler) = stdout {
            handler.finish().await?;
        }
        if let Some(handler) = stderr {
            handler.finish().await?;
        }
        Ok(())
    }

    /// Reads until exit and returns the decoded text of each requested
    /// stream. Streams not requested are discarded and returned as `None`.
    pub async fn read_to_end_as_string(
        &mut self,
        read_stdout: bool,
        read_stderr: bool,
        cancel: &CancellationToken,
    ) -> Result<(Option<String>, Option<String>)> {
        self.enter_mode(ReadMode::Bulk)?;
        if !self.has_exited {
            while self.read_chars(read_stdout, read_stderr, cancel).await?
                != ProcessReadType::ProcessExit
            {}
            self.mark_exited();
        }

        let stdout = read_stdout.then(|| self.stdout.take_all().unwrap_or_default());
        let stderr = read_stderr.then(|| self.stderr.take_all().unwrap_or_default());
        Ok((stdout, stderr))
    }

    /// Reads the next complete line from the requested streams.
    ///
    /// Buffered standard output lines are returned before standard error
    /// lines. When the process exits, unterminated remainders are returned
    /// as final lines, then `None`.
    pub async fn read_line(
        &mut self,
        read_stdout: bool,
        read_stderr: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<(StreamKind, String)>> {
        self.enter_mode(ReadMode::Lines)?;

        if let Some(line) = self.buffered_line(read_stdout, read_stderr) {
            return Ok(Some(line));
        }
        if self.has_exited {
            return Ok(None);
        }

        loop {
            match self.read_chars(read_stdout, read_stderr, cancel).await? {
                ProcessReadType::StandardOutput => {
                    if let Some(line) = self.stdout.try_read_line(false) {
                        return Ok(Some((StreamKind::StandardOutput, line)));
                    }
                }
                ProcessReadType::StandardError => {
                    if let Some(line) = self.stderr.try_read_line(false) {
                        return Ok(Some((StreamKind::StandardError, line)));
                    }
                }
                ProcessReadType::ProcessExit => {
                    self.mark_exited();
                    return Ok(self.buffered_line(read_stdout, read_stderr));
                }
            }
        }
    }

    /// Streams lines until the process exits. The stream ends after the
    /// first error.
    pub fn read_all_lines<'a>(
        &'a mut self,
        read_stdout: bool,
        read_stderr: bool,
        cancel: &'a CancellationToken,
    ) -> impl Stream<Item = Result<(StreamKind, String)>> + Send + 'a
    where
        C: 'a,
    {
        stream::unfold(Some(self), move |process| async move {
            let process = process?;
            match process.read_line(read_stdout, read_stderr, cancel).await {
                Ok(Some(line)) => Some((Ok(line), Some(process))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    /// Waits for the process to exit, discarding any unread output.
    pub async fn wait_for_exit(&mut self, cancel: &CancellationToken) -> Result<()> {
        while !self.has_exited {
            let (read_type, _) = self.channel.read(None, None, cancel).await?;
            if read_type == ReadType::Closed {
                self.mark_exited();
            }
        }
        Ok(())
    }

    /// Writes raw bytes to standard input.
    pub async fn write(&mut self, data: &[u8], cancel: &CancellationToken) -> Result<()> {
        self.stdin().write_all(data, cancel).await.map_err(io_to_error)
    }

    /// Writes text to standard input and sends it immediately.
    pub async fn write_str(&mut self, text: &str, cancel: &CancellationToken) -> Result<()> {
        let mut stdin = self.stdin();
        let auto_flush = stdin.auto_flush();
        stdin.set_auto_flush(true);
        let result = stdin.write_str(text, cancel).await;
        stdin.set_auto_flush(auto_flush);
        result.map_err(io_to_error)
    }

    /// Writes a line of text to standard input and sends it immediately.
    pub async fn write_line(&mut self, text: &str, cancel: &CancellationToken) -> Result<()> {
        let mut stdin = self.stdin();
        let auto_flush = stdin.auto_flush();
        stdin.set_auto_flush(true);
        let result = stdin.write_line(text, cancel).await;
        stdin.set_auto_flush(auto_flush);
        result.map_err(io_to_error)
    }

    /// Text writer for standard input, created on first use.
    pub fn stdin(&mut self) -> StandardInput<'_, C> {
        let encoding = self.options.stdin_encoding;
        StandardInput {
            channel: &mut self.channel,
            state: self.stdin.get_or_insert_with(|| StdinState::new(encoding)),
        }
    }

    /// Closes the channel. Further reads fail; dropping does this too.
    pub fn dispose(&mut self) {
        self.channel.dispose();
    }

    fn mark_exited(&mut self) {
        self.has_exited = true;
        self.stdout.finish();
        self.stderr.finish();
    }

    fn buffered_line(&mut self, read_stdout: bool, read_stderr: bool) -> Option<(StreamKind, String)> {
        let is_final = self.has_exited;
        if read_stdout {
            if let Some(line) = self.stdout.try_read_line(is_final) {
                return Some((StreamKind::StandardOutput, line));
            }
        }
        if read_stderr {
            if let Some(line) = self.stderr.try_read_line(is_final) {
                return Some((StreamKind::StandardError, line));
            }
        }
        None
    }

    /// Reads one chunk in text mode and decodes it into its line buffer.
    async fn read_chars(
        &mut self,
        read_stdout: bool,
        read_stderr: bool,
        cancel: &CancellationToken,
    ) -> Result<ProcessReadType> {
        let half = self.options.line_buffer_size.max(1);
        if self.read_buffer.is_empty() {
            self.read_buffer = vec![0u8; half * 2];
        }
        if read_stdout {
            self.stdout.initialize();
        }
        if read_stderr {
            self.stderr.initialize();
        }

        loop {
            let (out_half, err_half) = self.read_buffer.split_at_mut(half);
            let (read_type, n) = self
                .channel
                .read(
                    read_stdout.then_some(out_half),
                    read_stderr.then_some(err_half),
                    cancel,
                )
                .await?;
            match read_type {
                ReadType::StandardOutput => {
                    self.stdout.append_encoded(&self.read_buffer[..n]);
                    return Ok(ProcessReadType::StandardOutput);
                }
                ReadType::StandardError => {
                    self.stderr.append_encoded(&self.read_buffer[half..half + n]);
                    return Ok(ProcessReadType::StandardError);
                }
                ReadType::Eof => continue,
                ReadType::Closed => return Ok(ProcessReadType::ProcessExit),
            }
        }
    }
}

impl<C: Channel> Drop for RemoteProcess<C> {
    fn drop(&mut self) {
        self.channel.dispose();
    }
}

impl<C: Channel> std::fmt::Debug for RemoteProcess<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteProcess")
            .field("has_exited", &self.has_exited)
            .field("mode", &self.mode)
            .field("stdout", &self.stdout)
            .field("stderr", &self.stderr)
            .finish_non_exhaustive()
    }
}

fn io_to_error(err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::Interrupted {
        Error::Cancelled
    } else {
        Error::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{channel_pair, ChannelEndpoint, SshChannel};
    use encoding_rs::WINDOWS_1252;
    use futures_util::StreamExt;
    use protocol::ProtocolError;
    use std::time::Duration;
    use tokio::time::timeout;

    fn process() -> (RemoteProcess<SshChannel>, ChannelEndpoint) {
        process_with(ExecuteOptions::default())
    }

    fn process_with(options: ExecuteOptions) -> (RemoteProcess<SshChannel>, ChannelEndpoint) {
        let (channel, endpoint) = channel_pair(64 * 1024, None);
        endpoint.confirm();
        (RemoteProcess::new(channel, options), endpoint)
    }

    #[tokio::test]
    async fn test_raw_read_and_exit() {
        let (mut process, endpoint) = process();
        let cancel = CancellationToken::new();
        endpoint.deliver(StreamKind::StandardOutput, b"out");
        endpoint.deliver_eof();
        endpoint.deliver(StreamKind::StandardError, b"err");
        endpoint.close(Some(7));

        let mut out = [0u8; 16];
        let mut err = [0u8; 16];
        let (kind, n) = process.read(Some(&mut out), Some(&mut err), &cancel).await.unwrap();
        assert_eq!((kind, &out[..n]), (ProcessReadType::StandardOutput, &b"out"[..]));
        let (kind, n) = process.read(Some(&mut out), Some(&mut err), &cancel).await.unwrap();
        assert_eq!((kind, &err[..n]), (ProcessReadType::StandardError, &b"err"[..]));

        assert!(process.exit_code().is_err());
        let (kind, n) = process.read(Some(&mut out), Some(&mut err), &cancel).await.unwrap();
        assert_eq!((kind, n), (ProcessReadType::ProcessExit, 0));
        assert_eq!(process.exit_code().unwrap(), 7);

        let (kind, _) = process.read(Some(&mut out), None, &cancel).await.unwrap();
        assert_eq!(kind, ProcessReadType::ProcessExit);
    }

    #[tokio::test]
    async fn test_exit_code_requires_observed_exit() {
        let (process, endpoint) = process();
        endpoint.close(Some(0));
        assert!(matches!(
            process.exit_code(),
            Err(Error::InvalidOperation("process has not exited"))
        ));
    }

    #[tokio::test]
    async fn test_missing_exit_status() {
        let (mut process, endpoint) = process();
        let cancel = CancellationToken::new();
        endpoint.close(None);
        process.wait_for_exit(&cancel).await.unwrap();
        assert!(matches!(process.exit_code(), Err(Error::NoExitStatus)));
    }

    #[tokio::test]
    async fn test_modes_cannot_be_mixed() {
        let (mut process, endpoint) = process();
        let cancel = CancellationToken::new();
        endpoint.deliver(StreamKind::StandardOutput, b"line\n");

        let mut out = [0u8; 16];
        process.read(Some(&mut out), None, &cancel).await.unwrap();
        let err = process.read_line(true, false, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn test_lines_then_bulk_text_is_rejected() {
        let (mut process, endpoint) = process();
        let cancel = CancellationToken::new();
        endpoint.deliver(StreamKind::StandardOutput, b"ab\r");
        endpoint.deliver(StreamKind::StandardOutput, b"\ncd");
        endpoint.close(Some(0));

        let line = process.read_line(true, false, &cancel).await.unwrap();
        assert_eq!(line, Some((StreamKind::StandardOutput, "ab".to_string())));
        let err = process
            .read_to_end_as_string(true, false, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));

        // Line mode continues where it left off.
        let line = process.read_line(true, false, &cancel).await.unwrap();
        assert_eq!(line, Some((StreamKind::StandardOutput, "cd".to_string())));
    }

    #[tokio::test]
    async fn test_read_lines_with_stdout_precedence() {
        let (mut process, endpoint) = process();
        let cancel = CancellationToken::new();
        endpoint.deliver(StreamKind::StandardError, b"e1\n");
        endpoint.deliver(StreamKind::StandardOutput, b"o1\no2\n");
        endpoint.close(Some(0));

        let mut lines = Vec::new();
        while let Some(line) = process.read_line(true, true, &cancel).await.unwrap() {
            lines.push(line);
        }
        assert_eq!(
            lines,
            [
                (StreamKind::StandardError, "e1".to_string()),
                (StreamKind::StandardOutput, "o1".to_string()),
                (StreamKind::StandardOutput, "o2".to_string()),
            ]
        );
        assert_eq!(process.exit_code().unwrap(), 0);
        assert!(process.read_line(true, true, &cancel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unterminated_lines_flushed_at_exit() {
        let (mut process, endpoint) = process();
        let cancel = CancellationToken::new();
        endpoint.deliver(StreamKind::StandardOutput, b"partial out");
        endpoint.deliver(StreamKind::StandardError, b"partial err");
        endpoint.close(Some(1));

        let first = process.read_line(true, true, &cancel).await.unwrap();
        let second = process.read_line(true, true, &cancel).await.unwrap();
        let third = process.read_line(true, true, &cancel).await.unwrap();
        assert_eq!(first, Some((StreamKind::StandardOutput, "partial out".to_string())));
        assert_eq!(second, Some((StreamKind::StandardError, "partial err".to_string())));
        assert_eq!(third, None);
    }

    #[tokio::test]
    async fn test_stdout_only_lines_discard_stderr() {
        let (mut process, endpoint) = process();
        let cancel = CancellationToken::new();
        endpoint.deliver(StreamKind::StandardError, b"noise\n");
        endpoint.deliver(StreamKind::StandardOutput, b"data\n");
        endpoint.close(Some(0));

        let lines: Vec<_> = process
            .read_all_lines(true, false, &cancel)
            .map(|line| line.unwrap().1)
            .collect()
            .await;
        assert_eq!(lines, ["data"]);
    }

    #[tokio::test]
    async fn test_read_to_end_as_string() {
        let (mut process, endpoint) = process_with(ExecuteOptions::default().with_encoding(WINDOWS_1252));
        let cancel = CancellationToken::new();
        endpoint.deliver(StreamKind::StandardOutput, b"caf\xE9\r\n");
        endpoint.deliver(StreamKind::StandardError, b"warn");
        endpoint.deliver(StreamKind::StandardOutput, b"done");
        endpoint.close(Some(0));

        let (stdout, stderr) = process.read_to_end_as_string(true, true, &cancel).await.unwrap();
        assert_eq!(stdout.as_deref(), Some("café\r\ndone"));
        assert_eq!(stderr.as_deref(), Some("warn"));
    }

    #[tokio::test]
    async fn test_read_to_end_as_string_skips_unrequested() {
        let (mut process, endpoint) = process();
        let cancel = CancellationToken::new();
        endpoint.deliver(StreamKind::StandardError, b"ignored");
        endpoint.close(Some(0));

        let (stdout, stderr) = process.read_to_end_as_string(true, false, &cancel).await.unwrap();
        assert_eq!(stdout.as_deref(), Some(""));
        assert_eq!(stderr, None);
    }

    #[tokio::test]
    async fn test_read_to_end_into_handlers() {
        let (mut process, endpoint) = process();
        let cancel = CancellationToken::new();
        endpoint.deliver(StreamKind::StandardOutput, b"hello ");
        endpoint.deliver(StreamKind::StandardError, b"oops");
        endpoint.deliver(StreamKind::StandardOutput, b"world");
        endpoint.close(Some(2));

        let mut out: Vec<u8> = Vec::new();
        let mut err: Vec<u8> = Vec::new();
        process
            .read_to_end(Some(&mut out), Some(&mut err), &cancel)
            .await
            .unwrap();
        assert_eq!(out, b"hello world");
        assert_eq!(err, b"oops");
        assert_eq!(process.exit_code().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_close_mid_line_in_bulk_mode() {
        let (mut process, endpoint) = process();
        let cancel = CancellationToken::new();
        endpoint.deliver(StreamKind::StandardOutput, b"complete\nincompl");
        endpoint.close(Some(0));

        let mut out: Vec<u8> = Vec::new();
        process.read_to_end(Some(&mut out), None, &cancel).await.unwrap();
        assert_eq!(out, b"complete\nincompl");
    }

    #[tokio::test]
    async fn test_cancelled_line_read_keeps_process_usable() {
        let (mut process, endpoint) = process();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result = timeout(Duration::from_secs(1), process.read_line(true, true, &cancel))
            .await
            .unwrap();
        assert!(result.unwrap_err().is_cancelled());

        endpoint.deliver(StreamKind::StandardOutput, b"after\n");
        let fresh = CancellationToken::new();
        let line = process.read_line(true, true, &fresh).await.unwrap();
        assert_eq!(line, Some((StreamKind::StandardOutput, "after".to_string())));
    }

    #[tokio::test]
    async fn test_write_line_reaches_channel() {
        let (mut process, endpoint) = process();
        let cancel = CancellationToken::new();

        process.stdin().set_auto_flush(false);
        process.write_line("echo hi", &cancel).await.unwrap();
        assert!(!process.stdin().auto_flush());
        process.write(b"\x04", &cancel).await.unwrap();

        assert_eq!(endpoint.take_outbound().as_deref(), Some(&b"echo hi\n"[..]));
        assert_eq!(endpoint.take_outbound().as_deref(), Some(&b"\x04"[..]));
    }

    #[tokio::test]
    async fn test_write_after_channel_fault() {
        let (mut process, endpoint) = process();
        let cancel = CancellationToken::new();
        endpoint.fail(ProtocolError::ConnectionClosed("reset".to_string()));

        let err = process.write_str("x", &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == std::io::ErrorKind::BrokenPipe));
    }

    #[tokio::test]
    async fn test_stdin_written_before_drop_is_sent() {
        let (mut process, endpoint) = process();
        let cancel = CancellationToken::new();
        process.write_line("exit", &cancel).await.unwrap();
        drop(process);

        assert_eq!(endpoint.take_outbound().as_deref(), Some(&b"exit\n"[..]));
        assert!(endpoint.is_drained());
    }

    #[tokio::test]
    async fn test_drop_disposes_channel() {
        let (process, endpoint) = process();
        drop(process);
        assert!(endpoint.is_disposed());
    }
}
