//! The SSH client: one session served by a poll thread.

use std::path::Path;
use std::sync::Arc;

use protocol::{ChannelRequest, ProtocolError};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::poll::{PollThread, Registration};
use crate::process::{ExecuteOptions, RemoteProcess};
use crate::session::{channel_pair, Session, SessionDriver, SessionId, SshChannel};
use crate::stream::SshDataStream;

/// A connected SSH client.
///
/// The client registers its session with a poll thread, which performs all
/// protocol processing in the background. Channels opened through the client
/// are independent: each can be read, written and cancelled concurrently.
/// Dropping the client disconnects the session.
pub struct SshClient {
    session: Arc<Session>,
    poll: PollThread,
    registration: Option<Registration>,
    config: Config,
    process_options: ExecuteOptions,
}

impl SshClient {
    /// Connects on the process-wide poll thread with default configuration.
    pub async fn connect<D: SessionDriver>(driver: D, cancel: &CancellationToken) -> Result<Self> {
        let poll = PollThread::global()?;
        Self::connect_with(driver, Config::default(), poll, cancel).await
    }

    /// Registers `driver` with `poll` and waits until the session is
    /// established.
    ///
    /// Fails with [`ProtocolError::SessionClosed`] if the transport closes
    /// first. Cancelling unregisters the session.
    pub async fn connect_with<D: SessionDriver>(
        driver: D,
        config: Config,
        poll: PollThread,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        let process_options = ExecuteOptions::from_config(&config.process)?;

        let session = Session::new(driver);
        let registration = poll.add_session(&session)?;
        let client = SshClient {
            session,
            poll,
            registration: Some(registration),
            config,
            process_options,
        };

        // On error the client is dropped, which unregisters the session.
        client.wait_established(cancel).await?;

        tracing::info!(session_id = %client.session.id(), "SSH session established");
        Ok(client)
    }

    async fn wait_established(&self, cancel: &CancellationToken) -> Result<()> {
        loop {
            let notified = self.session.progress().notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.session.is_closed() {
                return Err(ProtocolError::SessionClosed.into());
            }
            let (established, closed) = self
                .session
                .with_driver(|driver| (driver.is_established(), driver.is_closed()))?;
            if established {
                return Ok(());
            }
            if closed {
                return Err(ProtocolError::SessionClosed.into());
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            }
        }
    }

    pub fn session_id(&self) -> &SessionId {
        self.session.id()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns true once the client was disposed or the session failed.
    pub fn is_closed(&self) -> bool {
        if self.session.is_closed() {
            return true;
        }
        self.session
            .with_driver(|driver| driver.is_closed())
            .unwrap_or(true)
    }

    /// Runs `command` on the remote host with the configured process options.
    pub async fn execute(
        &self,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<RemoteProcess<SshChannel>> {
        self.execute_with(command, self.process_options.clone(), cancel)
            .await
    }

    /// Runs `command` with explicit encodings and buffer sizes.
    pub async fn execute_with(
        &self,
        command: &str,
        options: ExecuteOptions,
        cancel: &CancellationToken,
    ) -> Result<RemoteProcess<SshChannel>> {
        let request = ChannelRequest::Exec {
            command: command.to_string(),
        };
        let channel = self.open_channel(request, cancel).await?;
        Ok(RemoteProcess::new(channel, options))
    }

    /// Opens a connection to `host:port` as seen from the remote host.
    pub async fn open_tcp_connection(
        &self,
        host: &str,
        port: u16,
        cancel: &CancellationToken,
    ) -> Result<SshDataStream> {
        let request = ChannelRequest::DirectTcp {
            host: host.to_string(),
            port,
        };
        let channel = self.open_channel(request, cancel).await?;
        Ok(SshDataStream::new(channel))
    }

    /// Opens a connection to a Unix socket on the remote host.
    pub async fn open_unix_connection(
        &self,
        path: impl AsRef<Path>,
        cancel: &CancellationToken,
    ) -> Result<SshDataStream> {
        let request = ChannelRequest::DirectStreamLocal {
            path: path.as_ref().to_path_buf(),
        };
        let channel = self.open_channel(request, cancel).await?;
        Ok(SshDataStream::new(channel))
    }

    /// Starts a subsystem such as `sftp`.
    pub async fn open_subsystem(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<SshDataStream> {
        let request = ChannelRequest::Subsystem {
            name: name.to_string(),
        };
        let channel = self.open_channel(request, cancel).await?;
        Ok(SshDataStream::new(channel))
    }

    async fn open_channel(
        &self,
        request: ChannelRequest,
        cancel: &CancellationToken,
    ) -> Result<SshChannel> {
        if self.session.is_closed() {
            return Err(ProtocolError::SessionClosed.into());
        }

        let kind = request.kind();
        let (channel, endpoint) = channel_pair(
            self.config.runtime.channel_buffer_size,
            Some(self.poll.clone()),
        );
        self.session.with_driver(|driver| {
            if driver.is_closed() {
                return Err(ProtocolError::SessionClosed);
            }
            driver.open_channel(request, endpoint)
        })??;
        self.poll.interrupt();

        // Cancelling drops the channel, which tells the driver to abandon it.
        channel.wait_open(cancel).await?;

        tracing::debug!(session_id = %self.session.id(), kind, "Channel opened");
        Ok(channel)
    }

    /// Disconnects and unregisters the session. Idempotent.
    pub fn dispose(&mut self) {
        let Some(registration) = self.registration.take() else {
            return;
        };

        if self.session.mark_closed() {
            if let Err(e) = self.session.with_driver(|driver| driver.disconnect()) {
                tracing::warn!(session_id = %self.session.id(), error = %e, "Disconnect failed");
            }
        }
        self.poll.remove_session(registration);
        self.session.progress().notify_waiters();

        tracing::info!(session_id = %self.session.id(), "SSH session disposed");
    }
}

impl Drop for SshClient {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for SshClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshClient")
            .field("session", &self.session)
            .field("poll", &self.poll)
            .finish_non_exhaustive()
    }
}
