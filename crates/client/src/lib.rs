//! # sshmux Client Runtime
//!
//! This crate runs many SSH sessions and their channels from a single
//! background poll thread, and exposes remote processes and forwarded
//! connections as asynchronous, cancelable streams.
//!
//! ## Overview
//!
//! - **Poll thread**: one OS thread waits for socket readiness across every
//!   registered session and drives its protocol processing
//! - **Sessions**: each connection's protocol state sits behind a gate so
//!   background processing and caller operations never interleave
//! - **Channels**: reads and writes await readiness and honor cancellation
//! - **Processes**: raw, bulk and line-oriented reads over standard output
//!   and standard error, with configurable text encodings
//! - **Data streams**: forwarded TCP and Unix socket connections, subsystems
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  SshClient ── RemoteProcess / SshDataStream (async callers)  │
//! ├──────────────────────────────────────────────────────────────┤
//! │        SshChannel  ◄──────────────►  ChannelEndpoint          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  PollThread                                                  │
//! │   ┌──────────────┐  ┌──────────────┐  ┌──────────────────┐   │
//! │   │   Registry   │  │ Wake channel │  │ Session gates    │   │
//! │   └──────────────┘  └──────────────┘  └──────────────────┘   │
//! ├──────────────────────────────────────────────────────────────┤
//! │            SessionDriver (SSH protocol layer)                │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use client::{SshClient, SessionDriver};
//! use tokio_util::sync::CancellationToken;
//!
//! async fn uptime(driver: impl SessionDriver) -> client::Result<()> {
//!     let cancel = CancellationToken::new();
//!     let ssh = SshClient::connect(driver, &cancel).await?;
//!
//!     let mut process = ssh.execute("uptime", &cancel).await?;
//!     while let Some((_, line)) = process.read_line(true, true, &cancel).await? {
//!         println!("{line}");
//!     }
//!     println!("exit code: {}", process.exit_code()?);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`client`]: connecting and opening channels
//! - [`poll`]: the poll thread, session registry and wake channel
//! - [`session`]: sessions, the driver seam and channels
//! - [`process`]: remote process I/O and text decoding
//! - [`stream`]: forwarded connections and subsystems
//! - [`config`]: configuration loading and defaults
//! - [`logging`]: tracing subscriber setup
//! - [`error`]: error types

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod poll;
pub mod process;
pub mod session;
pub mod stream;

// Re-export protocol for convenience
pub use protocol;

pub use client::SshClient;
pub use config::Config;
pub use error::{Error, Result};
pub use poll::PollThread;
pub use process::{
    handler_fn, ChunkHandler, ExecuteOptions, ProcessReadType, RemoteProcess, StandardInput,
};
pub use protocol::{ChannelRequest, PollFlags, ProtocolError, StreamKind};
pub use session::{channel_pair, ChannelEndpoint, Session, SessionDriver, SessionId, SshChannel};
pub use stream::SshDataStream;
