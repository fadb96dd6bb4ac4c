//! # sshmux Protocol Contracts
//!
//! This crate defines the seam between the sshmux runtime and the SSH
//! protocol layer. The protocol layer (key exchange, encryption,
//! authentication, packet framing, SFTP) lives elsewhere; the runtime only
//! sees the types defined here.
//!
//! ## Overview
//!
//! - **Poll interest**: [`PollFlags`] tell the poll loop which socket events a
//!   session is waiting for
//! - **Channels**: the [`Channel`] trait is an asynchronous, cancelable byte
//!   channel that classifies reads by [`ReadType`]
//! - **Channel requests**: [`ChannelRequest`] names what a caller wants opened
//! - **Errors**: [`ProtocolError`] covers transport faults and cancellation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   Process I/O facade / data streams     │  text decoding, lines
//! ├─────────────────────────────────────────┤
//! │         Channel (this crate)            │  stdout / stderr / exit
//! ├─────────────────────────────────────────┤
//! │     Session + poll loop (client)        │  readiness, gating
//! ├─────────────────────────────────────────┤
//! │     SSH protocol layer (external)       │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`channel`]: channel trait, read types and open requests
//! - [`poll`]: poll interest flags
//! - [`error`]: error types

pub mod channel;
pub mod error;
pub mod poll;

pub use channel::{Channel, ChannelRequest, ReadType, StreamKind};
pub use error::{ProtocolError, Result};
pub use poll::PollFlags;
