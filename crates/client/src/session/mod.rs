//! Sessions and their channels.
//!
//! This module provides:
//! - The [`SessionDriver`] seam to the SSH protocol layer
//! - [`Session`], which gates all protocol processing for one connection
//! - [`SshChannel`] and [`ChannelEndpoint`], the two halves of a channel

pub mod channel;
pub mod driver;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::{channel_pair, ChannelEndpoint, SshChannel};
pub use driver::{Session, SessionDriver, SessionId};
