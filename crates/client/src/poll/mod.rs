//! Readiness multiplexing across sessions.
//!
//! - [`thread`]: the poll loop and its handle
//! - [`registry`]: sessions currently served by a loop
//! - [`wake`]: the socket pair used to interrupt a blocked wait

pub mod registry;
pub mod thread;
pub mod wake;

pub use registry::{RegistryEntry, SessionRegistry};
pub use thread::{PollThread, Registration, DEFAULT_POLL_THREAD_NAME};
pub use wake::WakeChannel;
