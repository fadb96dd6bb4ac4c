//! Remote process I/O.
//!
//! [`RemoteProcess`] wraps an exec channel with raw, bulk and line-oriented
//! reads over standard output and standard error, plus encoded writes to
//! standard input.

mod handler;
mod line_buffer;
mod options;
mod remote_process;
mod stdin;

pub use handler::{handler_fn, ChunkHandler, FnHandler};
pub use line_buffer::LineBuffer;
pub use options::ExecuteOptions;
pub use remote_process::{ProcessReadType, RemoteProcess};
pub use stdin::{StandardInput, TransportFault};
