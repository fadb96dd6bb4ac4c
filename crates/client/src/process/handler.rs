//! Sinks for bulk output capture.

use std::future::Future;
use std::io;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Receives raw output chunks from [`RemoteProcess::read_to_end`].
///
/// Any `AsyncWrite` is a handler; closures become handlers through
/// [`handler_fn`].
///
/// [`RemoteProcess::read_to_end`]: super::RemoteProcess::read_to_end
pub trait ChunkHandler: Send {
    /// Consumes one chunk. The slice is only valid for the call.
    fn handle<'a>(&'a mut self, chunk: &'a [u8]) -> BoxFuture<'a, io::Result<()>>;

    /// Called once after the last chunk.
    fn finish(&mut self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

impl<W> ChunkHandler for W
where
    W: AsyncWrite + Unpin + Send + ?Sized,
{
    fn handle<'a>(&'a mut self, chunk: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(self.write_all(chunk))
    }

    fn finish(&mut self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(self.flush())
    }
}

/// Handler backed by an async closure over owned chunks.
pub struct FnHandler<F> {
    f: F,
}

/// Wraps `f` as a [`ChunkHandler`].
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: FnMut(Bytes) -> Fut + Send,
    Fut: Future<Output = io::Result<()>> + Send + 'static,
{
    FnHandler { f }
}

impl<F, Fut> ChunkHandler for FnHandler<F>
where
    F: FnMut(Bytes) -> Fut + Send,
    Fut: Future<Output = io::Result<()>> + Send + 'static,
{
    fn handle<'a>(&'a mut self, chunk: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        Box::pin((self.f)(Bytes::copy_from_slice(chunk)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_vec_is_a_handler() {
        let mut sink: Vec<u8> = Vec::new();
        {
            let handler: &mut dyn ChunkHandler = &mut sink;
            handler.handle(b"abc").await.unwrap();
            handler.handle(b"def").await.unwrap();
            handler.finish().await.unwrap();
        }
        assert_eq!(sink, b"abcdef");
    }

    #[tokio::test]
    async fn test_closure_handler_receives_chunks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut handler = handler_fn(move |chunk: Bytes| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(chunk);
                Ok(())
            }
        });

        handler.handle(b"one").await.unwrap();
        handler.handle(b"two").await.unwrap();
        handler.finish().await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, [Bytes::from_static(b"one"), Bytes::from_static(b"two")]);
    }

    #[tokio::test]
    async fn test_handler_error_propagates() {
        let mut handler = handler_fn(|_chunk: Bytes| async {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        });
        let err = handler.handle(b"x").await.unwrap_err();
        assert_eq!(err.to_string(), "disk full");
    }
}
