use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::task::noop_waker_ref;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tracing::trace;

use super::channel::Channel;

/// A channel shared between the connection and the body streams layered over it.
///
/// Bodies returned by the parsers keep reading from the connection after the parse call has
/// returned, so they hold a [`ReadStream`] handle instead of a borrow. The lock is only taken
/// inside a single poll and never held across an await point.
#[derive(Debug, Clone)]
pub(crate) struct Transport {
    channel: Arc<Mutex<Channel>>,
}

impl Transport {
    pub(crate) fn new(channel: Channel) -> Self {
        Self { channel: Arc::new(Mutex::new(channel)) }
    }

    fn lock(&self) -> MutexGuard<'_, Channel> {
        self.channel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn read_stream(&self) -> ReadStream {
        ReadStream { channel: Arc::clone(&self.channel) }
    }

    pub(crate) fn write_stream(&self) -> WriteStream {
        WriteStream { channel: Arc::clone(&self.channel) }
    }

    pub(crate) fn is_secure(&self) -> bool {
        self.lock().is_secure()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().is_closed()
    }

    /// Probes the socket without blocking.
    ///
    /// Pending data or nothing to read yet both count as alive. An orderly close by the peer
    /// (a zero-byte peek) or a socket error counts as dead.
    pub(crate) fn is_alive(&self) -> bool {
        let channel = self.lock();
        let Some(tcp) = channel.tcp() else {
            return false;
        };

        let mut peeked = [0u8; 1];
        let mut buf = ReadBuf::new(&mut peeked);
        let mut cx = Context::from_waker(noop_waker_ref());
        match tcp.poll_peek(&mut cx, &mut buf) {
            Poll::Pending => true,
            Poll::Ready(Ok(n)) => n > 0,
            Poll::Ready(Err(e)) => {
                trace!(cause = %e, "liveness check failed");
                false
            }
        }
    }

    /// Shuts the channel down and marks it closed. Closing twice is a no-op.
    pub(crate) async fn close(&self) {
        let mut channel = std::mem::replace(&mut *self.lock(), Channel::Closed);
        if channel.is_closed() {
            return;
        }
        if let Err(e) = channel.shutdown().await {
            trace!(cause = %e, "shutdown while closing channel failed");
        }
    }
}

/// Read half of a [`Transport`].
#[derive(Debug)]
pub struct ReadStream {
    channel: Arc<Mutex<Channel>>,
}

/// Write half of a [`Transport`].
#[derive(Debug)]
pub struct WriteStream {
    channel: Arc<Mutex<Channel>>,
}

fn with_channel<T>(channel: &Mutex<Channel>, f: impl FnOnce(Pin<&mut Channel>) -> T) -> T {
    let mut guard = channel.lock().unwrap_or_else(PoisonError::into_inner);
    f(Pin::new(&mut *guard))
}

impl AsyncRead for ReadStream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        with_channel(&self.channel, |channel| channel.poll_read(cx, buf))
    }
}

impl AsyncWrite for WriteStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        with_channel(&self.channel, |channel| channel.poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        with_channel(&self.channel, |channel| channel.poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        with_channel(&self.channel, |channel| channel.poll_shutdown(cx))
    }
}
