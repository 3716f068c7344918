use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, ReadBuf};

use crate::utils::poll_read_limited;

pin_project! {
    /// Exposes exactly `max` bytes of the inner reader, then reports end-of-stream.
    ///
    /// This is what keeps a `Content-Length` body from reading into the next message on a
    /// kept-alive connection: once the budget is spent the inner reader is never polled again.
    /// An inner reader that ends before the budget is spent fails with `UnexpectedEof`.
    #[derive(Debug)]
    pub struct BoundedReader<R> {
        #[pin]
        inner: R,
        remaining: u64,
    }
}

impl<R> BoundedReader<R> {
    pub fn new(inner: R, max: u64) -> Self {
        Self { inner, remaining: max }
    }

    /// Bytes that may still be read before the budget runs out.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead> AsyncRead for BoundedReader<R> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        if *this.remaining == 0 || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let limit = usize::try_from(*this.remaining).unwrap_or(usize::MAX);
        let n = ready!(poll_read_limited(this.inner, cx, buf, limit))?;
        if n == 0 {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("body ended with {} of its declared bytes missing", this.remaining),
            )));
        }
        *this.remaining -= n as u64;
        Poll::Ready(Ok(()))
    }
}
