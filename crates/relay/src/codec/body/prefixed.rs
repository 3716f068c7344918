use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, ReadBuf};

pin_project! {
    /// Replays bytes a head parser already pulled off the wire, then continues with the inner
    /// reader.
    ///
    /// Once the prefix is used up every read goes straight to `inner`.
    #[derive(Debug)]
    pub struct PrefixedReader<R> {
        prefix: Bytes,
        #[pin]
        inner: R,
    }
}

impl<R> PrefixedReader<R> {
    pub fn new(prefix: Bytes, inner: R) -> Self {
        Self { prefix, inner }
    }

    pub fn is_prefix_exhausted(&self) -> bool {
        self.prefix.is_empty()
    }

    /// The part of the prefix that has not been read yet.
    pub fn prefix(&self) -> &Bytes {
        &self.prefix
    }

    /// Returns the inner reader, dropping any unread prefix bytes.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead> AsyncRead for PrefixedReader<R> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        if this.prefix.is_empty() {
            return this.inner.poll_read(cx, buf);
        }

        let n = this.prefix.len().min(buf.remaining());
        buf.put_slice(&this.prefix.split_to(n));
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn one_large_read_sees_everything() {
        let inner: &[u8] = b" world";
        let mut reader = PrefixedReader::new(Bytes::from_static(b"hello"), inner);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello world");
        assert!(reader.is_prefix_exhausted());
    }

    #[tokio::test]
    async fn byte_by_byte_matches() {
        let inner: &[u8] = b"defg";
        let mut reader = PrefixedReader::new(Bytes::from_static(b"abc"), inner);

        let mut out = Vec::new();
        let mut byte = [0u8; 1];
        while reader.read(&mut byte).await.unwrap() == 1 {
            out.push(byte[0]);
        }
        assert_eq!(out, b"abcdefg");
    }

    #[tokio::test]
    async fn empty_prefix_goes_straight_to_inner() {
        let inner: &[u8] = b"xyz";
        let mut reader = PrefixedReader::new(Bytes::new(), inner);
        assert!(reader.is_prefix_exhausted());

        let mut out = [0u8; 2];
        assert_eq!(reader.read(&mut out).await.unwrap(), 2);
        assert_eq!(&out, b"xy");
        assert_eq!(reader.into_inner(), b"z");
    }
}
