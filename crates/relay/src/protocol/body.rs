//! Message bodies.
//!
//! A [`Body`] is either a streaming byte source assembled by the parsers (a bounded, chunked or
//! close-delimited reader layered over the connection) or an in-memory buffer. Streaming bodies
//! are never materialized unless a caller asks for it with [`Body::buffer`].

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, ready};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

use crate::protocol::Headers;

const DRAIN_BUFFER_SIZE: usize = 8 * 1024;

/// How the bytes of a body are delimited on the wire it was read from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BodyFraming {
    /// Exactly this many bytes, as declared by `Content-Length`.
    Length(u64),
    /// Decoded chunked transfer coding; the reader yields payload only.
    Chunked,
    /// Raw bytes until the peer closes the connection.
    CloseDelimited,
    /// Held in memory.
    Buffered,
}

enum Source {
    Streaming(Pin<Box<dyn AsyncRead + Send>>),
    Buffered(Bytes),
}

pub struct Body {
    source: Source,
    framing: BodyFraming,
    consumed: u64,
    finished: bool,
    completion: Option<Arc<AtomicBool>>,
}

impl Body {
    pub fn streaming<R>(reader: R, framing: BodyFraming) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self { source: Source::Streaming(Box::pin(reader)), framing, consumed: 0, finished: false, completion: None }
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            source: Source::Buffered(bytes.into()),
            framing: BodyFraming::Buffered,
            consumed: 0,
            finished: false,
            completion: None,
        }
    }

    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new())
    }

    /// Registers a flag that is raised once the body has been read to its end.
    pub(crate) fn with_completion(mut self, flag: Arc<AtomicBool>) -> Self {
        flag.store(false, Ordering::Release);
        self.completion = Some(flag);
        self
    }

    pub fn framing(&self) -> BodyFraming {
        self.framing
    }

    pub fn is_buffered(&self) -> bool {
        matches!(self.source, Source::Buffered(_))
    }

    /// Whether every byte of the body has already been yielded.
    pub fn is_end_stream(&self) -> bool {
        match &self.source {
            Source::Buffered(bytes) => bytes.is_empty(),
            Source::Streaming(_) => self.finished,
        }
    }

    /// The number of bytes left to read, when it is known up front.
    pub fn size_hint(&self) -> Option<u64> {
        match (&self.source, self.framing) {
            (Source::Buffered(bytes), _) => Some(bytes.len() as u64),
            (Source::Streaming(_), BodyFraming::Length(len)) if !self.finished => {
                Some(len.saturating_sub(self.consumed))
            }
            (Source::Streaming(_), _) if self.finished => Some(0),
            _ => None,
        }
    }

    /// The unread bytes of a buffered body.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match &self.source {
            Source::Buffered(bytes) => Some(bytes),
            Source::Streaming(_) => None,
        }
    }

    /// Reads the rest of the body into memory and returns it.
    ///
    /// Afterwards the body is buffered: reading it again yields the same bytes.
    pub async fn buffer(&mut self) -> io::Result<Bytes> {
        if let Source::Buffered(bytes) = &self.source {
            return Ok(bytes.clone());
        }

        let mut buf = BytesMut::with_capacity(DRAIN_BUFFER_SIZE);
        loop {
            buf.reserve(DRAIN_BUFFER_SIZE);
            if self.read_buf(&mut buf).await? == 0 {
                break;
            }
        }

        let bytes = buf.freeze();
        self.source = Source::Buffered(bytes.clone());
        self.framing = BodyFraming::Buffered;
        self.consumed = 0;
        self.finished = false;
        Ok(bytes)
    }

    /// Consumes the rest of the body without keeping it, returning the number of bytes skipped.
    pub async fn drain(&mut self) -> io::Result<u64> {
        if let Source::Buffered(bytes) = &mut self.source {
            let len = bytes.len() as u64;
            *bytes = Bytes::new();
            self.mark_finished();
            return Ok(len);
        }

        let mut scratch = [0u8; DRAIN_BUFFER_SIZE];
        let mut total = 0u64;
        loop {
            let n = self.read(&mut scratch).await?;
            if n == 0 {
                return Ok(total);
            }
            total += n as u64;
        }
    }

    fn mark_finished(&mut self) {
        self.finished = true;
        if let Some(flag) = &self.completion {
            flag.store(true, Ordering::Release);
        }
    }
}

impl AsyncRead for Body {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.finished || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        match &mut this.source {
            Source::Buffered(bytes) => {
                let n = bytes.len().min(buf.remaining());
                buf.put_slice(&bytes.split_to(n));
                if bytes.is_empty() {
                    this.mark_finished();
                }
            }
            Source::Streaming(reader) => {
                let before = buf.filled().len();
                ready!(reader.as_mut().poll_read(cx, buf))?;
                let n = buf.filled().len() - before;
                if n == 0 {
                    this.mark_finished();
                }
                this.consumed += n as u64;
            }
        }

        Poll::Ready(Ok(()))
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body")
            .field("framing", &self.framing)
            .field("buffered", &self.is_buffered())
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Self::from_bytes(s)
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Self::from_bytes(Bytes::from_static(s.as_bytes()))
    }
}

/// Buffers `body` in place and rewrites the framing headers to describe the buffered bytes.
///
/// A decoded chunked body loses its `Transfer-Encoding` and gains a `Content-Length`. A raw
/// close-delimited body that still carries chunk framing keeps its headers untouched.
pub(crate) async fn buffer_message_body(body: &mut Option<Body>, headers: &mut Headers) -> io::Result<Option<Bytes>> {
    let Some(body) = body.as_mut() else {
        return Ok(None);
    };

    let framing = body.framing();
    let bytes = body.buffer().await?;
    match framing {
        BodyFraming::Chunked => {
            headers.remove(super::headers::TRANSFER_ENCODING);
            headers.set_content_length(bytes.len() as u64);
        }
        BodyFraming::CloseDelimited if !headers.is_chunked() => {
            headers.set_content_length(bytes.len() as u64);
        }
        _ => {}
    }
    Ok(Some(bytes))
}
