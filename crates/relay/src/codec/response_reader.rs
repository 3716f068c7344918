//! Reads a full [`Response`] off an outbound connection.
//!
//! [`ResponseReader`] drives a [`ResponseParser`] with blocks read from the connection until the
//! head is complete, then attaches a body stream chosen in this order:
//!
//! 1. `Content-Length > 0`: a [`BoundedReader`] over the lookahead bytes and the connection
//! 2. chunked, without `Connection: close`: a [`ChunkedReader`] over the same source
//! 3. chunked, with `Connection: close`: the raw source, read until the peer closes
//! 4. otherwise no body
//!
//! Interim `1xx` responses (other than `101 Switching Protocols`) are skipped so the caller
//! always sees the final response.
//!
//! Bytes found past the end of a response mean the connection no longer agrees with the peer on
//! where messages start. They are dropped and the out-of-sync flag, if one is attached, is raised.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, ready};

use bytes::{BufMut, Bytes, BytesMut};
use http::{StatusCode, Version};
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tracing::{debug, trace, warn};

use crate::RelayOptions;
use crate::codec::body::{BoundedReader, ChunkedReader, PrefixedReader};
use crate::codec::response_parser::{ResponseHandler, ResponseParser, is_bodiless_status};
use crate::protocol::{Body, BodyFraming, Headers, ParseError, Response};

#[derive(Debug, Clone)]
pub struct ResponseReader {
    read_block_size: usize,
    max_header_bytes: usize,
    expect_body: bool,
    out_of_sync: Option<Arc<AtomicBool>>,
}

/// Collects parser events into the parts of a [`Response`].
#[derive(Debug, Default)]
struct ResponseCollector {
    version: Option<Version>,
    status: Option<StatusCode>,
    reason: String,
    headers: Headers,
    lookahead: BytesMut,
}

impl ResponseHandler for ResponseCollector {
    fn on_status_line(&mut self, version: Version, status: StatusCode, reason: &str) {
        self.version = Some(version);
        self.status = Some(status);
        reason.clone_into(&mut self.reason);
    }

    fn on_header(&mut self, name: &str, value: &str) {
        self.headers.append(name, value);
    }

    fn on_entity_data(&mut self, data: &[u8]) {
        self.lookahead.extend_from_slice(data);
    }
}

impl ResponseReader {
    pub fn new(options: &RelayOptions) -> Self {
        Self {
            read_block_size: options.read_block_size(),
            max_header_bytes: options.max_header_bytes(),
            expect_body: true,
            out_of_sync: None,
        }
    }

    /// Raises `flag` whenever bytes turn up past the end of a response or its chunked body.
    pub fn track_framing(mut self, flag: Arc<AtomicBool>) -> Self {
        self.out_of_sync = Some(flag);
        self
    }

    /// Whether the response may carry a body at all; `false` for replies to `HEAD`.
    pub fn expect_body(mut self, expect: bool) -> Self {
        self.expect_body = expect;
        self
    }

    /// Reads the next final response from `reader`.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` if the head is malformed or too large, or if the connection closes
    /// before the head is complete.
    pub async fn parse<R>(&self, mut reader: R) -> Result<Response, ParseError>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mut carry = Bytes::new();
        loop {
            let mut parser = ResponseParser::with_capacity(ResponseCollector::default(), self.max_header_bytes);
            parser.set_without_entity(!self.expect_body);

            let mut block = BytesMut::with_capacity(self.read_block_size);
            let mut tail = Bytes::new();
            let mut input = std::mem::take(&mut carry);
            loop {
                if !input.is_empty() {
                    let consumed = parser.execute(&input)?;
                    tail = input.slice(consumed..);
                }
                if parser.is_head_complete() {
                    break;
                }

                block.reserve(self.read_block_size);
                let n = reader.read_buf(&mut (&mut block).limit(self.read_block_size)).await?;
                trace!(read = n, "read response block");
                if n == 0 {
                    parser.execute(&[])?;
                }
                input = block.split().freeze();
            }

            let status = parser.status();
            let chunked = parser.is_chunked();
            let content_length = parser.content_length().filter(|len| *len > 0);
            let collector = parser.into_handler();

            let (Some(version), Some(status)) = (collector.version, status) else {
                return Err(ParseError::invalid_status_line("response head without status line"));
            };

            if status.is_informational() && status != StatusCode::SWITCHING_PROTOCOLS {
                debug!(status = status.as_u16(), "skipping interim response");
                carry = tail;
                continue;
            }

            let mut response = Response::new(status);
            response.set_version(version);
            response.set_reason(collector.reason);
            *response.headers_mut() = collector.headers;

            let body = self.assemble_body(&response, content_length, chunked, collector.lookahead.freeze(), reader);
            if !tail.is_empty() {
                warn!(discarded = tail.len(), "bytes past the end of the response");
                raise(self.out_of_sync.as_ref());
            }
            response.set_body(body);
            return Ok(response);
        }
    }

    fn assemble_body<R>(
        &self,
        response: &Response,
        content_length: Option<u64>,
        chunked: bool,
        lookahead: Bytes,
        reader: R,
    ) -> Option<Body>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        if !self.expect_body || is_bodiless_status(response.status()) {
            return None;
        }

        let source = PrefixedReader::new(lookahead, reader);
        if let Some(len) = content_length {
            return Some(Body::streaming(BoundedReader::new(source, len), BodyFraming::Length(len)));
        }

        if chunked {
            if response.headers().is_connection_close() {
                return Some(Body::streaming(source, BodyFraming::CloseDelimited));
            }
            let reader = ChunkedBody { inner: ChunkedReader::new(source), out_of_sync: self.out_of_sync.clone() };
            return Some(Body::streaming(reader, BodyFraming::Chunked));
        }

        None
    }
}

fn raise(flag: Option<&Arc<AtomicBool>>) {
    if let Some(flag) = flag {
        flag.store(true, Ordering::Release);
    }
}

pin_project! {
    /// A chunked body that checks, once the terminal chunk is read, that nothing follows it in
    /// the bytes already taken off the connection.
    struct ChunkedBody<R> {
        #[pin]
        inner: ChunkedReader<PrefixedReader<R>>,
        out_of_sync: Option<Arc<AtomicBool>>,
    }
}

impl<R: AsyncRead> AsyncRead for ChunkedBody<R> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let mut this = self.project();
        let before = buf.filled().len();
        ready!(this.inner.as_mut().poll_read(cx, buf))?;

        let reader = this.inner.as_ref().get_ref();
        if buf.filled().len() == before && reader.is_done() {
            let leftover = reader.has_buffered() || !reader.inner().is_prefix_exhausted();
            if leftover {
                warn!(prefix = reader.inner().prefix().len(), "bytes past the terminal chunk");
                raise(this.out_of_sync.take().as_ref());
            }
        }
        Poll::Ready(Ok(()))
    }
}
