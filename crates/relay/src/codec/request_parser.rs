//! Incremental request parsing over a live connection.
//!
//! [`RequestParser`] pulls fixed-size blocks from a reader and feeds them to the `httparse`
//! based [`RequestHeadDecoder`] until a full head is available. Bytes read past the head are
//! replayed into the body through a [`PrefixedReader`], and the body is capped at its
//! `Content-Length` with a [`BoundedReader`].
//!
//! Requests relayed by this crate are either bodiless or length-delimited. A request carrying
//! `Transfer-Encoding`, or a `Content-Length` that is malformed or contradicts itself, is
//! rejected rather than guessed at.
//!
//! The parser belongs to one connection. Bytes that follow a complete request in the same
//! block (a pipelined request) are kept and used by the next call to [`RequestParser::parse`].

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::RelayOptions;
use crate::codec::body::{BoundedReader, PrefixedReader};
use crate::codec::header::RequestHeadDecoder;
use crate::protocol::headers::{CONTENT_LENGTH, TRANSFER_ENCODING};
use crate::protocol::{Body, BodyFraming, Headers, ParseError, Request};
use crate::utils::ensure;

#[derive(Debug)]
pub struct RequestParser {
    decoder: RequestHeadDecoder,
    read_block_size: usize,
    buf: BytesMut,
}

impl RequestParser {
    pub fn new(options: &RelayOptions) -> Self {
        Self {
            decoder: RequestHeadDecoder::new(options.max_headers(), options.max_header_bytes()),
            read_block_size: options.read_block_size(),
            buf: BytesMut::new(),
        }
    }

    /// Whether bytes of a following request are already buffered.
    pub fn has_buffered(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Reads the next request from `reader`.
    ///
    /// Returns `Ok(None)` when the peer closed the connection before sending any byte of a new
    /// request, which is how a client ends a keep-alive session.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` if the head is malformed or too large, if the connection closes in the
    /// middle of a head, or if the body framing is not a plain `Content-Length`.
    pub async fn parse<R>(&mut self, mut reader: R) -> Result<Option<Request>, ParseError>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let head = loop {
            if let Some(head) = self.decoder.decode(&mut self.buf)? {
                break head;
            }

            self.buf.reserve(self.read_block_size);
            let n = reader.read_buf(&mut (&mut self.buf).limit(self.read_block_size)).await?;
            trace!(read = n, buffered = self.buf.len(), "read request block");

            if n == 0 {
                ensure!(self.buf.is_empty(), ParseError::IncompleteHead { read: self.buf.len() });
                return Ok(None);
            }
        };

        let content_length = request_content_length(&head.headers)?;
        let body = match content_length {
            None | Some(0) => {
                if self.has_buffered() {
                    trace!(buffered = self.buf.len(), "keeping pipelined bytes for the next request");
                }
                None
            }
            Some(len) => {
                let buffered = usize::try_from(len).map_or(self.buf.len(), |len| len.min(self.buf.len()));
                let prefix = self.buf.split_to(buffered).freeze();
                let reader = BoundedReader::new(PrefixedReader::new(prefix, reader), len);
                Some(Body::streaming(reader, BodyFraming::Length(len)))
            }
        };

        Ok(Some(Request::from_head(head, body)))
    }

    /// Drops any buffered bytes, e.g. after the connection carrying them failed.
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

/// The declared body length of a request.
///
/// Every `Content-Length` entry must hold the same valid non-negative integer, and
/// `Transfer-Encoding` is not accepted at all.
fn request_content_length(headers: &Headers) -> Result<Option<u64>, ParseError> {
    ensure!(
        !headers.contains(TRANSFER_ENCODING),
        ParseError::invalid_header("transfer-encoding is not supported on requests")
    );

    let mut length = None;
    for value in headers.get_all(CONTENT_LENGTH) {
        let parsed = value
            .trim()
            .parse::<u64>()
            .map_err(|e| ParseError::invalid_content_length(format!("value {value} is not u64: {e}")))?;

        match length {
            Some(previous) if previous != parsed => {
                return Err(ParseError::invalid_content_length("conflicting content-length values"));
            }
            _ => length = Some(parsed),
        }
    }
    Ok(length)
}
