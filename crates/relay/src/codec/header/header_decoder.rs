//! Request head decoder built on `httparse`.
//!
//! [`RequestHeadDecoder`] turns the bytes of a request line and its header fields into a
//! [`RequestHead`]. It is a [`Decoder`], so it can be driven by a `Framed` or, as the request
//! parser does, fed a growing buffer directly.
//!
//! # Limits
//!
//! - Maximum number of headers: 64 by default
//! - Maximum head size: 64KB by default
//! - Only HTTP/1.0 and HTTP/1.1
//!
//! Header names keep the casing they had on the wire. Values are taken as-is; bytes that are
//! not valid UTF-8 are replaced rather than rejected.

use bytes::{Buf, BytesMut};
use http::{Method, Version};
use httparse::{Error, Status};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::protocol::{Headers, ParseError, RequestHead};
use crate::utils::ensure;

pub const DEFAULT_MAX_HEADERS: usize = 64;

pub const DEFAULT_MAX_HEADER_BYTES: usize = 64 * 1024;

/// Decoder for HTTP request heads implementing the [`Decoder`] trait.
///
/// On success the head bytes are removed from the source buffer; whatever follows them (body
/// bytes or a pipelined request) is left in place.
#[derive(Debug, Clone)]
pub struct RequestHeadDecoder {
    max_headers: usize,
    max_header_bytes: usize,
}

impl RequestHeadDecoder {
    pub fn new(max_headers: usize, max_header_bytes: usize) -> Self {
        Self { max_headers, max_header_bytes }
    }
}

impl Default for RequestHeadDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HEADERS, DEFAULT_MAX_HEADER_BYTES)
    }
}

impl Decoder for RequestHeadDecoder {
    type Item = RequestHead;
    type Error = ParseError;

    /// Attempts to decode a request head from the provided bytes buffer.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(head))` if a complete head was parsed
    /// - `Ok(None)` if more data is needed
    /// - `Err(ParseError)` if parsing failed
    ///
    /// # Errors
    ///
    /// Returns `ParseError` if:
    /// - The number of headers exceeds the configured maximum
    /// - The head is larger than the configured maximum
    /// - The HTTP version is not supported
    /// - The request line or a header field is malformed
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let mut headers = vec![httparse::EMPTY_HEADER; self.max_headers];
        let mut req = httparse::Request::new(&mut headers);

        let status = req.parse(src).map_err(|e| match e {
            Error::TooManyHeaders => ParseError::too_many_headers(self.max_headers),
            e => ParseError::invalid_header(e.to_string()),
        })?;

        let body_offset = match status {
            Status::Complete(body_offset) => body_offset,
            Status::Partial => {
                ensure!(src.len() <= self.max_header_bytes, ParseError::too_large_header(src.len(), self.max_header_bytes));
                return Ok(None);
            }
        };

        trace!(head_size = body_offset, "parsed request head");
        ensure!(body_offset <= self.max_header_bytes, ParseError::too_large_header(body_offset, self.max_header_bytes));

        let version = match req.version {
            Some(0) => Version::HTTP_10,
            Some(1) => Version::HTTP_11,
            // HTTP/2 and HTTP/3 are not spoken here
            _ => return Err(ParseError::InvalidVersion(req.version)),
        };

        let method = req.method.ok_or(ParseError::InvalidMethod)?;
        let method = Method::from_bytes(method.as_bytes()).map_err(|_invalid| ParseError::InvalidMethod)?;
        let target = req.path.ok_or(ParseError::InvalidUri)?.to_string();

        let mut fields = Headers::with_capacity(req.headers.len());
        for header in req.headers.iter() {
            fields.append(header.name, String::from_utf8_lossy(header.value).into_owned());
        }

        src.advance(body_offset);
        Ok(Some(RequestHead { method, target, version, headers: fields }))
    }
}
