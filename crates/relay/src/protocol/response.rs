//! HTTP response representation.

use std::io;

use bytes::Bytes;
use http::{StatusCode, Version};

use crate::ids::next_response_id;
use crate::protocol::body::buffer_message_body;
use crate::protocol::headers::{CONNECTION, TRANSFER_ENCODING};
use crate::protocol::{Body, BodyFraming, Headers};

#[derive(Debug)]
pub struct Response {
    id: u64,
    version: Version,
    status: StatusCode,
    reason: String,
    headers: Headers,
    body: Option<Body>,
}

impl Response {
    /// Creates an HTTP/1.1 response with the canonical reason phrase for `status`.
    pub fn new(status: StatusCode) -> Self {
        Self {
            id: next_response_id(),
            version: Version::HTTP_11,
            status,
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            headers: Headers::new(),
            body: None,
        }
    }

    /// Creates a response carrying `body`, with framing headers that describe it.
    ///
    /// A body of known size gets a `Content-Length`. A decoded chunked stream is sent with
    /// `Transfer-Encoding: chunked`. Any other stream is delimited by closing the connection.
    pub fn with_body(status: StatusCode, body: impl Into<Body>) -> Self {
        let body = body.into();
        let mut response = Self::new(status);
        match (body.size_hint(), body.framing()) {
            (Some(len), _) => response.headers.set_content_length(len),
            (None, BodyFraming::Chunked) => response.headers.set(TRANSFER_ENCODING, "chunked"),
            (None, _) => response.headers.set(CONNECTION, "close"),
        }
        response.body = Some(body);
        response
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn set_reason(&mut self, reason: impl Into<String>) {
        self.reason = reason.into();
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn content_length(&self) -> Option<u64> {
        self.headers.content_length()
    }

    pub fn transfer_encoding(&self) -> Option<&str> {
        self.headers.transfer_encoding()
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub fn body_mut(&mut self) -> Option<&mut Body> {
        self.body.as_mut()
    }

    pub fn set_body(&mut self, body: Option<Body>) {
        self.body = body;
    }

    pub fn take_body(&mut self) -> Option<Body> {
        self.body.take()
    }

    pub fn is_buffered(&self) -> bool {
        self.body.as_ref().is_some_and(Body::is_buffered)
    }

    pub async fn buffer_body(&mut self) -> io::Result<Option<Bytes>> {
        buffer_message_body(&mut self.body, &mut self.headers).await
    }

    pub async fn drain_body(&mut self) -> io::Result<u64> {
        match self.body.as_mut() {
            Some(body) => body.drain().await,
            None => Ok(0),
        }
    }
}
