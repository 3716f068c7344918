//! HTTP request representation.
//!
//! A [`Request`] is produced by the request parser for every message read off an inbound
//! connection, and written by an outbound connection when a handler relays it to a backend.
//! Its headers keep their wire casing; `Content-Length` is always read through the header
//! collection.

use std::io;

use bytes::Bytes;
use http::{Method, Version};

use crate::ids::next_request_id;
use crate::protocol::body::buffer_message_body;
use crate::protocol::{Body, Headers};

/// The request line and headers of a parsed request, before a body is attached.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub target: String,
    pub version: Version,
    pub headers: Headers,
}

#[derive(Debug)]
pub struct Request {
    id: u64,
    method: Method,
    target: String,
    version: Version,
    headers: Headers,
    body: Option<Body>,
}

impl Request {
    /// Creates an HTTP/1.1 request with no headers and no body.
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self::from_head(
            RequestHead { method, target: target.into(), version: Version::HTTP_11, headers: Headers::new() },
            None,
        )
    }

    pub fn from_head(head: RequestHead, body: Option<Body>) -> Self {
        let RequestHead { method, target, version, headers } = head;
        Self { id: next_request_id(), method, target, version, headers, body }
    }

    /// Process-wide unique id, assigned at construction.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn set_target(&mut self, target: impl Into<String>) {
        self.target = target.into();
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn set_version(&mut self, version: Version) {
        self.version = version;
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

    /// Whether the body has been materialized into memory.
    pub fn is_buffered(&self) -> bool {
        self.body.as_ref().is_some_and(Body::is_buffered)
    }

    /// Reads the whole body into memory, fixing up the framing headers.
    pub async fn buffer_body(&mut self) -> io::Result<Option<Bytes>> {
        buffer_message_body(&mut self.body, &mut self.headers).await
    }

    /// Skips whatever is left of the body so the connection can carry the next message.
    pub async fn drain_body(&mut self) -> io::Result<u64> {
        match self.body.as_mut() {
            Some(body) => body.drain().await,
            None => Ok(0),
        }
    }
}
