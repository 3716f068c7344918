//! Serialization of request and response heads.
//!
//! [`HeadEncoder`] writes a start line followed by every header exactly as stored, in order and
//! with its original casing. It does not add or rewrite framing headers; the message writer
//! relies on the headers already describing the body that follows.

use std::io;
use std::io::Write;

use bytes::{BufMut, BytesMut};
use http::Version;
use tokio_util::codec::Encoder;
use tracing::error;

use crate::protocol::{Headers, Request, Response, SendError};

/// Initial buffer size allocated for head serialization
const INIT_HEADER_SIZE: usize = 4 * 1024;

#[derive(Debug, Default, Clone, Copy)]
pub struct HeadEncoder;

impl Encoder<&Request> for HeadEncoder {
    type Error = SendError;

    fn encode(&mut self, req: &Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(INIT_HEADER_SIZE);
        let version = version_str(req.version())?;
        write!(FastWrite(dst), "{} {} {}\r\n", req.method(), req.target(), version)?;
        encode_headers(req.headers(), dst);
        Ok(())
    }
}

impl Encoder<&Response> for HeadEncoder {
    type Error = SendError;

    fn encode(&mut self, resp: &Response, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(INIT_HEADER_SIZE);
        let version = version_str(resp.version())?;
        if resp.reason().is_empty() {
            write!(FastWrite(dst), "{} {}\r\n", version, resp.status().as_str())?;
        } else {
            write!(FastWrite(dst), "{} {} {}\r\n", version, resp.status().as_str(), resp.reason())?;
        }
        encode_headers(resp.headers(), dst);
        Ok(())
    }
}

fn version_str(version: Version) -> Result<&'static str, SendError> {
    match version {
        Version::HTTP_10 => Ok("HTTP/1.0"),
        Version::HTTP_11 => Ok("HTTP/1.1"),
        v => {
            error!(http_version = ?v, "unsupported http version");
            Err(SendError::UnsupportedVersion(v))
        }
    }
}

fn encode_headers(headers: &Headers, dst: &mut BytesMut) {
    for (name, value) in headers {
        dst.put_slice(name.as_bytes());
        dst.put_slice(b": ");
        dst.put_slice(value.as_bytes());
        dst.put_slice(b"\r\n");
    }
    dst.put_slice(b"\r\n");
}

/// Fast writer implementation for writing to BytesMut.
///
/// Space has already been reserved, so writes never fail.
struct FastWrite<'a>(&'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, StatusCode};
    use indoc::indoc;

    #[test]
    fn encodes_request_head_verbatim() {
        let mut req = Request::new(Method::POST, "/api?x=1");
        req.headers_mut().append("host", "backend:8080");
        req.headers_mut().append("X-Forwarded-For", "10.0.0.1");
        req.headers_mut().append("Content-Length", "3");

        let mut dst = BytesMut::new();
        HeadEncoder.encode(&req, &mut dst).unwrap();

        let expected = indoc! {"
            POST /api?x=1 HTTP/1.1
            host: backend:8080
            X-Forwarded-For: 10.0.0.1
            Content-Length: 3

        "};
        assert_eq!(std::str::from_utf8(&dst).unwrap(), expected.replace('\n', "\r\n"));
    }

    #[test]
    fn encodes_response_status_line() {
        let mut resp = Response::new(StatusCode::NOT_FOUND);
        resp.set_version(Version::HTTP_10);
        resp.headers_mut().set_content_length(0);

        let mut dst = BytesMut::new();
        HeadEncoder.encode(&resp, &mut dst).unwrap();
        assert_eq!(&dst[..], b"HTTP/1.0 404 Not Found\r\nContent-Length: 0\r\n\r\n");
    }

    #[test]
    fn keeps_custom_reason_and_omits_empty_one() {
        let mut resp = Response::new(StatusCode::OK);
        resp.set_reason("Fine");
        let mut dst = BytesMut::new();
        HeadEncoder.encode(&resp, &mut dst).unwrap();
        assert!(dst.starts_with(b"HTTP/1.1 200 Fine\r\n"));

        resp.set_reason("");
        dst.clear();
        HeadEncoder.encode(&resp, &mut dst).unwrap();
        assert!(dst.starts_with(b"HTTP/1.1 200\r\n"));
    }

    #[test]
    fn rejects_http2() {
        let mut resp = Response::new(StatusCode::OK);
        resp.set_version(Version::HTTP_2);

        let mut dst = BytesMut::new();
        let err = HeadEncoder.encode(&resp, &mut dst).unwrap_err();
        assert!(matches!(err, SendError::UnsupportedVersion(Version::HTTP_2)));
    }
}
