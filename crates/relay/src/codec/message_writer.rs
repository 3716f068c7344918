use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Encoder;
use tracing::trace;

use crate::codec::body::ChunkedEncoder;
use crate::codec::header::HeadEncoder;
use crate::protocol::{Body, BodyFraming, Headers, PayloadItem, Request, Response, SendError};
use crate::utils::ensure;

/// Writes request and response messages to a peer.
///
/// The head is serialized with [`HeadEncoder`] and the body is then copied through a fixed-size
/// scratch buffer, so a body of any size is relayed with bounded memory. A decoded chunked body
/// whose headers still announce `Transfer-Encoding: chunked` is framed again on the way out;
/// every other body is written as is.
#[derive(Debug)]
pub struct MessageWriter<W> {
    writer: W,
    buffer: BytesMut,
    scratch: Box<[u8]>,
    encoder: HeadEncoder,
}

impl<W> MessageWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn with_capacity(writer: W, buffer_size: usize) -> Self {
        let buffer_size = buffer_size.max(1);
        Self {
            writer,
            buffer: BytesMut::with_capacity(buffer_size),
            scratch: vec![0u8; buffer_size].into_boxed_slice(),
            encoder: HeadEncoder,
        }
    }

    #[inline]
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Writes `request` and streams its body, returning the number of body bytes sent.
    ///
    /// # Errors
    ///
    /// Returns `SendError` if the head cannot be encoded or the peer fails while writing.
    pub async fn write_request(&mut self, request: &mut Request) -> Result<u64, SendError> {
        self.buffer.clear();
        self.encoder.encode(&*request, &mut self.buffer)?;
        let rechunk = needs_rechunk(request.body(), request.headers());
        self.write_body(request.body_mut(), rechunk).await
    }

    /// Writes `response` and streams its body, returning the number of body bytes sent.
    ///
    /// # Errors
    ///
    /// Returns `SendError` if the head cannot be encoded or the peer fails while writing.
    pub async fn write_response(&mut self, response: &mut Response) -> Result<u64, SendError> {
        self.buffer.clear();
        self.encoder.encode(&*response, &mut self.buffer)?;
        let rechunk = needs_rechunk(response.body(), response.headers());
        self.write_body(response.body_mut(), rechunk).await
    }

    async fn write_body(&mut self, body: Option<&mut Body>, rechunk: bool) -> Result<u64, SendError> {
        let Some(body) = body else {
            return self.flush().await.map(|()| 0);
        };

        let expected = match body.framing() {
            BodyFraming::Length(_) => body.size_hint(),
            _ => None,
        };
        let mut encoder = rechunk.then(ChunkedEncoder::new);
        let mut total = 0u64;
        loop {
            let n =
                body.read(&mut self.scratch).await.map_err(|e| SendError::invalid_body(format!("reading body: {e}")))?;
            if n == 0 {
                break;
            }
            total += n as u64;

            let data = &self.scratch[..n];
            match encoder.as_mut() {
                Some(encoder) => encoder.encode(PayloadItem::Chunk(data), &mut self.buffer)?,
                None => self.buffer.extend_from_slice(data),
            }
            self.write_buffer().await?;
            trace!(written = n, total, "relayed body block");
        }

        if let Some(expected) = expected {
            ensure!(
                total == expected,
                SendError::invalid_body(format!("declared {expected} body bytes, the body had {total}"))
            );
        }

        if let Some(encoder) = encoder.as_mut() {
            encoder.encode(PayloadItem::<&[u8]>::Eof, &mut self.buffer)?;
        }
        self.flush().await?;
        Ok(total)
    }

    async fn write_buffer(&mut self) -> Result<(), SendError> {
        if !self.buffer.is_empty() {
            self.writer.write_all(&self.buffer).await?;
            self.buffer.clear();
        }
        Ok(())
    }

    #[inline]
    pub async fn flush(&mut self) -> Result<(), SendError> {
        self.write_buffer().await?;
        Ok(self.writer.flush().await?)
    }
}

fn needs_rechunk(body: Option<&Body>, headers: &Headers) -> bool {
    body.is_some_and(|body| body.framing() == BodyFraming::Chunked) && headers.is_chunked()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::body::{BoundedReader, ChunkedReader};
    use http::{Method, StatusCode};
    use std::io::Cursor;

    #[tokio::test]
    async fn writes_bodiless_request() {
        let mut request = Request::new(Method::GET, "/status");
        request.headers_mut().append("Host", "backend.local");

        let mut writer = MessageWriter::with_capacity(Vec::new(), 16);
        assert_eq!(writer.write_request(&mut request).await.unwrap(), 0);
        assert_eq!(writer.into_inner(), b"GET /status HTTP/1.1\r\nHost: backend.local\r\n\r\n");
    }

    #[tokio::test]
    async fn streams_length_body_in_small_blocks() {
        let mut response = Response::with_body(StatusCode::OK, "hello world");
        let mut writer = MessageWriter::with_capacity(Vec::new(), 3);

        assert_eq!(writer.write_response(&mut response).await.unwrap(), 11);
        assert_eq!(writer.into_inner(), b"HTTP/1.1 200 OK\r\nContent-Length: 11\r\n\r\nhello world");
        assert!(response.body().is_some_and(Body::is_end_stream));
    }

    #[tokio::test]
    async fn decoded_chunked_body_is_framed_again() {
        let wire = b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n".to_vec();
        let mut response = Response::new(StatusCode::OK);
        response.headers_mut().append("Transfer-Encoding", "chunked");
        response.set_body(Some(Body::streaming(ChunkedReader::new(Cursor::new(wire)), BodyFraming::Chunked)));

        let mut writer = MessageWriter::with_capacity(Vec::new(), 64);
        assert_eq!(writer.write_response(&mut response).await.unwrap(), 11);

        let out = writer.into_inner();
        let head_end = out.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        let mut decoded = Vec::new();
        ChunkedReader::new(&out[head_end..]).read_to_end(&mut decoded).await.unwrap();
        assert_eq!(decoded, b"hello world");
        assert!(out.ends_with(b"0\r\n\r\n"));
    }

    #[tokio::test]
    async fn close_delimited_body_is_written_raw() {
        let raw = b"3\r\nabc\r\n0\r\n\r\n";
        let mut response = Response::new(StatusCode::OK);
        response.headers_mut().append("Transfer-Encoding", "chunked");
        response.headers_mut().append("Connection", "close");
        response.set_body(Some(Body::streaming(Cursor::new(raw.to_vec()), BodyFraming::CloseDelimited)));

        let mut writer = MessageWriter::with_capacity(Vec::new(), 4);
        writer.write_response(&mut response).await.unwrap();
        assert!(writer.into_inner().ends_with(raw));
    }

    #[tokio::test]
    async fn truncated_length_body_is_rejected() {
        let mut request = Request::new(Method::POST, "/upload");
        request.headers_mut().append("Content-Length", "10");
        let body = BoundedReader::new(Cursor::new(b"abc".to_vec()), 10);
        request.set_body(Some(Body::streaming(body, BodyFraming::Length(10))));

        let mut writer = MessageWriter::with_capacity(Vec::new(), 64);
        let err = writer.write_request(&mut request).await.unwrap_err();
        assert!(matches!(err, SendError::InvalidBody { .. }), "{err}");
    }

    #[tokio::test]
    async fn length_body_must_match_its_declared_size() {
        let mut response = Response::new(StatusCode::OK);
        response.headers_mut().append("Content-Length", "10");
        response.set_body(Some(Body::streaming(Cursor::new(b"abc".to_vec()), BodyFraming::Length(10))));

        let mut writer = MessageWriter::with_capacity(Vec::new(), 64);
        let err = writer.write_response(&mut response).await.unwrap_err();
        assert!(matches!(err, SendError::InvalidBody { .. }), "{err}");
    }

    #[tokio::test]
    async fn streaming_body_of_unknown_size_is_chunked() {
        let body = Body::streaming(Cursor::new(b"hello".to_vec()), BodyFraming::Chunked);
        let mut response = Response::with_body(StatusCode::OK, body);

        let mut writer = MessageWriter::with_capacity(Vec::new(), 64);
        assert_eq!(writer.write_response(&mut response).await.unwrap(), 5);
        assert_eq!(
            writer.into_inner(),
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n"
        );
    }
}
