//! Reader for HTTP chunked transfer encoding.
//!
//! [`ChunkedReader`] strips the chunk framing described in
//! [RFC 7230 Section 4.1](https://tools.ietf.org/html/rfc7230#section-4.1) from an inner byte
//! source and yields only the payload. It works on top of any `AsyncRead`, so it can sit over a
//! plain socket, a TLS stream, or a [`PrefixedReader`](super::PrefixedReader) holding bytes a head
//! parser over-read.
//!
//! Framing bytes are requested from the inner reader in the smallest amounts that can complete
//! the current step, and chunk data is read straight into the caller's buffer, limited to what is
//! left of the chunk. The reader therefore never consumes bytes past the final CRLF, which keeps
//! the next message on a kept-alive connection intact.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::{Buf, BytesMut};
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, ReadBuf};
use tracing::trace;

use crate::protocol::ParseError;
use crate::utils::poll_read_limited;
use ChunkedState::*;

pin_project! {
    #[derive(Debug)]
    pub struct ChunkedReader<R> {
        #[pin]
        inner: R,
        state: ChunkedState,
        // framing bytes read from `inner` but not yet consumed by the state machine
        pending: BytesMut,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    /// Read the chunk size in hex
    Size { size: u64, digits: usize },
    /// Whitespace after the size; no more digits may follow
    SizeLws { size: u64 },
    /// Skip chunk extensions
    Extension { size: u64 },
    /// Read LF after chunk size
    SizeLf { size: u64 },
    /// Pass chunk data through
    Body { remaining: u64 },
    /// Read CR after chunk data
    BodyCr,
    /// Read LF after chunk data
    BodyLf,
    /// Skip a trailer field
    Trailer,
    /// Read LF after a trailer field
    TrailerLf,
    /// Read final CR
    EndCr,
    /// Read final LF
    EndLf,
    /// The terminal chunk and its CRLF have been consumed
    Done,
    /// A framing error was reported; decoding cannot resume
    Failed,
}

impl<R> ChunkedReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, state: Size { size: 0, digits: 0 }, pending: BytesMut::new() }
    }

    /// Whether the terminal chunk has been read. A finished reader only ever yields end-of-stream.
    pub fn is_done(&self) -> bool {
        self.state == Done
    }

    /// Whether framing bytes were read from `inner` but not consumed.
    pub fn has_buffered(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead> AsyncRead for ChunkedReader<R> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let mut this = self.project();

        loop {
            match *this.state {
                Done => return Poll::Ready(Ok(())),
                Failed => {
                    return Poll::Ready(Err(ParseError::invalid_chunk("stream already failed").into_io()));
                }
                Body { remaining } => {
                    if buf.remaining() == 0 {
                        return Poll::Ready(Ok(()));
                    }

                    let limit = usize::try_from(remaining).unwrap_or(usize::MAX);
                    let n = if this.pending.is_empty() {
                        let n = ready!(poll_read_limited(this.inner.as_mut(), cx, buf, limit))?;
                        if n == 0 {
                            *this.state = Failed;
                            return Poll::Ready(Err(unexpected_eof()));
                        }
                        n
                    } else {
                        let n = limit.min(this.pending.len()).min(buf.remaining());
                        buf.put_slice(&this.pending.split_to(n));
                        n
                    };

                    trace!(len = n, "read chunked bytes");
                    let remaining = remaining - n as u64;
                    *this.state = if remaining == 0 { BodyCr } else { Body { remaining } };
                    return Poll::Ready(Ok(()));
                }
                mut state => {
                    if this.pending.is_empty() {
                        let mut scratch = [0u8; 3];
                        let mut framing = ReadBuf::new(&mut scratch[..state.read_hint()]);
                        ready!(this.inner.as_mut().poll_read(cx, &mut framing))?;
                        if framing.filled().is_empty() {
                            *this.state = Failed;
                            return Poll::Ready(Err(unexpected_eof()));
                        }
                        this.pending.extend_from_slice(framing.filled());
                    }

                    while state.is_framing() && this.pending.has_remaining() {
                        match state.step(this.pending.get_u8()) {
                            Ok(next) => state = next,
                            Err(e) => {
                                *this.state = Failed;
                                return Poll::Ready(Err(e.into_io()));
                            }
                        }
                    }

                    if state == Done {
                        trace!("finished reading chunked data");
                    }
                    *this.state = state;
                }
            }
        }
    }
}

fn unexpected_eof() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed before the terminal chunk")
}

impl ChunkedState {
    fn is_framing(self) -> bool {
        !matches!(self, Body { .. } | Done | Failed)
    }

    /// How many bytes the inner reader can be asked for without reading past the end of the
    /// chunked message.
    fn read_hint(self) -> usize {
        match self {
            // at least one digit plus CRLF
            Size { digits: 0, .. } => 3,
            // at least the CRLF ending the line
            Size { .. } | SizeLws { .. } | Extension { .. } | BodyCr | Trailer | EndCr => 2,
            _ => 1,
        }
    }

    /// Advances the state machine by one framing byte.
    fn step(self, byte: u8) -> Result<ChunkedState, ParseError> {
        match self {
            Size { size, digits } => Self::read_size(size, digits, byte),
            SizeLws { size } => match byte {
                b'\t' | b' ' => Ok(SizeLws { size }),
                b';' => Ok(Extension { size }),
                b'\r' => Ok(SizeLf { size }),
                _ => Err(ParseError::invalid_chunk("invalid chunk size linear white space")),
            },
            // extensions are ignored; they end at the next CRLF and may not contain a bare LF
            Extension { size } => match byte {
                b'\r' => Ok(SizeLf { size }),
                b'\n' => Err(ParseError::invalid_chunk("invalid chunk extension contains newline")),
                _ => Ok(Extension { size }),
            },
            SizeLf { size } => match byte {
                b'\n' if size == 0 => Ok(EndCr),
                b'\n' => Ok(Body { remaining: size }),
                _ => Err(ParseError::invalid_chunk("invalid chunk size LF")),
            },
            BodyCr => match byte {
                b'\r' => Ok(BodyLf),
                _ => Err(ParseError::invalid_chunk("invalid chunk body CR")),
            },
            BodyLf => match byte {
                b'\n' => Ok(Size { size: 0, digits: 0 }),
                _ => Err(ParseError::invalid_chunk("invalid chunk body LF")),
            },
            Trailer => match byte {
                b'\r' => Ok(TrailerLf),
                _ => Ok(Trailer),
            },
            TrailerLf => match byte {
                b'\n' => Ok(EndCr),
                _ => Err(ParseError::invalid_chunk("invalid trailer end LF")),
            },
            EndCr => match byte {
                b'\r' => Ok(EndLf),
                _ => Ok(Trailer),
            },
            EndLf => match byte {
                b'\n' => Ok(Done),
                _ => Err(ParseError::invalid_chunk("invalid chunk end LF")),
            },
            Body { .. } | Done | Failed => Ok(self),
        }
    }

    fn read_size(size: u64, digits: usize, byte: u8) -> Result<ChunkedState, ParseError> {
        let digit = match byte {
            b'0'..=b'9' => byte - b'0',
            b'a'..=b'f' => byte + 10 - b'a',
            b'A'..=b'F' => byte + 10 - b'A',
            b'\t' | b' ' | b';' | b'\r' if digits == 0 => {
                return Err(ParseError::invalid_chunk("missing chunk size"));
            }
            b'\t' | b' ' => return Ok(SizeLws { size }),
            b';' => return Ok(Extension { size }),
            b'\r' => return Ok(SizeLf { size }),
            _ => return Err(ParseError::invalid_chunk("invalid chunk size line: Invalid Size")),
        };

        size.checked_mul(16)
            .and_then(|size| size.checked_add(u64::from(digit)))
            .map(|size| Size { size, digits: digits + 1 })
            .ok_or_else(|| ParseError::invalid_chunk("invalid overflow chunked length"))
    }
}
