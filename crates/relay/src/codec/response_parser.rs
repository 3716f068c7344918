//! Push-based response parser.
//!
//! Unlike requests, response heads are parsed by a small hand-written state machine instead of
//! `httparse`. Callers push whatever bytes they have with [`ResponseParser::execute`] and observe
//! progress through a [`ResponseHandler`]:
//!
//! ```text
//! NotStarted -> InHeaders -> InEntityData -> Done
//!                       \________________/
//! ```
//!
//! Head bytes are accumulated into a buffer of fixed capacity until the blank line is found.
//! Input that does not fit is split: the part that fits is processed first, then the remainder.
//! A head that still has no terminator once the buffer is full is rejected.
//!
//! After the head, entity data exists iff `Content-Length` is positive or the transfer coding is
//! chunked, unless the status never allows a body (1xx, 204, 304). Entity bytes are forwarded
//! raw (no chunk decoding happens here) and the entity ends when the declared length is reached,
//! or when the caller signals end of input by executing an empty slice, which is how a
//! close-delimited body ends.

use bytes::BytesMut;
use http::{StatusCode, Version};
use tracing::trace;

use crate::codec::header::DEFAULT_MAX_HEADER_BYTES;
use crate::protocol::ParseError;
use crate::protocol::headers::{CONTENT_LENGTH, TRANSFER_ENCODING};

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Receives parser events. Every method has an empty default.
#[allow(unused_variables, reason = "default methods ignore their arguments")]
pub trait ResponseHandler {
    fn on_response_begin(&mut self) {}

    fn on_status_line(&mut self, version: Version, status: StatusCode, reason: &str) {}

    fn on_header(&mut self, name: &str, value: &str) {}

    fn on_headers_end(&mut self) {}

    fn on_entity_start(&mut self) {}

    fn on_entity_data(&mut self, data: &[u8]) {}

    fn on_entity_end(&mut self) {}

    fn on_response_end(&mut self) {}
}

#[derive(Debug)]
enum ParserState {
    NotStarted,
    InHeaders { buf: BytesMut },
    InEntityData { content_length: Option<u64>, written: u64 },
    Done,
}

#[derive(Debug)]
pub struct ResponseParser<H> {
    handler: H,
    state: ParserState,
    capacity: usize,
    without_entity: bool,
    status: Option<StatusCode>,
    content_length: Option<u64>,
    chunked: bool,
}

impl<H: ResponseHandler> ResponseParser<H> {
    pub fn new(handler: H) -> Self {
        Self::with_capacity(handler, DEFAULT_MAX_HEADER_BYTES)
    }

    /// Creates a parser whose head buffer holds at most `capacity` bytes.
    pub fn with_capacity(handler: H, capacity: usize) -> Self {
        Self {
            handler,
            state: ParserState::NotStarted,
            capacity: capacity.max(HEAD_TERMINATOR.len()),
            without_entity: false,
            status: None,
            content_length: None,
            chunked: false,
        }
    }

    /// Treats the response as bodiless whatever its headers say, as for a reply to `HEAD`.
    pub fn without_entity(mut self) -> Self {
        self.without_entity = true;
        self
    }

    pub fn set_without_entity(&mut self, without_entity: bool) {
        self.without_entity = without_entity;
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, ParserState::Done)
    }

    /// Whether the head has been fully parsed.
    pub fn is_head_complete(&self) -> bool {
        matches!(self.state, ParserState::InEntityData { .. } | ParserState::Done)
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// The value of a valid `Content-Length` header, once the head is parsed.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Pushes `data` through the state machine, returning how many of its bytes were consumed.
    ///
    /// An empty slice signals end of input. Bytes are left unconsumed only once the response is
    /// complete: anything after a bodiless head or past the declared `Content-Length` belongs to
    /// whatever follows on the connection.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` if the head is malformed or larger than the buffer, or
    /// [`ParseError::ParserDone`] if the response was already complete.
    pub fn execute(&mut self, data: &[u8]) -> Result<usize, ParseError> {
        match &mut self.state {
            ParserState::NotStarted => {
                self.handler.on_response_begin();
                self.state = ParserState::InHeaders { buf: BytesMut::with_capacity(self.capacity.min(8 * 1024)) };
                self.execute(data)
            }
            ParserState::InHeaders { buf } => {
                if data.is_empty() {
                    return Err(ParseError::IncompleteHead { read: buf.len() });
                }

                let room = self.capacity - buf.len();
                if data.len() > room {
                    let (fits, rest) = data.split_at(room);
                    let consumed = if fits.is_empty() { 0 } else { self.execute(fits)? };
                    return match self.state {
                        ParserState::InHeaders { .. } => {
                            Err(ParseError::too_large_header(self.capacity + rest.len(), self.capacity))
                        }
                        ParserState::Done => Ok(consumed),
                        _ => Ok(consumed + self.execute(rest)?),
                    };
                }

                // the terminator may straddle the previous input
                let previous = buf.len();
                let search_from = previous.saturating_sub(HEAD_TERMINATOR.len() - 1);
                buf.extend_from_slice(data);
                let Some(pos) = find(&buf[search_from..], HEAD_TERMINATOR) else {
                    return Ok(data.len());
                };

                let head_end = search_from + pos + HEAD_TERMINATOR.len();
                let head = std::mem::take(buf);
                let consumed = head_end - previous;
                trace!(head_size = head_end, lookahead = data.len() - consumed, "parsed response head");

                self.parse_head(&head[..head_end])?;
                self.start_entity();

                let rest = &data[consumed..];
                if rest.is_empty() || self.is_complete() {
                    return Ok(consumed);
                }
                Ok(consumed + self.execute(rest)?)
            }
            ParserState::InEntityData { content_length, written } => {
                if data.is_empty() {
                    self.finish_entity();
                    return Ok(0);
                }

                let take = match *content_length {
                    Some(len) => usize::try_from(len - *written).map_or(data.len(), |left| left.min(data.len())),
                    None => data.len(),
                };
                *written += take as u64;
                let reached = content_length.is_some_and(|len| *written >= len);

                self.handler.on_entity_data(&data[..take]);
                if reached {
                    self.finish_entity();
                }
                Ok(take)
            }
            ParserState::Done => Err(ParseError::ParserDone),
        }
    }

    fn start_entity(&mut self) {
        let content_length = self.content_length.filter(|len| *len > 0);
        let bodiless = self.without_entity || self.status.is_some_and(is_bodiless_status);
        let has_entity = !bodiless && (content_length.is_some() || self.chunked);

        if has_entity {
            self.handler.on_entity_start();
            self.state = ParserState::InEntityData { content_length, written: 0 };
        } else {
            self.state = ParserState::Done;
            self.handler.on_response_end();
        }
    }

    fn finish_entity(&mut self) {
        self.state = ParserState::Done;
        self.handler.on_entity_end();
        self.handler.on_response_end();
    }

    fn parse_head(&mut self, head: &[u8]) -> Result<(), ParseError> {
        let head = String::from_utf8_lossy(head);
        let mut lines = head.split("\r\n");

        let status_line = lines.next().unwrap_or_default();
        let (version, status, reason) = parse_status_line(status_line)?;
        self.status = Some(status);
        self.handler.on_status_line(version, status, reason);

        for line in lines.filter(|line| !line.is_empty()) {
            let (name, value) =
                line.split_once(':').ok_or_else(|| ParseError::invalid_header(format!("missing colon in {line:?}")))?;
            let name = name.trim();
            let value = value.trim();
            if name.is_empty() {
                return Err(ParseError::invalid_header("empty header name"));
            }

            if name.eq_ignore_ascii_case(CONTENT_LENGTH) {
                let len = value
                    .parse::<u64>()
                    .map_err(|e| ParseError::invalid_content_length(format!("value {value} is not u64: {e}")))?;
                match self.content_length {
                    Some(previous) if previous != len => {
                        return Err(ParseError::invalid_content_length("conflicting content-length values"));
                    }
                    _ => self.content_length = Some(len),
                }
            } else if name.eq_ignore_ascii_case(TRANSFER_ENCODING) {
                self.chunked =
                    value.rsplit(',').next().is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"));
            }

            self.handler.on_header(name, value);
        }

        self.handler.on_headers_end();
        Ok(())
    }
}

/// Interim (1xx), `204 No Content` and `304 Not Modified` responses never carry a body.
pub(crate) fn is_bodiless_status(status: StatusCode) -> bool {
    status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED
}

/// Parses `HTTP/<major>.<minor> <3-digit-code>[ <reason>]`.
fn parse_status_line(line: &str) -> Result<(Version, StatusCode, &str), ParseError> {
    let rest = line
        .strip_prefix("HTTP/")
        .ok_or_else(|| ParseError::invalid_status_line(format!("missing protocol in {line:?}")))?;

    let (version, rest) = rest
        .split_once(' ')
        .ok_or_else(|| ParseError::invalid_status_line(format!("missing status code in {line:?}")))?;
    let version = match version {
        "1.0" => Version::HTTP_10,
        "1.1" => Version::HTTP_11,
        other => {
            let minor = other.strip_prefix("1.").and_then(|minor| minor.parse::<u8>().ok());
            return Err(ParseError::InvalidVersion(minor));
        }
    };

    let (code, reason) = rest.split_once(' ').unwrap_or((rest, ""));
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::invalid_status_line(format!("invalid status code {code:?}")));
    }
    let status = StatusCode::from_bytes(code.as_bytes()).map_err(ParseError::invalid_status_line)?;

    Ok((version, status, reason.trim()))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Recorder {
        events: Vec<String>,
        headers: Vec<(String, String)>,
        status: Option<(Version, StatusCode, String)>,
        entity: Vec<u8>,
    }

    impl ResponseHandler for Recorder {
        fn on_response_begin(&mut self) {
            self.events.push("begin".into());
        }

        fn on_status_line(&mut self, version: Version, status: StatusCode, reason: &str) {
            self.status = Some((version, status, reason.to_string()));
        }

        fn on_header(&mut self, name: &str, value: &str) {
            self.headers.push((name.to_string(), value.to_string()));
        }

        fn on_headers_end(&mut self) {
            self.events.push("headers_end".into());
        }

        fn on_entity_start(&mut self) {
            self.events.push("entity_start".into());
        }

        fn on_entity_data(&mut self, data: &[u8]) {
            self.entity.extend_from_slice(data);
        }

        fn on_entity_end(&mut self) {
            self.events.push("entity_end".into());
        }

        fn on_response_end(&mut self) {
            self.events.push("end".into());
        }
    }

    const HELLO: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";

    #[test]
    fn content_length_in_one_call() {
        let mut parser = ResponseParser::new(Recorder::default());
        parser.execute(HELLO).unwrap();

        assert!(parser.is_complete());
        let recorder = parser.into_handler();
        assert_eq!(recorder.status, Some((Version::HTTP_11, StatusCode::OK, "OK".to_string())));
        assert_eq!(recorder.headers, vec![("Content-Length".to_string(), "5".to_string())]);
        assert_eq!(recorder.entity, b"hello");
        assert_eq!(recorder.events, vec!["begin", "headers_end", "entity_start", "entity_end", "end"]);
    }

    #[test]
    fn content_length_split_at_every_offset() {
        for split in 0..=HELLO.len() {
            let (first, second) = HELLO.split_at(split);
            let mut parser = ResponseParser::new(Recorder::default());
            if !first.is_empty() {
                parser.execute(first).unwrap();
            }
            if !second.is_empty() {
                parser.execute(second).unwrap();
            }

            assert!(parser.is_complete(), "split at {split}");
            let recorder = parser.into_handler();
            assert_eq!(recorder.entity, b"hello", "split at {split}");
            assert_eq!(recorder.headers.len(), 1);
        }
    }

    #[test]
    fn byte_at_a_time() {
        let mut parser = ResponseParser::new(Recorder::default());
        for byte in HELLO {
            parser.execute(std::slice::from_ref(byte)).unwrap();
        }
        assert!(parser.is_complete());
        assert_eq!(parser.handler().entity, b"hello");
    }

    #[test]
    fn no_content_ends_without_more_input() {
        let mut parser = ResponseParser::new(Recorder::default());
        parser.execute(b"HTTP/1.1 204 No Content\r\nServer: test\r\n\r\n").unwrap();

        assert!(parser.is_complete());
        assert_eq!(parser.handler().events, vec!["begin", "headers_end", "end"]);
    }

    #[test]
    fn extra_bytes_after_entity_are_not_consumed() {
        let input = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nokHTTP/1.1 200 OK\r\n";
        let mut parser = ResponseParser::new(Recorder::default());
        let consumed = parser.execute(input).unwrap();

        assert!(parser.is_complete());
        assert_eq!(parser.handler().entity, b"ok");
        assert_eq!(&input[consumed..], b"HTTP/1.1 200 OK\r\n");
    }

    #[test]
    fn interim_response_leaves_the_final_one() {
        let input = b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\n\r\n";
        let mut parser = ResponseParser::new(Recorder::default());
        let consumed = parser.execute(input).unwrap();

        assert!(parser.is_complete());
        assert_eq!(parser.status(), Some(StatusCode::CONTINUE));
        assert_eq!(&input[consumed..], b"HTTP/1.1 200 OK\r\n\r\n");
    }

    #[test]
    fn not_modified_ignores_content_length() {
        let mut parser = ResponseParser::new(Recorder::default());
        parser.execute(b"HTTP/1.1 304 Not Modified\r\nContent-Length: 120\r\n\r\n").unwrap();
        assert!(parser.is_complete());
        assert_eq!(parser.handler().events, vec!["begin", "headers_end", "end"]);
    }

    #[test]
    fn chunked_entity_forwards_raw_bytes_until_end_of_input() {
        let mut parser = ResponseParser::new(Recorder::default());
        parser.execute(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n").unwrap();
        assert!(parser.is_head_complete());
        assert!(!parser.is_complete());
        assert!(parser.is_chunked());

        parser.execute(b"0\r\n\r\n").unwrap();
        parser.execute(b"").unwrap();
        assert!(parser.is_complete());
        assert_eq!(parser.handler().entity, b"5\r\nhello\r\n0\r\n\r\n");
    }

    #[test]
    fn without_entity_skips_body() {
        let mut parser = ResponseParser::new(Recorder::default()).without_entity();
        parser.execute(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\n").unwrap();
        assert!(parser.is_complete());
        assert_eq!(parser.content_length(), Some(5));
    }

    #[test]
    fn conflicting_content_length_is_rejected() {
        let mut parser = ResponseParser::new(Recorder::default());
        let err = parser.execute(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nContent-Length: 10\r\n\r\nok").unwrap_err();
        assert!(matches!(err, ParseError::InvalidContentLength { .. }));

        let mut parser = ResponseParser::new(Recorder::default());
        let err = parser.execute(b"HTTP/1.1 200 OK\r\nContent-Length: two\r\n\r\nok").unwrap_err();
        assert!(matches!(err, ParseError::InvalidContentLength { .. }));
    }

    #[test]
    fn repeated_equal_content_length_is_accepted() {
        let mut parser = ResponseParser::new(Recorder::default());
        parser.execute(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\ncontent-length: 2\r\n\r\nok").unwrap();
        assert!(parser.is_complete());
        assert_eq!(parser.content_length(), Some(2));
    }

    #[test]
    fn execute_after_done_is_a_usage_error() {
        let mut parser = ResponseParser::new(Recorder::default());
        parser.execute(HELLO).unwrap();
        assert!(matches!(parser.execute(b"more"), Err(ParseError::ParserDone)));
    }

    #[test]
    fn missing_reason_is_allowed() {
        let mut parser = ResponseParser::new(Recorder::default());
        parser.execute(b"HTTP/1.0 404\r\n\r\n").unwrap();
        assert_eq!(parser.handler().status, Some((Version::HTTP_10, StatusCode::NOT_FOUND, String::new())));
    }

    #[test]
    fn malformed_heads() {
        let cases: [(&[u8], fn(&ParseError) -> bool); 5] = [
            (b"HTTP/2.0 200 OK\r\n\r\n", |e| matches!(e, ParseError::InvalidVersion(None))),
            (b"HTTP/1.2 200 OK\r\n\r\n", |e| matches!(e, ParseError::InvalidVersion(Some(2)))),
            (b"HTTX/1.1 200 OK\r\n\r\n", |e| matches!(e, ParseError::InvalidStatusLine { .. })),
            (b"HTTP/1.1 2000 OK\r\n\r\n", |e| matches!(e, ParseError::InvalidStatusLine { .. })),
            (b"HTTP/1.1 200 OK\r\nNoColonHere\r\n\r\n", |e| matches!(e, ParseError::InvalidHeader { .. })),
        ];

        for (input, check) in cases {
            let mut parser = ResponseParser::new(Recorder::default());
            let err = parser.execute(input).unwrap_err();
            assert!(check(&err), "{:?} -> {err:?}", String::from_utf8_lossy(input));
        }
    }

    #[test]
    fn oversized_head_is_rejected() {
        let mut parser = ResponseParser::with_capacity(Recorder::default(), 32);
        let err = parser.execute(b"HTTP/1.1 200 OK\r\nX-Padding: aaaaaaaaaaaaaaaaaaaaaa\r\n\r\n").unwrap_err();
        assert!(matches!(err, ParseError::TooLargeHeader { max_size: 32, .. }));
    }

    #[test]
    fn overflowing_input_is_processed_in_parts() {
        // the head fits exactly, the body spills over the head buffer capacity
        let head = b"HTTP/1.1 200 OK\r\nContent-Length: 40\r\n\r\n";
        let mut input = head.to_vec();
        input.extend_from_slice(&[b'z'; 40]);

        let mut parser = ResponseParser::with_capacity(Recorder::default(), head.len());
        parser.execute(&input).unwrap();

        assert!(parser.is_complete());
        assert_eq!(parser.handler().entity, vec![b'z'; 40]);
    }

    #[test]
    fn end_of_input_inside_head_is_an_error() {
        let mut parser = ResponseParser::new(Recorder::default());
        parser.execute(b"HTTP/1.1 200 OK\r\nConte").unwrap();
        assert!(matches!(parser.execute(b""), Err(ParseError::IncompleteHead { read: 22 })));
    }
}
