//! HTTP head processing.
//!
//! - [`RequestHeadDecoder`]: parses a request line and header fields with `httparse`
//! - [`HeadEncoder`]: writes request and response heads back to bytes, preserving the
//!   order and casing of every header
//!
//! Response heads are parsed by the hand-written state machine in
//! [`response_parser`](crate::codec::ResponseParser) instead.

mod header_decoder;
mod header_encoder;

pub use header_decoder::{DEFAULT_MAX_HEADER_BYTES, DEFAULT_MAX_HEADERS, RequestHeadDecoder};
pub use header_encoder::HeadEncoder;
