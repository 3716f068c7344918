//! Body stream adapters.
//!
//! The parsers never copy a body into memory. Instead they layer these readers over the
//! connection's read stream:
//!
//! - [`PrefixedReader`]: replays bytes a head parser read past the end of the head
//! - [`BoundedReader`]: caps a `Content-Length` body at its declared size
//! - [`ChunkedReader`]: strips chunked transfer framing, stopping after the terminal chunk
//!
//! On the write side, [`ChunkedEncoder`] re-frames a decoded chunked body for the next hop.

mod bounded;
mod chunked_encoder;
mod chunked_reader;
mod prefixed;

pub use bounded::BoundedReader;
pub use chunked_encoder::ChunkedEncoder;
pub use chunked_reader::ChunkedReader;
pub use prefixed::PrefixedReader;
