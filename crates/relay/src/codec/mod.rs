//! Wire-level reading and writing of HTTP/1.x messages.
//!
//! The codec layer turns bytes on a connection into [`Request`](crate::protocol::Request) and
//! [`Response`](crate::protocol::Response) values and back:
//!
//! - Request side:
//!   - [`RequestParser`]: reads blocks until [`header::RequestHeadDecoder`] (built on `httparse`)
//!     yields a head, then assembles a length-delimited body
//! - Response side:
//!   - [`ResponseParser`]: an explicit state machine that reports status line, header and entity
//!     events to a [`ResponseHandler`]
//!   - [`ResponseReader`]: drives the state machine over a connection and picks the body stream
//! - Both directions:
//!   - [`MessageWriter`]: head serialization followed by bounded-memory body copying
//!   - [`body`]: the bounded, prefixed and chunked stream adapters
//!
//! # Example
//!
//! ```no_run
//! use micro_relay::RelayOptions;
//! use micro_relay::codec::ResponseReader;
//! use tokio::net::TcpStream;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let stream = TcpStream::connect("127.0.0.1:8080").await?;
//! let response = ResponseReader::new(&RelayOptions::default()).parse(stream).await?;
//! println!("{} {}", response.status(), response.reason());
//! # Ok(())
//! # }
//! ```

pub mod body;
pub mod header;
mod message_writer;
mod request_parser;
mod response_parser;
mod response_reader;

pub use message_writer::MessageWriter;
pub use request_parser::RequestParser;
pub use response_parser::{ResponseHandler, ResponseParser};
pub use response_reader::ResponseReader;
