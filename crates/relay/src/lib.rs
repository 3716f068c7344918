//! An asynchronous HTTP/1.x relay core
//!
//! This crate provides the moving parts of a reverse proxy: it accepts client connections
//! (plain or TLS), parses requests, hands each one to a user supplied [`Handler`], and gives the
//! handler a backend connection that is kept open and reused across requests of the same
//! client session. Bodies are streamed in both directions with bounded memory.
//!
//! # Features
//!
//! - HTTP/1.0 and HTTP/1.1 requests and responses
//! - Asynchronous I/O using tokio, one task per client session
//! - TLS on both sides through `rustls`
//! - Streaming `Content-Length`, chunked and close-delimited bodies
//! - Backend connection reuse per session
//! - Keep-alive with an idle timeout
//!
//! # Example
//!
//! ```no_run
//! use async_trait::async_trait;
//! use micro_relay::connection::OutboundSecurity;
//! use micro_relay::protocol::{HttpError, Request, Response};
//! use micro_relay::{Context, Handler, Server};
//!
//! struct Forward;
//!
//! #[async_trait]
//! impl Handler for Forward {
//!     type Error = HttpError;
//!
//!     async fn handle(&self, ctx: &mut Context, req: &mut Request) -> Result<Response, HttpError> {
//!         let backend = "127.0.0.1:9000".parse().expect("valid address");
//!         let outbound = ctx.open_outbound(backend, OutboundSecurity::Plain).await?;
//!         outbound.write_request(req).await?;
//!         Ok(outbound.read_response().await?)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::builder().address("127.0.0.1:8080").handler(Forward).build()?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - [`protocol`]: [`Request`](protocol::Request), [`Response`](protocol::Response), headers,
//!   bodies and errors
//! - [`codec`]: the request parser (built on `httparse`), the response state machine, the
//!   body stream adapters and the message writer
//! - [`connection`]: inbound and outbound connections over plain or TLS channels
//! - [`Context`]: one client session and its reusable backend connection
//! - [`server`]: the accept loop and the session loop
//!
//! # Sessions
//!
//! A session is strictly half-duplex: the response to a request, including its whole body, is
//! written and the rest of the request body is drained before the next request is read. The
//! session ends when the client disconnects, when the keep-alive timeout expires, when the
//! backend connection is lost, or on the first error. A malformed request is answered with
//! `400 Bad Request` and a failed handler with `502 Bad Gateway` before the connections close.
//!
//! # Error Handling
//!
//! - [`protocol::HttpError`]: top-level error type
//! - [`protocol::ParseError`]: malformed messages and read failures
//! - [`protocol::SendError`]: write failures
//! - [`protocol::ConnectError`]: connect, handshake, timeout and cancellation failures
//!
//! # Limitations
//!
//! - HTTP/1.x only
//! - Request bodies must be length-delimited; `Transfer-Encoding` on requests is rejected
//! - No connection pooling across sessions

pub mod codec;
pub mod connection;
mod context;
pub mod handler;
mod ids;
mod options;
pub mod protocol;
pub mod server;

mod utils;

pub use context::Context;
pub use handler::Handler;
pub use options::RelayOptions;
pub use server::{Server, ServerBuildError, ServerBuilder, serve_connection};
