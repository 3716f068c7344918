//! Client and backend connections.
//!
//! Both sides of the relay share one connection abstraction: a [`Channel`] (plain TCP or a
//! TLS stream) picked when the connection is opened, behind a transport that hands out
//! [`ReadStream`] and [`WriteStream`] handles. Parsers and body streams only ever see those
//! handles, so they work the same over TLS as over plain TCP.
//!
//! - [`InboundConnection`]: a client connection accepted by the server; reads requests and
//!   writes responses
//! - [`OutboundConnection`]: a backend connection opened by a handler through the
//!   [`Context`](crate::Context); writes requests and reads responses
//! - [`tls`]: `rustls` configuration helpers for both directions
//!
//! Liveness is a non-blocking peek at the socket: a peer that closed in an orderly way, or a
//! socket in error, is reported dead. Closing a connection is idempotent.

mod channel;
mod inbound;
mod outbound;
pub mod tls;
mod transport;

pub use channel::Channel;
pub use inbound::{InboundConnection, InboundSecurity};
pub use outbound::{OutboundConnection, OutboundSecurity};
pub use transport::{ReadStream, WriteStream};
