//! Core HTTP message abstractions.
//!
//! This module provides the types that flow between the parsers, the connections and the
//! handler:
//!
//! - **Messages** ([`request`], [`response`]): [`Request`] and [`Response`] with their
//!   process-wide ids, header collections and optional bodies
//! - **Headers** ([`headers`]): [`Headers`], an insertion-ordered multimap with
//!   case-insensitive lookup that preserves the wire casing of names
//! - **Bodies** ([`body`]): [`Body`], a streaming or buffered byte source tagged with its
//!   [`BodyFraming`]
//! - **Errors** ([`error`]): [`HttpError`] and the failure families it unifies
//!
//! Bodies are streamed by default. Buffering only happens when a handler asks for it, so
//! relaying a large upload or download keeps memory bounded.

mod message;
pub use message::PayloadItem;

mod request;
pub use request::{Request, RequestHead};

mod response;
pub use response::Response;

mod error;
pub use error::ConnectError;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;

pub mod body;
pub use body::{Body, BodyFraming};

pub mod headers;
pub use headers::Headers;
