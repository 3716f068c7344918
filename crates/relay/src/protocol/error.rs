use std::error::Error as StdError;
use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request error: {source}")]
    RequestError {
        #[from]
        source: ParseError,
    },

    #[error("response error: {source}")]
    ResponseError {
        #[from]
        source: SendError,
    },

    #[error("connect error: {source}")]
    ConnectError {
        #[from]
        source: ConnectError,
    },

    #[error("handler error: {0}")]
    Handler(Box<dyn StdError + Send + Sync>),
}

impl HttpError {
    pub fn handler<E: Into<Box<dyn StdError + Send + Sync>>>(e: E) -> Self {
        Self::Handler(e.into())
    }
}

/// Format errors raised while reading a message off the wire.
///
/// A parse error is fatal to the message that produced it; the connection carrying it must
/// not be reused.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("header number exceed the limit {max_num}")]
    TooManyHeaders { max_num: usize },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid http version: {0:?}")]
    InvalidVersion(Option<u8>),

    #[error("invalid http method")]
    InvalidMethod,

    #[error("invalid request target")]
    InvalidUri,

    #[error("invalid status line: {reason}")]
    InvalidStatusLine { reason: String },

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("invalid chunk: {reason}")]
    InvalidChunk { reason: String },

    #[error("connection closed in the middle of a message head after {read} bytes")]
    IncompleteHead { read: usize },

    #[error("parser already reached the end of the message")]
    ParserDone,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_status_line<S: ToString>(str: S) -> Self {
        Self::InvalidStatusLine { reason: str.to_string() }
    }

    pub fn invalid_chunk<S: ToString>(str: S) -> Self {
        Self::InvalidChunk { reason: str.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    /// Converts this error into an `io::Error` so it can cross an `AsyncRead` boundary.
    ///
    /// I/O errors are returned unchanged; format errors become `InvalidData`.
    pub fn into_io(self) -> io::Error {
        match self {
            Self::Io { source } => source,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("unsupported http version: {0:?}")]
    UnsupportedVersion(http::Version),

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

/// Failures establishing an outbound connection or accepting a secure inbound one.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("connect cancelled")]
    Cancelled,

    #[error("invalid tls server name: {0}")]
    InvalidServerName(String),

    #[error("tls error: {reason}")]
    Tls { reason: String },
}

impl ConnectError {
    pub fn tls<S: ToString>(str: S) -> Self {
        Self::Tls { reason: str.to_string() }
    }
}
