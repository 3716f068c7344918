use std::net::SocketAddr;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tracing::debug;

use super::channel::Channel;
use super::transport::{ReadStream, Transport, WriteStream};
use crate::RelayOptions;
use crate::codec::{MessageWriter, RequestParser};
use crate::ids::next_connection_id;
use crate::protocol::{ConnectError, ParseError, Request, Response, SendError};

/// How an accepted socket is secured.
#[derive(Clone)]
pub enum InboundSecurity {
    Plain,
    Tls(TlsAcceptor),
}

impl std::fmt::Debug for InboundSecurity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InboundSecurity::Plain => f.write_str("Plain"),
            InboundSecurity::Tls(_) => f.write_str("Tls"),
        }
    }
}

/// A client connection accepted by the server.
#[derive(Debug)]
pub struct InboundConnection {
    id: u64,
    remote_addr: SocketAddr,
    transport: Transport,
    parser: RequestParser,
    writer: MessageWriter<WriteStream>,
}

impl InboundConnection {
    /// Wraps an accepted socket, performing the server side of the TLS handshake when asked to.
    ///
    /// # Errors
    ///
    /// Returns `ConnectError` if the peer address is unavailable or the handshake fails or
    /// exceeds the handshake timeout.
    pub async fn open(tcp: TcpStream, security: &InboundSecurity, options: &RelayOptions) -> Result<Self, ConnectError> {
        let remote_addr = tcp.peer_addr()?;
        let channel = match security {
            InboundSecurity::Plain => Channel::Plain(tcp),
            InboundSecurity::Tls(acceptor) => {
                let handshake = acceptor.accept(tcp);
                let tls = timeout(options.handshake_timeout(), handshake)
                    .await
                    .map_err(|_elapsed| ConnectError::Timeout(options.handshake_timeout()))?
                    .map_err(ConnectError::tls)?;
                Channel::ServerTls(Box::new(tls))
            }
        };

        let id = next_connection_id();
        debug!(conn_id = id, remote = %remote_addr, secure = channel.is_secure(), "inbound connection opened");

        let transport = Transport::new(channel);
        let writer = MessageWriter::with_capacity(transport.write_stream(), options.copy_buffer_size());
        Ok(Self { id, remote_addr, parser: RequestParser::new(options), writer, transport })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn is_secure(&self) -> bool {
        self.transport.is_secure()
    }

    /// Reads the next request; `Ok(None)` means the client closed the connection between requests.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` for a malformed request or a transport failure.
    pub async fn read_request(&mut self) -> Result<Option<Request>, ParseError> {
        let result = self.parser.parse(self.transport.read_stream()).await;
        if result.is_err() {
            self.parser.reset();
        }
        result
    }

    /// Whether bytes of another request already arrived with the previous one.
    pub fn has_pipelined(&self) -> bool {
        self.parser.has_buffered()
    }

    /// Writes `response` and its whole body to the client.
    ///
    /// # Errors
    ///
    /// Returns `SendError` if the head cannot be encoded or the client connection fails.
    pub async fn write_response(&mut self, response: &mut Response) -> Result<u64, SendError> {
        self.writer.write_response(response).await
    }

    pub fn is_alive(&self) -> bool {
        self.transport.is_alive()
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    pub async fn close(&mut self) {
        if !self.transport.is_closed() {
            debug!(conn_id = self.id, remote = %self.remote_addr, "closing inbound connection");
            self.transport.close().await;
        }
    }

    /// A new read handle on the client connection.
    pub fn read_stream(&self) -> ReadStream {
        self.transport.read_stream()
    }

    /// A new write handle on the client connection.
    pub fn write_stream(&self) -> WriteStream {
        self.transport.write_stream()
    }
}
