use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use http::Method;
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio::select;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::channel::Channel;
use super::transport::{ReadStream, Transport, WriteStream};
use crate::RelayOptions;
use crate::codec::{MessageWriter, ResponseReader};
use crate::ids::next_connection_id;
use crate::protocol::{ConnectError, ParseError, Request, Response, SendError};

/// How a backend connection is secured.
///
/// `Tls` carries the host name the backend certificate is verified against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OutboundSecurity {
    Plain,
    Tls { host: String },
}

impl OutboundSecurity {
    pub fn tls(host: impl Into<String>) -> Self {
        Self::Tls { host: host.into() }
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, OutboundSecurity::Tls { .. })
    }
}

/// A connection to a backend, kept by a [`Context`](crate::Context) for reuse.
///
/// The connection tracks whether it can carry another exchange. The last response body must
/// have been read to its end, and the socket must still be open. A framing error, or bytes the
/// backend sent past the end of a response, rule out any further exchange.
#[derive(Debug)]
pub struct OutboundConnection {
    id: u64,
    remote_addr: SocketAddr,
    security: OutboundSecurity,
    transport: Transport,
    writer: MessageWriter<WriteStream>,
    reader: ResponseReader,
    last_method: Option<Method>,
    response_drained: Arc<AtomicBool>,
    out_of_sync: Arc<AtomicBool>,
    broken: bool,
}

impl OutboundConnection {
    /// Connects to `endpoint`, then performs the client TLS handshake for secure connections.
    ///
    /// # Errors
    ///
    /// Returns `ConnectError` when the socket cannot be opened, the host name is not a valid
    /// server name, the handshake fails, or either step exceeds its timeout.
    pub async fn open(endpoint: SocketAddr, security: OutboundSecurity, options: &RelayOptions) -> Result<Self, ConnectError> {
        let tcp = timeout(options.connect_timeout(), TcpStream::connect(endpoint))
            .await
            .map_err(|_elapsed| ConnectError::Timeout(options.connect_timeout()))??;

        let channel = match &security {
            OutboundSecurity::Plain => Channel::Plain(tcp),
            OutboundSecurity::Tls { host } => {
                let config = options.tls_client().map_err(ConnectError::tls)?;
                let server_name = ServerName::try_from(host.clone())
                    .map_err(|e| ConnectError::InvalidServerName(format!("{host}: {e}")))?;

                let handshake = TlsConnector::from(config).connect(server_name, tcp);
                let tls = timeout(options.handshake_timeout(), handshake)
                    .await
                    .map_err(|_elapsed| ConnectError::Timeout(options.handshake_timeout()))?
                    .map_err(ConnectError::tls)?;
                Channel::ClientTls(Box::new(tls))
            }
        };

        let id = next_connection_id();
        debug!(conn_id = id, remote = %endpoint, secure = security.is_secure(), "outbound connection opened");

        let transport = Transport::new(channel);
        let out_of_sync = Arc::new(AtomicBool::new(false));
        Ok(Self {
            id,
            remote_addr: endpoint,
            security,
            writer: MessageWriter::with_capacity(transport.write_stream(), options.copy_buffer_size()),
            reader: ResponseReader::new(options).track_framing(Arc::clone(&out_of_sync)),
            transport,
            last_method: None,
            response_drained: Arc::new(AtomicBool::new(true)),
            out_of_sync,
            broken: false,
        })
    }

    /// Like [`open`](Self::open), giving up with [`ConnectError::Cancelled`] once `token` is cancelled.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open), plus `Cancelled`.
    pub async fn open_cancellable(
        endpoint: SocketAddr,
        security: OutboundSecurity,
        options: &RelayOptions,
        token: &CancellationToken,
    ) -> Result<Self, ConnectError> {
        select! {
            biased;
            () = token.cancelled() => {
                debug!(remote = %endpoint, "outbound connect cancelled");
                Err(ConnectError::Cancelled)
            }
            result = Self::open(endpoint, security, options) => result,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn security(&self) -> &OutboundSecurity {
        &self.security
    }

    pub fn is_secure(&self) -> bool {
        self.security.is_secure()
    }

    /// Sends `request` to the backend, streaming its body.
    ///
    /// # Errors
    ///
    /// Returns `SendError` if the request head cannot be encoded or the backend connection fails.
    /// A failed write leaves the connection unusable for further exchanges.
    pub async fn write_request(&mut self, request: &mut Request) -> Result<u64, SendError> {
        self.last_method = Some(request.method().clone());
        self.response_drained.store(false, Ordering::Release);

        let result = self.writer.write_request(request).await;
        if result.is_err() {
            self.broken = true;
        }
        result
    }

    /// Reads the backend's response to the last request written.
    ///
    /// The response body, if any, streams from this connection; the connection becomes reusable
    /// again once that body has been read to its end.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` for a malformed response or a transport failure. Either leaves the
    /// connection unusable for further exchanges.
    pub async fn read_response(&mut self) -> Result<Response, ParseError> {
        let expect_body = self.last_method.as_ref() != Some(&Method::HEAD);
        let result = self.reader.clone().expect_body(expect_body).parse(self.transport.read_stream()).await;

        match result {
            Ok(mut response) => {
                match response.take_body() {
                    Some(body) => response.set_body(Some(body.with_completion(Arc::clone(&self.response_drained)))),
                    None => self.response_drained.store(true, Ordering::Release),
                }
                Ok(response)
            }
            Err(e) => {
                self.broken = true;
                Err(e)
            }
        }
    }

    pub fn is_alive(&self) -> bool {
        self.transport.is_alive()
    }

    /// Whether another request can be sent on this connection.
    pub fn is_reusable(&self) -> bool {
        !self.broken
            && !self.out_of_sync.load(Ordering::Acquire)
            && self.response_drained.load(Ordering::Acquire)
            && self.is_alive()
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    pub async fn close(&mut self) {
        if !self.transport.is_closed() {
            debug!(conn_id = self.id, remote = %self.remote_addr, "closing outbound connection");
            self.transport.close().await;
        }
    }

    /// A new read handle on the backend connection.
    pub fn read_stream(&self) -> ReadStream {
        self.transport.read_stream()
    }

    /// A new write handle on the backend connection.
    pub fn write_stream(&self) -> WriteStream {
        self.transport.write_stream()
    }
}
