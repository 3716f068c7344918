//! The accept loop and the per-connection session loop.
//!
//! Every accepted socket runs in its own task: the inbound connection is opened (including the
//! TLS handshake for a secure server), a [`Context`] is created, and requests are served one
//! at a time. A response and the rest of its request body are fully handled before the next
//! request is read. Any failure is logged and ends the session by closing the context; it never
//! reaches the accept loop.

use std::error::Error;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;
use rustls::ServerConfig;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection::{InboundConnection, InboundSecurity};
use crate::handler::Handler;
use crate::protocol::{HttpError, ParseError, Request, Response};
use crate::{Context, RelayOptions};

type BoxError = Box<dyn Error + Send + Sync>;
type SharedHandler = Arc<dyn Handler<Error = BoxError>>;

/// Adapts any handler to the boxed error type the server stores.
struct BoxedErrors<H>(H);

#[async_trait]
impl<H: Handler> Handler for BoxedErrors<H> {
    type Error = BoxError;

    async fn handle(&self, ctx: &mut Context, req: &mut Request) -> Result<Response, Self::Error> {
        self.0.handle(ctx, req).await.map_err(Into::into)
    }
}

pub struct ServerBuilder {
    address: Option<io::Result<Vec<SocketAddr>>>,
    listener: Option<std::net::TcpListener>,
    handler: Option<SharedHandler>,
    tls: Option<Arc<ServerConfig>>,
    options: RelayOptions,
}

impl ServerBuilder {
    fn new() -> Self {
        Self { address: None, listener: None, handler: None, tls: None, options: RelayOptions::default() }
    }

    /// The address to listen on. Ignored when a listener is supplied.
    pub fn address<A: ToSocketAddrs>(mut self, address: A) -> Self {
        self.address = Some(address.to_socket_addrs().map(Iterator::collect));
        self
    }

    /// An already bound listener, e.g. one bound to port 0 in tests.
    pub fn listener(mut self, listener: std::net::TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn handler(mut self, handler: impl Handler + 'static) -> Self {
        self.handler = Some(Arc::new(BoxedErrors(handler)));
        self
    }

    /// Serves TLS with the given certificate configuration instead of plain TCP.
    pub fn tls(mut self, config: Arc<ServerConfig>) -> Self {
        self.tls = Some(config);
        self
    }

    pub fn options(mut self, options: RelayOptions) -> Self {
        self.options = options;
        self
    }

    /// Binds the listener.
    ///
    /// # Errors
    ///
    /// Returns `ServerBuildError` when the handler or the address is missing, or when the
    /// address cannot be resolved or bound.
    pub fn build(self) -> Result<Server, ServerBuildError> {
        let handler = self.handler.ok_or(ServerBuildError::MissingHandler)?;
        let listener = match self.listener {
            Some(listener) => listener,
            None => {
                let address = self.address.ok_or(ServerBuildError::MissingAddress)??;
                std::net::TcpListener::bind(address.as_slice())?
            }
        };
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let security = match self.tls {
            Some(config) => InboundSecurity::Tls(TlsAcceptor::from(config)),
            None => InboundSecurity::Plain,
        };

        Ok(Server {
            listener,
            local_addr,
            handler,
            security,
            options: Arc::new(self.options),
            shutdown: CancellationToken::new(),
        })
    }
}

impl std::fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("listener", &self.listener)
            .field("has_handler", &self.handler.is_some())
            .field("tls", &self.tls.is_some())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[derive(Error, Debug)]
pub enum ServerBuildError {
    #[error("handler must be set")]
    MissingHandler,
    #[error("address must be set")]
    MissingAddress,
    #[error("failed to bind listener: {source}")]
    Bind {
        #[from]
        source: io::Error,
    },
}

pub struct Server {
    listener: std::net::TcpListener,
    local_addr: SocketAddr,
    handler: SharedHandler,
    security: InboundSecurity,
    options: Arc<RelayOptions>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("security", &self.security)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Cancelling this token makes [`run`](Self::run) stop accepting and return.
    /// Sessions already running are left to finish.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accepts connections until the shutdown token is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error only if the listener cannot be registered with the runtime; failed
    /// accepts and failed sessions are logged and do not stop the loop.
    pub async fn run(self) -> io::Result<()> {
        let listener = TcpListener::from_std(self.listener)?;
        info!(address = %self.local_addr, secure = matches!(self.security, InboundSecurity::Tls(_)), "start listening");

        loop {
            let (tcp_stream, remote_addr) = select! {
                biased;
                () = self.shutdown.cancelled() => {
                    info!(address = %self.local_addr, "shutdown requested, stop accepting");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok(stream_and_addr) => stream_and_addr,
                    Err(e) => {
                        warn!(cause = %e, "failed to accept");
                        continue;
                    }
                },
            };

            let handler = Arc::clone(&self.handler);
            let security = self.security.clone();
            let options = Arc::clone(&self.options);

            tokio::spawn(async move {
                match serve_connection(tcp_stream, &security, handler.as_ref(), options).await {
                    Ok(()) => debug!(remote = %remote_addr, "finished process, connection shutdown"),
                    Err(HttpError::ConnectError { source }) => {
                        warn!(remote = %remote_addr, cause = %source, "failed to open inbound connection");
                    }
                    Err(e) => error!(remote = %remote_addr, cause = %e, "session failed, connection shutdown"),
                }
            });
        }
    }
}

/// Serves one accepted socket until the client leaves or the session fails.
///
/// # Errors
///
/// Returns the failure that ended the session. The context is closed either way.
pub async fn serve_connection<H>(
    tcp_stream: TcpStream,
    security: &InboundSecurity,
    handler: &H,
    options: Arc<RelayOptions>,
) -> Result<(), HttpError>
where
    H: Handler + ?Sized,
{
    let inbound = InboundConnection::open(tcp_stream, security, &options).await?;
    let mut ctx = Context::new(inbound, options);

    let result = run_session(&mut ctx, handler).await;
    ctx.close().await;
    result
}

async fn run_session<H>(ctx: &mut Context, handler: &H) -> Result<(), HttpError>
where
    H: Handler + ?Sized,
{
    let keep_alive_timeout = ctx.options().keep_alive_timeout();
    let mut served = 0u64;

    loop {
        let next = match keep_alive_timeout {
            Some(idle) if served > 0 => match timeout(idle, ctx.inbound_mut().read_request()).await {
                Ok(next) => next,
                Err(_elapsed) => {
                    debug!(context_id = ctx.id(), served, "keep-alive timeout, ending session");
                    return Ok(());
                }
            },
            _ => ctx.inbound_mut().read_request().await,
        };

        let mut request = match next {
            Ok(Some(request)) => request,
            Ok(None) => {
                debug!(context_id = ctx.id(), served, "client closed the connection");
                return Ok(());
            }
            Err(e) => {
                if !matches!(e, ParseError::Io { .. }) {
                    send_error_response(ctx, StatusCode::BAD_REQUEST).await;
                }
                return Err(e.into());
            }
        };

        debug!(
            context_id = ctx.id(),
            request_id = request.id(),
            method = %request.method(),
            target = request.target(),
            "received request"
        );

        let mut response = match handler.handle(ctx, &mut request).await {
            Ok(response) => response,
            Err(e) => {
                send_error_response(ctx, StatusCode::BAD_GATEWAY).await;
                return Err(HttpError::handler(e));
            }
        };

        ctx.inbound_mut().write_response(&mut response).await?;
        request.drain_body().await.map_err(ParseError::io)?;
        served += 1;

        if ctx.outbound().is_some_and(|outbound| !outbound.is_alive()) {
            debug!(context_id = ctx.id(), "backend connection lost, closing context");
            return Ok(());
        }

        if response.headers().is_connection_close() || request.headers().is_connection_close() {
            debug!(context_id = ctx.id(), "connection close requested");
            return Ok(());
        }

        if !ctx.inbound().is_alive() && !ctx.inbound().has_pipelined() {
            return Ok(());
        }
    }
}

/// Best-effort error reply; the session is ending anyway, so a failed write is only logged.
async fn send_error_response(ctx: &mut Context, status: StatusCode) {
    let mut response = Response::new(status);
    response.headers_mut().append("Content-Length", "0");
    response.headers_mut().append("Connection", "close");

    if let Err(e) = ctx.inbound_mut().write_response(&mut response).await {
        debug!(context_id = ctx.id(), cause = %e, status = status.as_u16(), "could not send error response");
    }
}
