//! Per-session state shared between the server loop and the handler.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::RelayOptions;
use crate::connection::{InboundConnection, OutboundConnection, OutboundSecurity};
use crate::ids::next_context_id;
use crate::protocol::ConnectError;

/// One client session: the inbound connection plus at most one backend connection.
///
/// A handler gets the backend connection through [`Context::open_outbound`], which reuses the
/// existing one when it points at the same endpoint with the same security mode and can carry
/// another exchange. Otherwise the old connection is closed before a new one is opened, so a
/// context never holds more than one backend socket.
#[derive(Debug)]
pub struct Context {
    id: u64,
    options: Arc<RelayOptions>,
    inbound: InboundConnection,
    outbound: Option<OutboundConnection>,
}

impl Context {
    pub fn new(inbound: InboundConnection, options: Arc<RelayOptions>) -> Self {
        let id = next_context_id();
        debug!(context_id = id, conn_id = inbound.id(), "context created");
        Self { id, options, inbound, outbound: None }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn options(&self) -> &RelayOptions {
        &self.options
    }

    pub fn inbound(&self) -> &InboundConnection {
        &self.inbound
    }

    pub fn inbound_mut(&mut self) -> &mut InboundConnection {
        &mut self.inbound
    }

    pub fn outbound(&self) -> Option<&OutboundConnection> {
        self.outbound.as_ref()
    }

    pub fn outbound_mut(&mut self) -> Option<&mut OutboundConnection> {
        self.outbound.as_mut()
    }

    /// Returns a backend connection to `endpoint`, reusing the current one when possible.
    ///
    /// # Errors
    ///
    /// Returns `ConnectError` if a new connection is needed and cannot be established.
    pub async fn open_outbound(
        &mut self,
        endpoint: SocketAddr,
        security: OutboundSecurity,
    ) -> Result<&mut OutboundConnection, ConnectError> {
        self.acquire_outbound(endpoint, security, None).await
    }

    /// Like [`open_outbound`](Self::open_outbound), but a new connection attempt is abandoned once
    /// `token` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ConnectError::Cancelled` on cancellation, or any error of
    /// [`open_outbound`](Self::open_outbound).
    pub async fn open_outbound_cancellable(
        &mut self,
        endpoint: SocketAddr,
        security: OutboundSecurity,
        token: &CancellationToken,
    ) -> Result<&mut OutboundConnection, ConnectError> {
        self.acquire_outbound(endpoint, security, Some(token)).await
    }

    async fn acquire_outbound(
        &mut self,
        endpoint: SocketAddr,
        security: OutboundSecurity,
        token: Option<&CancellationToken>,
    ) -> Result<&mut OutboundConnection, ConnectError> {
        if let Some(mut existing) = self.outbound.take() {
            let same_target = existing.remote_addr() == endpoint && existing.security() == &security;
            if same_target && existing.is_reusable() {
                debug!(context_id = self.id, conn_id = existing.id(), remote = %endpoint, "reusing outbound connection");
                return Ok(self.outbound.insert(existing));
            }

            if same_target {
                debug!(context_id = self.id, conn_id = existing.id(), "outbound connection is stale, replacing it");
            } else {
                debug!(
                    context_id = self.id,
                    conn_id = existing.id(),
                    from = %existing.remote_addr(),
                    to = %endpoint,
                    "outbound target changed, replacing connection"
                );
            }
            existing.close().await;
        }

        let connection = match token {
            Some(token) => OutboundConnection::open_cancellable(endpoint, security, &self.options, token).await?,
            None => OutboundConnection::open(endpoint, security, &self.options).await?,
        };
        Ok(self.outbound.insert(connection))
    }

    /// Closes the inbound connection and the backend connection, if any. Safe to call repeatedly.
    pub async fn close(&mut self) {
        self.inbound.close().await;
        if let Some(mut outbound) = self.outbound.take() {
            outbound.close().await;
        }
    }
}
