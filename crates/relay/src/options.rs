//! Relay configuration.
//!
//! There is no configuration file; [`RelayOptions`] is a plain value handed to the server
//! builder and shared by every session through an `Arc`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rustls::ClientConfig;

use crate::codec::header::{DEFAULT_MAX_HEADER_BYTES, DEFAULT_MAX_HEADERS};
use crate::connection::tls::shared_default_client_config;

const DEFAULT_READ_BLOCK_SIZE: usize = 8 * 1024;
const DEFAULT_COPY_BUFFER_SIZE: usize = 8 * 1024;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct RelayOptions {
    pub(crate) read_block_size: usize,
    pub(crate) max_header_bytes: usize,
    pub(crate) max_headers: usize,
    pub(crate) copy_buffer_size: usize,
    pub(crate) connect_timeout: Duration,
    pub(crate) handshake_timeout: Duration,
    pub(crate) keep_alive_timeout: Option<Duration>,
    pub(crate) tls_client: Option<Arc<ClientConfig>>,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            read_block_size: DEFAULT_READ_BLOCK_SIZE,
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            max_headers: DEFAULT_MAX_HEADERS,
            copy_buffer_size: DEFAULT_COPY_BUFFER_SIZE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            keep_alive_timeout: Some(DEFAULT_KEEP_ALIVE_TIMEOUT),
            tls_client: None,
        }
    }
}

impl RelayOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size of each read while looking for the end of a message head.
    pub fn with_read_block_size(mut self, size: usize) -> Self {
        self.read_block_size = size.max(1);
        self
    }

    /// Largest accepted message head, request or response.
    pub fn with_max_header_bytes(mut self, size: usize) -> Self {
        self.max_header_bytes = size;
        self
    }

    pub fn with_max_headers(mut self, count: usize) -> Self {
        self.max_headers = count;
        self
    }

    /// Size of the intermediate buffer used when streaming a body to a peer.
    pub fn with_copy_buffer_size(mut self, size: usize) -> Self {
        self.copy_buffer_size = size.max(1);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// How long a kept-alive inbound connection may sit idle between requests. `None` waits forever.
    pub fn with_keep_alive_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.keep_alive_timeout = timeout;
        self
    }

    /// TLS settings for secure outbound connections.
    pub fn with_tls_client(mut self, config: Arc<ClientConfig>) -> Self {
        self.tls_client = Some(config);
        self
    }

    pub fn read_block_size(&self) -> usize {
        self.read_block_size
    }

    pub fn max_header_bytes(&self) -> usize {
        self.max_header_bytes
    }

    pub fn max_headers(&self) -> usize {
        self.max_headers
    }

    pub fn copy_buffer_size(&self) -> usize {
        self.copy_buffer_size
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    pub fn keep_alive_timeout(&self) -> Option<Duration> {
        self.keep_alive_timeout
    }

    /// The configured client TLS settings, falling back to the `webpki-roots` defaults.
    pub fn tls_client(&self) -> Result<Arc<ClientConfig>, rustls::Error> {
        match &self.tls_client {
            Some(config) => Ok(Arc::clone(config)),
            None => shared_default_client_config(),
        }
    }
}

impl fmt::Debug for RelayOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayOptions")
            .field("read_block_size", &self.read_block_size)
            .field("max_header_bytes", &self.max_header_bytes)
            .field("max_headers", &self.max_headers)
            .field("copy_buffer_size", &self.copy_buffer_size)
            .field("connect_timeout", &self.connect_timeout)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("keep_alive_timeout", &self.keep_alive_timeout)
            .field("custom_tls_client", &self.tls_client.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = RelayOptions::default();
        assert_eq!(options.read_block_size(), 8 * 1024);
        assert_eq!(options.max_header_bytes(), 64 * 1024);
        assert_eq!(options.max_headers(), 64);
        assert_eq!(options.copy_buffer_size(), 8 * 1024);
        assert_eq!(options.connect_timeout(), Duration::from_secs(10));
        assert_eq!(options.keep_alive_timeout(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn builder_setters() {
        let options = RelayOptions::new()
            .with_read_block_size(0)
            .with_max_headers(8)
            .with_keep_alive_timeout(None)
            .with_connect_timeout(Duration::from_millis(250));

        assert_eq!(options.read_block_size(), 1);
        assert_eq!(options.max_headers(), 8);
        assert_eq!(options.keep_alive_timeout(), None);
        assert_eq!(options.connect_timeout(), Duration::from_millis(250));
    }
}
