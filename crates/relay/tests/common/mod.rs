//! Shared helpers for the loopback integration tests.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use micro_relay::connection::OutboundSecurity;
use micro_relay::protocol::{HttpError, Request, Response};
use micro_relay::{Context, Handler};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// A backend answering every request with the same bytes, counting accepted sockets.
#[derive(Debug, Clone)]
pub struct MockBackend {
    pub addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    received: Arc<std::sync::Mutex<Vec<Vec<u8>>>>,
}

impl MockBackend {
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Every request received so far, head and body, in arrival order.
    pub fn received(&self) -> Vec<Vec<u8>> {
        self.received.lock().unwrap().clone()
    }
}

pub async fn start_backend(reply: &'static [u8]) -> MockBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend = MockBackend {
        addr: listener.local_addr().unwrap(),
        accepted: Arc::new(AtomicUsize::new(0)),
        received: Arc::new(std::sync::Mutex::new(Vec::new())),
    };

    let state = backend.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            state.accepted.fetch_add(1, Ordering::SeqCst);
            let received = Arc::clone(&state.received);
            tokio::spawn(async move {
                let mut pending = Vec::new();
                while let Some(request) = read_request(&mut socket, &mut pending).await {
                    received.lock().unwrap().push(request);
                    if socket.write_all(reply).await.is_err() {
                        return;
                    }
                }
            });
        }
    });
    backend
}

/// Reads one request (head plus `Content-Length` body) from `stream`.
async fn read_request<S: AsyncRead + Unpin>(stream: &mut S, pending: &mut Vec<u8>) -> Option<Vec<u8>> {
    let head_end = loop {
        if let Some(pos) = pending.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let mut buf = [0u8; 1024];
        let n = stream.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        pending.extend_from_slice(&buf[..n]);
    };

    let head = String::from_utf8_lossy(&pending[..head_end]).to_ascii_lowercase();
    let body_len = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while pending.len() < head_end + body_len {
        let mut buf = [0u8; 1024];
        let n = stream.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        pending.extend_from_slice(&buf[..n]);
    }
    Some(pending.drain(..head_end + body_len).collect())
}

/// Reads one response whose body is `Content-Length` delimited, never reading past its end.
pub async fn read_response<S: AsyncRead + Unpin>(stream: &mut S) -> String {
    let mut out = Vec::new();
    while !out.ends_with(b"\r\n\r\n") {
        let byte = stream.read_u8().await.expect("connection closed before the response head");
        out.push(byte);
    }

    let head = String::from_utf8_lossy(&out).to_ascii_lowercase();
    let body_len = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .map_or(0, |v| v.trim().parse::<usize>().unwrap());

    let mut body = vec![0u8; body_len];
    stream.read_exact(&mut body).await.unwrap();
    out.extend_from_slice(&body);
    String::from_utf8(out).unwrap()
}

/// Relays every request to one plain backend.
#[derive(Debug)]
pub struct Forward {
    pub backend: SocketAddr,
}

#[async_trait]
impl Handler for Forward {
    type Error = HttpError;

    async fn handle(&self, ctx: &mut Context, req: &mut Request) -> Result<Response, HttpError> {
        let outbound = ctx.open_outbound(self.backend, OutboundSecurity::Plain).await?;
        outbound.write_request(req).await?;
        Ok(outbound.read_response().await?)
    }
}
