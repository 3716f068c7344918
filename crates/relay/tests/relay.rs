mod common;

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use common::{Forward, MockBackend, read_response, start_backend};
use http::StatusCode;
use micro_relay::protocol::{HttpError, Request, Response};
use micro_relay::{Context, Handler, RelayOptions, Server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

async fn start_relay(handler: impl Handler + 'static, options: RelayOptions) -> (SocketAddr, CancellationToken) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let server = Server::builder().listener(listener).handler(handler).options(options).build().unwrap();
    let addr = server.local_addr();
    let shutdown = server.shutdown_token();
    tokio::spawn(server.run());
    (addr, shutdown)
}

async fn forward_to(backend: &MockBackend) -> (SocketAddr, CancellationToken) {
    start_relay(Forward { backend: backend.addr }, RelayOptions::default()).await
}

async fn read_until_close(stream: &mut TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out)).await.unwrap().unwrap();
    out
}

#[tokio::test]
async fn relays_requests_over_one_backend_connection() {
    let backend = start_backend(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello").await;
    let (addr, _shutdown) = forward_to(&backend).await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    for _ in 0..3 {
        client.write_all(b"GET /a HTTP/1.1\r\nHost: relay\r\n\r\n").await.unwrap();
        let response = read_response(&mut client).await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
        assert!(response.ends_with("\r\n\r\nhello"), "{response}");
    }

    assert_eq!(backend.accepted(), 1);
    assert_eq!(backend.received().len(), 3);
}

#[tokio::test]
async fn request_body_reaches_backend() {
    let backend = start_backend(b"HTTP/1.1 201 Created\r\nContent-Length: 0\r\n\r\n").await;
    let (addr, _shutdown) = forward_to(&backend).await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    client.write_all(b"POST /upload HTTP/1.1\r\nContent-Length: 11\r\n\r\nhello world").await.unwrap();
    let response = read_response(&mut client).await;
    assert!(response.starts_with("HTTP/1.1 201 Created\r\n"), "{response}");

    let received = backend.received();
    assert_eq!(received.len(), 1);
    assert!(received[0].starts_with(b"POST /upload HTTP/1.1\r\n"));
    assert!(received[0].ends_with(b"\r\n\r\nhello world"));
}

#[tokio::test]
async fn truncated_request_body_gets_bad_gateway() {
    let backend = start_backend(b"HTTP/1.1 201 Created\r\nContent-Length: 0\r\n\r\n").await;
    let (addr, _shutdown) = forward_to(&backend).await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    // three of the ten declared bytes, then the client stops sending
    client.write_all(b"POST /upload HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc").await.unwrap();
    client.shutdown().await.unwrap();

    let response = String::from_utf8(read_until_close(&mut client).await).unwrap();
    assert!(response.starts_with("HTTP/1.1 502 Bad Gateway\r\n"), "{response}");
    assert!(backend.received().is_empty());
}

#[tokio::test]
async fn chunked_backend_response_is_framed_again() {
    let backend =
        start_backend(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5;ext=1\r\nhello\r\n6\r\n world\r\n0\r\n\r\n").await;
    let (addr, _shutdown) = forward_to(&backend).await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    client.write_all(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").await.unwrap();
    let response = String::from_utf8(read_until_close(&mut client).await).unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n"), "{response}");
    assert!(response.ends_with("5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n"), "{response}");
}

#[tokio::test]
async fn malformed_request_gets_bad_request() {
    let backend = start_backend(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").await;
    let (addr, _shutdown) = forward_to(&backend).await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    client.write_all(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n").await.unwrap();
    let response = String::from_utf8(read_until_close(&mut client).await).unwrap();

    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{response}");
    assert!(response.contains("Connection: close\r\n"));
    assert!(backend.received().is_empty());
}

#[tokio::test]
async fn unreachable_backend_gets_bad_gateway() {
    let unused = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let backend = unused.local_addr().unwrap();
    drop(unused);

    let (addr, _shutdown) = start_relay(Forward { backend }, RelayOptions::default()).await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
    let response = String::from_utf8(read_until_close(&mut client).await).unwrap();
    assert!(response.starts_with("HTTP/1.1 502 Bad Gateway\r\n"), "{response}");
}

#[tokio::test]
async fn idle_keep_alive_connection_is_closed() {
    let backend = start_backend(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").await;
    let options = RelayOptions::default().with_keep_alive_timeout(Some(Duration::from_millis(100)));
    let (addr, _shutdown) = start_relay(Forward { backend: backend.addr }, options).await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
    read_response(&mut client).await;

    // nothing more is sent, so the relay hangs up after the idle timeout
    assert!(read_until_close(&mut client).await.is_empty());
}

struct Greeting;

#[async_trait]
impl Handler for Greeting {
    type Error = HttpError;

    async fn handle(&self, _ctx: &mut Context, req: &mut Request) -> Result<Response, HttpError> {
        let body = req.buffer_body().await.map_err(HttpError::handler)?.unwrap_or_default();
        Ok(Response::with_body(StatusCode::OK, format!("{} bytes to {}", body.len(), req.target())))
    }
}

#[tokio::test]
async fn local_handler_without_backend() {
    let (addr, _shutdown) = start_relay(Greeting, RelayOptions::default()).await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    // two pipelined requests in one write
    client
        .write_all(b"PUT /x HTTP/1.1\r\nContent-Length: 3\r\n\r\nabcGET /y HTTP/1.1\r\n\r\n")
        .await
        .unwrap();

    let first = read_response(&mut client).await;
    assert!(first.ends_with("3 bytes to /x"), "{first}");
    let second = read_response(&mut client).await;
    assert!(second.ends_with("0 bytes to /y"), "{second}");
}

#[tokio::test]
async fn shutdown_stops_accepting() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let server = Server::builder().listener(listener).handler(Greeting).build().unwrap();
    let shutdown = server.shutdown_token();
    let task = tokio::spawn(server.run());

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap().unwrap();
}

#[test]
fn builder_requires_handler_and_address() {
    assert!(matches!(Server::builder().address("127.0.0.1:0").build(), Err(micro_relay::ServerBuildError::MissingHandler)));
    assert!(matches!(Server::builder().handler(Greeting).build(), Err(micro_relay::ServerBuildError::MissingAddress)));
}
