mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{Forward, read_response, start_backend};
use http::{Method, StatusCode};
use micro_relay::connection::tls::{client_config_with_roots, server_config_from_der};
use micro_relay::connection::{OutboundConnection, OutboundSecurity};
use micro_relay::protocol::{ConnectError, HttpError, Request, Response};
use micro_relay::{Context, Handler, RelayOptions, Server};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

struct TestPki {
    server: Arc<ServerConfig>,
    client: Arc<ClientConfig>,
}

fn pki() -> TestPki {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert: CertificateDer<'static> = certified.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()));

    let mut roots = RootCertStore::empty();
    roots.add(cert.clone()).unwrap();

    TestPki { server: server_config_from_der(vec![cert], key).unwrap(), client: client_config_with_roots(roots).unwrap() }
}

struct Echo;

#[async_trait]
impl Handler for Echo {
    type Error = HttpError;

    async fn handle(&self, ctx: &mut Context, req: &mut Request) -> Result<Response, HttpError> {
        let secure = ctx.inbound().is_secure();
        Ok(Response::with_body(StatusCode::OK, format!("secure={secure} target={}", req.target())))
    }
}

async fn start_tls_server(handler: impl Handler + 'static, config: Arc<ServerConfig>) -> std::net::SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let server = Server::builder().listener(listener).handler(handler).tls(config).build().unwrap();
    let addr = server.local_addr();
    tokio::spawn(server.run());
    addr
}

#[tokio::test]
async fn tls_client_through_relay_to_plain_backend() {
    let pki = pki();
    let backend = start_backend(b"HTTP/1.1 200 OK\r\nContent-Length: 7\r\n\r\nplained").await;
    let addr = start_tls_server(Forward { backend: backend.addr }, pki.server).await;

    let tcp = TcpStream::connect(addr).await.unwrap();
    let server_name = ServerName::try_from("localhost").unwrap();
    let mut tls = TlsConnector::from(pki.client).connect(server_name, tcp).await.unwrap();

    for _ in 0..2 {
        tls.write_all(b"GET /secure HTTP/1.1\r\nHost: localhost\r\n\r\n").await.unwrap();
        let response = read_response(&mut tls).await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
        assert!(response.ends_with("plained"), "{response}");
    }
    assert_eq!(backend.accepted(), 1);
}

#[tokio::test]
async fn outbound_tls_connection() {
    let pki = pki();
    let addr = start_tls_server(Echo, pki.server).await;

    let options = RelayOptions::default().with_tls_client(pki.client);
    let mut conn = OutboundConnection::open(addr, OutboundSecurity::tls("localhost"), &options).await.unwrap();
    assert!(conn.is_secure());

    conn.write_request(&mut Request::new(Method::GET, "/hello")).await.unwrap();
    let mut response = conn.read_response().await.unwrap();
    let body = response.buffer_body().await.unwrap().unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(&body[..], b"secure=true target=/hello");
    assert!(conn.is_reusable());
}

#[tokio::test]
async fn untrusted_backend_certificate_fails_handshake() {
    let server_side = pki();
    let other = pki();
    let addr = start_tls_server(Echo, server_side.server).await;

    let options = RelayOptions::default().with_tls_client(other.client);
    let err = OutboundConnection::open(addr, OutboundSecurity::tls("localhost"), &options).await.unwrap_err();
    assert!(matches!(err, ConnectError::Tls { .. }));
}
