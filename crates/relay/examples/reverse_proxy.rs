//! A minimal reverse proxy on top of the relay core.
//!
//! ```text
//! cargo run --example reverse_proxy -- 127.0.0.1:8080 example.com:443 tls
//! ```
//!
//! Every request is forwarded to the backend with its `Host` header rewritten and the client
//! address appended to `X-Forwarded-For`. Pass `cert.pem key.pem` as two extra arguments to
//! serve TLS to clients.

use std::net::SocketAddr;

use async_trait::async_trait;
use micro_relay::connection::OutboundSecurity;
use micro_relay::connection::tls::server_config_from_pem;
use micro_relay::protocol::{HttpError, Request, Response};
use micro_relay::{Context, Handler, Server};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const X_FORWARDED_FOR: &str = "X-Forwarded-For";

struct ReverseProxy {
    backend: SocketAddr,
    host: String,
    security: OutboundSecurity,
}

#[async_trait]
impl Handler for ReverseProxy {
    type Error = HttpError;

    async fn handle(&self, ctx: &mut Context, req: &mut Request) -> Result<Response, HttpError> {
        let client_ip = ctx.inbound().remote_addr().ip().to_string();
        let forwarded_for = match req.headers().get(X_FORWARDED_FOR) {
            Some(previous) => format!("{previous}, {client_ip}"),
            None => client_ip,
        };
        req.headers_mut().set(X_FORWARDED_FOR, forwarded_for);
        req.headers_mut().set("Host", self.host.as_str());

        info!(method = %req.method(), target = req.target(), backend = %self.backend, "forwarding request");

        let outbound = ctx.open_outbound(self.backend, self.security.clone()).await?;
        outbound.write_request(req).await?;
        Ok(outbound.read_response().await?)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?)).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let listen = args.first().map_or("127.0.0.1:8080", String::as_str);
    let backend_arg = args.get(1).map_or("127.0.0.1:9000", String::as_str);
    let backend_tls = args.get(2).is_some_and(|mode| mode == "tls");

    let host = backend_arg.rsplit_once(':').map_or(backend_arg, |(host, _)| host).to_string();
    let backend = tokio::net::lookup_host(backend_arg).await?.next().ok_or("backend address did not resolve")?;
    let security = if backend_tls { OutboundSecurity::tls(host.clone()) } else { OutboundSecurity::Plain };

    let mut builder = Server::builder().address(listen).handler(ReverseProxy { backend, host, security });
    if let (Some(cert), Some(key)) = (args.get(3), args.get(4)) {
        builder = builder.tls(server_config_from_pem(cert, key)?);
    }

    let server = match builder.build() {
        Ok(server) => server,
        Err(e) => {
            error!(cause = %e, "failed to start the proxy");
            return Err(e.into());
        }
    };
    info!(address = %server.local_addr(), backend = %backend, "reverse proxy ready");
    server.run().await?;
    Ok(())
}
