use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::{client, server};

/// The byte channel underneath a connection.
///
/// Plain and TLS connections differ only in this value; parsers and writers see the same
/// `AsyncRead`/`AsyncWrite` contract either way. A closed channel reads as end of stream and
/// refuses writes.
#[derive(Debug)]
pub enum Channel {
    Plain(TcpStream),
    ServerTls(Box<server::TlsStream<TcpStream>>),
    ClientTls(Box<client::TlsStream<TcpStream>>),
    Closed,
}

impl Channel {
    pub fn is_secure(&self) -> bool {
        matches!(self, Channel::ServerTls(_) | Channel::ClientTls(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Channel::Closed)
    }

    /// The TCP socket carrying this channel.
    pub fn tcp(&self) -> Option<&TcpStream> {
        match self {
            Channel::Plain(tcp) => Some(tcp),
            Channel::ServerTls(tls) => Some(tls.get_ref().0),
            Channel::ClientTls(tls) => Some(tls.get_ref().0),
            Channel::Closed => None,
        }
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "channel is closed")
}

impl AsyncRead for Channel {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Channel::Plain(tcp) => Pin::new(tcp).poll_read(cx, buf),
            Channel::ServerTls(tls) => Pin::new(tls.as_mut()).poll_read(cx, buf),
            Channel::ClientTls(tls) => Pin::new(tls.as_mut()).poll_read(cx, buf),
            Channel::Closed => Poll::Ready(Ok(())),
        }
    }
}

impl AsyncWrite for Channel {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Channel::Plain(tcp) => Pin::new(tcp).poll_write(cx, buf),
            Channel::ServerTls(tls) => Pin::new(tls.as_mut()).poll_write(cx, buf),
            Channel::ClientTls(tls) => Pin::new(tls.as_mut()).poll_write(cx, buf),
            Channel::Closed => Poll::Ready(Err(not_connected())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Channel::Plain(tcp) => Pin::new(tcp).poll_flush(cx),
            Channel::ServerTls(tls) => Pin::new(tls.as_mut()).poll_flush(cx),
            Channel::ClientTls(tls) => Pin::new(tls.as_mut()).poll_flush(cx),
            Channel::Closed => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Channel::Plain(tcp) => Pin::new(tcp).poll_shutdown(cx),
            Channel::ServerTls(tls) => Pin::new(tls.as_mut()).poll_shutdown(cx),
            Channel::ClientTls(tls) => Pin::new(tls.as_mut()).poll_shutdown(cx),
            Channel::Closed => Poll::Ready(Ok(())),
        }
    }
}
