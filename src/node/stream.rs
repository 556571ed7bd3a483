// src/node/stream.rs

use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::{client, server};

/// The transport of one cluster link: plain TCP, or TLS from either end.
pub enum LinkStream {
    Tcp(TcpStream),
    /// The head's end of a TLS link.
    TlsServer(Box<server::TlsStream<TcpStream>>),
    /// A follower's end of a TLS link.
    TlsClient(Box<client::TlsStream<TcpStream>>),
}

impl AsyncRead for LinkStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            LinkStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            LinkStream::TlsServer(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            LinkStream::TlsClient(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for LinkStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        match self.get_mut() {
            LinkStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            LinkStream::TlsServer(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            LinkStream::TlsClient(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        match self.get_mut() {
            LinkStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            LinkStream::TlsServer(s) => Pin::new(s.as_mut()).poll_flush(cx),
            LinkStream::TlsClient(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        match self.get_mut() {
            LinkStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            LinkStream::TlsServer(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            LinkStream::TlsClient(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}
