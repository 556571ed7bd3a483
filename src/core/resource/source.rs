// src/core/resource/source.rs

//! The real resources behind a cluster-transparent file. Only the head ever
//! constructs one of these.

use super::identifier::ResourceId;
use crate::core::ClusterError;
use crate::core::session::ClusterSession;
use crate::core::tls;
use bytes::{Bytes, BytesMut};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tracing::debug;
use url::Url;

/// An HTTP response body consumed chunk by chunk.
pub(crate) struct HttpBody {
    response: reqwest::Response,
    buffered: Bytes,
}

impl HttpBody {
    async fn next_chunk(&mut self, max: usize) -> Result<Bytes, ClusterError> {
        while self.buffered.is_empty() {
            match self.response.chunk().await? {
                Some(chunk) => self.buffered = chunk,
                None => return Ok(Bytes::new()),
            }
        }
        let n = self.buffered.len().min(max);
        Ok(self.buffered.split_to(n))
    }
}

/// The head-side resource, selected once at open time.
pub(crate) enum HeadSource {
    Local(tokio::fs::File),
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    Http(HttpBody),
}

impl HeadSource {
    pub(crate) async fn open(id: &ResourceId, session: &ClusterSession) -> Result<Self, ClusterError> {
        match id {
            ResourceId::Local(path) => {
                let file = tokio::fs::File::open(path).await?;
                if file.metadata().await?.is_dir() {
                    return Err(io::Error::new(
                        io::ErrorKind::IsADirectory,
                        format!("'{}' is a directory", path.display()),
                    )
                    .into());
                }
                Ok(HeadSource::Local(file))
            }
            ResourceId::Tcp { host, port } => {
                let stream = connect_tcp(host, *port, session.io().connect_timeout_secs).await?;
                Ok(HeadSource::Tcp(stream))
            }
            ResourceId::Tls { host, port } => {
                let stream = connect_tcp(host, *port, session.io().connect_timeout_secs).await?;
                let connector = session.tls_connector()?;
                let tls_stream = connector.connect(tls::server_name(host)?, stream).await?;
                Ok(HeadSource::Tls(Box::new(tls_stream)))
            }
            ResourceId::Http(url) => {
                let response = fetch(session.http_client(), url).await?;
                Ok(HeadSource::Http(HttpBody {
                    response,
                    buffered: Bytes::new(),
                }))
            }
        }
    }

    /// Reads up to `max` bytes. An empty result means end-of-stream.
    pub(crate) async fn read_chunk(&mut self, max: usize) -> Result<Bytes, ClusterError> {
        match self {
            HeadSource::Local(file) => read_into(file, max).await,
            HeadSource::Tcp(stream) => read_into(stream, max).await,
            HeadSource::Tls(stream) => read_into(stream.as_mut(), max).await,
            HeadSource::Http(body) => body.next_chunk(max).await,
        }
    }

    pub(crate) async fn write_all(&mut self, data: &[u8]) -> Result<(), ClusterError> {
        match self {
            HeadSource::Tcp(stream) => {
                stream.write_all(data).await?;
                stream.flush().await?;
                Ok(())
            }
            HeadSource::Tls(stream) => {
                stream.write_all(data).await?;
                stream.flush().await?;
                Ok(())
            }
            HeadSource::Local(_) | HeadSource::Http(_) => Err(ClusterError::InvalidState(
                "only network streams can be written".into(),
            )),
        }
    }

    /// Releases the resource, closing the write side of network streams.
    pub(crate) async fn shutdown(self) {
        let result = match self {
            HeadSource::Tcp(mut stream) => stream.shutdown().await,
            HeadSource::Tls(mut stream) => stream.shutdown().await,
            HeadSource::Local(_) | HeadSource::Http(_) => Ok(()),
        };
        if let Err(e) = result {
            debug!("Shutting down a network resource failed: {e}");
        }
    }
}

/// Issues a GET and fails on any non-2xx status.
pub(crate) async fn fetch(client: &reqwest::Client, url: &Url) -> Result<reqwest::Response, ClusterError> {
    debug!("GET {url}");
    let response = client.get(url.clone()).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ClusterError::HttpClientError(format!(
            "GET {url} returned {status}"
        )));
    }
    Ok(response)
}

async fn connect_tcp(host: &str, port: u16, timeout_secs: u64) -> Result<TcpStream, ClusterError> {
    let connect = TcpStream::connect((host, port));
    match tokio::time::timeout(Duration::from_secs(timeout_secs), connect).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("connecting to {host}:{port} timed out after {timeout_secs}s"),
        )
        .into()),
    }
}

async fn read_into<R>(reader: &mut R, max: usize) -> Result<Bytes, ClusterError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = BytesMut::zeroed(max);
    let n = reader.read(&mut buf).await?;
    buf.truncate(n);
    Ok(buf.freeze())
}
