//! Stream establishment.
//!
//! The connection manager never names `TcpStream`; it asks a [`Connector`]
//! for a boxed read half and write half.  Tests swap in in-memory duplex
//! pipes or misbehaving streams through the same seam.

use std::io;

use async_trait::async_trait;
use rembraille_core::Endpoint;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Opens a byte stream to an endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, endpoint: Endpoint) -> io::Result<(BoxedReader, BoxedWriter)>;
}

/// Plain TCP with Nagle disabled, so single display rows go out immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: Endpoint) -> io::Result<(BoxedReader, BoxedWriter)> {
        let stream = TcpStream::connect(endpoint.socket_addr()).await?;
        stream.set_nodelay(true)?;
        debug!(%endpoint, local = ?stream.local_addr().ok(), "tcp stream established");
        let (read_half, write_half) = stream.into_split();
        Ok((Box::new(read_half), Box::new(write_half)))
    }
}
