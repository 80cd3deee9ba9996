use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;
use crate::module::Query;

pub mod line;

pub use line::{LineSocket, LineSocketFactory};

/// Byte stream a socket is built on. Satisfied by `TcpStream` and by
/// in-memory duplex streams.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Accepted connection handed to a [`SocketFactory`].
pub struct ConnectionDescriptor {
    pub stream: Box<dyn AsyncStream>,
    pub peer_addr: SocketAddr,
    pub local_port: u16,
}

impl ConnectionDescriptor {
    pub fn new(stream: impl AsyncStream, peer_addr: SocketAddr, local_port: u16) -> Self {
        Self {
            stream: Box::new(stream),
            peer_addr,
            local_port,
        }
    }
}

/// Protocol-specific socket owned by a single connection task.
#[async_trait]
pub trait Socket: Send + 'static {
    /// Next inbound query, `None` once the peer closed the stream.
    async fn read_query(&mut self) -> Result<Option<Query>>;
    async fn write_response(&mut self, response: &Query) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

/// Construction capability a module hands out from `listen` when it wants a
/// dedicated listener.
pub trait SocketFactory: Send + Sync + 'static {
    fn protocol(&self) -> &str;
    fn build(&self, descriptor: ConnectionDescriptor) -> Box<dyn Socket>;
}
