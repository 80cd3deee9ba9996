use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{AsyncStream, ConnectionDescriptor, Socket, SocketFactory};
use crate::error::{Result, TransportError};
use crate::module::Query;

const DEFAULT_MAX_LINE: usize = 64 * 1024;

/// Builds newline-delimited sockets.
#[derive(Debug, Clone)]
pub struct LineSocketFactory {
    max_line_length: usize,
}

impl LineSocketFactory {
    pub fn new(max_line_length: usize) -> Self {
        Self { max_line_length }
    }

    pub fn max_line_length(&self) -> usize {
        self.max_line_length
    }
}

impl Default for LineSocketFactory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE)
    }
}

impl SocketFactory for LineSocketFactory {
    fn protocol(&self) -> &str {
        "line"
    }

    fn build(&self, descriptor: ConnectionDescriptor) -> Box<dyn Socket> {
        Box::new(LineSocket::new(descriptor.stream, self.max_line_length))
    }
}

pub struct LineSocket {
    stream: Box<dyn AsyncStream>,
    buffer: BytesMut,
    max_line_length: usize,
    closed: bool,
}

impl LineSocket {
    pub fn new(stream: Box<dyn AsyncStream>, max_line_length: usize) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(8192),
            max_line_length,
            closed: false,
        }
    }

    fn take_line(&mut self) -> Result<Option<Query>> {
        let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };
        if pos > self.max_line_length {
            return Err(TransportError::FrameTooLarge(self.max_line_length).into());
        }
        let line = self.buffer.split_to(pos + 1);
        Ok(Some(Query::new(line.freeze())))
    }
}

#[async_trait]
impl Socket for LineSocket {
    async fn read_query(&mut self) -> Result<Option<Query>> {
        if self.closed {
            return Err(TransportError::Closed.into());
        }

        loop {
            if let Some(query) = self.take_line()? {
                return Ok(Some(query));
            }

            if self.buffer.len() > self.max_line_length {
                return Err(TransportError::FrameTooLarge(self.max_line_length).into());
            }

            let n = self
                .stream
                .read_buf(&mut self.buffer)
                .await
                .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;

            if n == 0 {
                // Trailing data without a terminator still counts as a query.
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                let rest = self.buffer.split();
                return Ok(Some(Query::new(rest.freeze())));
            }
        }
    }

    async fn write_response(&mut self, response: &Query) -> Result<()> {
        if self.closed {
            return Err(TransportError::Closed.into());
        }

        self.stream
            .write_all(response.payload())
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        if !response.payload().ends_with(b"\n") {
            self.stream
                .write_all(b"\n")
                .await
                .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        }
        self.stream
            .flush()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Err(e) = self.stream.shutdown().await {
            tracing::debug!("Socket shutdown failed: {}", e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApirateError;
    use std::net::SocketAddr;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_reads_one_query_per_line() {
        let (client, server) = tokio::io::duplex(1024);
        let factory = LineSocketFactory::default();
        let mut socket = factory.build(ConnectionDescriptor::new(server, peer(), 7070));

        let mut client = client;
        client.write_all(b"first\nsecond\n").await.unwrap();
        drop(client);

        let first = socket.read_query().await.unwrap().unwrap();
        let second = socket.read_query().await.unwrap().unwrap();
        assert_eq!(first.text(), "first\n");
        assert_eq!(second.text(), "second\n");
        assert!(socket.read_query().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unterminated_tail_is_delivered() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut socket = LineSocketFactory::default().build(ConnectionDescriptor::new(
            server,
            peer(),
            7070,
        ));

        client.write_all(b"tail").await.unwrap();
        drop(client);

        let query = socket.read_query().await.unwrap().unwrap();
        assert_eq!(query.text(), "tail");
    }

    #[tokio::test]
    async fn test_line_limit() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut socket =
            LineSocketFactory::new(8).build(ConnectionDescriptor::new(server, peer(), 7070));

        client.write_all(b"0123456789abcdef\n").await.unwrap();

        let err = socket.read_query().await.unwrap_err();
        assert!(matches!(
            err,
            ApirateError::Transport(TransportError::FrameTooLarge(8))
        ));
    }

    #[tokio::test]
    async fn test_write_appends_terminator() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut socket = LineSocketFactory::default().build(ConnectionDescriptor::new(
            server,
            peer(),
            7070,
        ));

        socket.write_response(&Query::new("pong")).await.unwrap();
        socket.close().await.unwrap();

        let mut received = String::new();
        client.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "pong\n");
    }
}
