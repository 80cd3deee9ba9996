use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use uuid::Uuid;

/// Identifier of one accepted connection.
pub type ConnectionId = Uuid;

/// Per-connection context bound to every module instance serving that connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    pub connection_id: ConnectionId,
    pub peer_addr: SocketAddr,
    pub local_port: u16,
    pub connected_at: DateTime<Utc>,
}

impl Client {
    pub fn new(peer_addr: SocketAddr, local_port: u16) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            peer_addr,
            local_port,
            connected_at: Utc::now(),
        }
    }
}
