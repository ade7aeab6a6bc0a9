use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("timed out waiting for a datagram")]
    Timeout,
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("socket closed")]
    Closed,
    #[error("no peer to answer")]
    NoPeer,
}

/// One inbound datagram and who sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub message: Vec<u8>,
    pub peer: SocketAddr,
}

/// Blocking datagram transport the UA drives.
///
/// Implementations own sockets, timeouts and send retries; every call
/// returns within a bounded time.
pub trait Transport {
    /// Send a request to the server and wait for its reply.
    fn send_request(&mut self, message: &[u8]) -> Result<Vec<u8>, TransportError>;

    /// Wait for the next inbound datagram.
    fn receive_request(&mut self) -> Result<Inbound, TransportError>;

    /// Answer the peer of the last inbound datagram.
    fn send_response(&mut self, message: &[u8]) -> Result<(), TransportError>;

    fn close(&mut self);
}
