//! Transport abstraction
//!
//! The lobby only needs a handful of socket capabilities: a broadcast-capable
//! datagram endpoint, a listening stream endpoint, outbound stream connects,
//! and non-blocking send/receive on each. Every data operation reports
//! [`Attempt::WouldBlock`] separately from hard errors so the poll-driven
//! state machines never stall.
//!
//! Two backings are provided: [`SystemTransport`] over real IPv4 sockets and
//! [`MemoryTransport`], an in-process LAN for deterministic tests.

use std::io;

use lanlobby_core::Endpoint;

pub mod memory;
pub mod system;

pub use memory::{MemoryTransport, VirtualLan};
pub use system::SystemTransport;

/// Outcome of a non-blocking operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt<T> {
    Ready(T),
    /// Nothing could be transferred right now; try again next advance
    WouldBlock,
}

impl<T> Attempt<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            Attempt::Ready(value) => Some(value),
            Attempt::WouldBlock => None,
        }
    }

    pub fn is_would_block(&self) -> bool {
        matches!(self, Attempt::WouldBlock)
    }
}

/// Fold `ErrorKind::WouldBlock` into [`Attempt::WouldBlock`]
pub fn attempt<T>(result: io::Result<T>) -> io::Result<Attempt<T>> {
    match result {
        Ok(value) => Ok(Attempt::Ready(value)),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Attempt::WouldBlock),
        Err(e) => Err(e),
    }
}

/// Options applied to a datagram endpoint before it is bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramOptions {
    /// 0 asks for an OS-assigned port
    pub port: u16,
    pub broadcast: bool,
    pub reuse_address: bool,
}

impl DatagramOptions {
    pub fn port(port: u16) -> Self {
        Self {
            port,
            broadcast: false,
            reuse_address: false,
        }
    }

    pub fn broadcast(mut self, enable: bool) -> Self {
        self.broadcast = enable;
        self
    }

    pub fn reuse_address(mut self, enable: bool) -> Self {
        self.reuse_address = enable;
        self
    }
}

/// Connectionless, unordered endpoint
pub trait DatagramSocket {
    fn send_to(&self, buf: &[u8], target: Endpoint) -> io::Result<Attempt<usize>>;

    /// Receive one datagram; truncated to `buf.len()` if larger
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<Attempt<(usize, Endpoint)>>;

    fn local_endpoint(&self) -> io::Result<Endpoint>;
}

/// Connected byte stream. Dropping it closes the connection.
pub trait StreamSocket {
    /// May accept fewer bytes than offered
    fn send(&mut self, buf: &[u8]) -> io::Result<Attempt<usize>>;

    /// `Ready(0)` means the peer closed its side
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<Attempt<usize>>;

    fn peer_endpoint(&self) -> io::Result<Endpoint>;
}

/// Listening stream endpoint
pub trait StreamListener {
    type Stream: StreamSocket;

    /// Accepted streams are already non-blocking
    fn accept(&self) -> io::Result<Attempt<(Self::Stream, Endpoint)>>;

    fn local_endpoint(&self) -> io::Result<Endpoint>;
}

/// Factory for the socket kinds the lobby uses
pub trait Transport {
    type Datagram: DatagramSocket;
    type Stream: StreamSocket;
    type Listener: StreamListener<Stream = Self::Stream>;

    /// Create a non-blocking datagram endpoint on the wildcard address
    fn bind_datagram(&self, options: DatagramOptions) -> io::Result<Self::Datagram>;

    /// Create a non-blocking listener; port 0 asks for an OS-assigned port
    fn listen(&self, port: u16, backlog: i32) -> io::Result<Self::Listener>;

    /// Start a non-blocking connect. A connect still in progress is success;
    /// failures surface later from `send`/`recv`.
    fn connect(&self, target: Endpoint) -> io::Result<Self::Stream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_folds_would_block() {
        let blocked: io::Result<usize> = Err(io::ErrorKind::WouldBlock.into());
        assert_eq!(attempt(blocked).unwrap(), Attempt::WouldBlock);

        let ready: io::Result<usize> = Ok(3);
        assert_eq!(attempt(ready).unwrap().ready(), Some(3));

        let failed: io::Result<usize> = Err(io::ErrorKind::ConnectionReset.into());
        assert!(attempt(failed).is_err());
    }
}
