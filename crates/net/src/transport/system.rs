//! Transport over the platform's IPv4 sockets
//!
//! Sockets are configured through `socket2` (reuse-address, broadcast,
//! backlog, non-blocking connect) and then handed to the std socket types
//! for I/O.

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream, UdpSocket};

use lanlobby_core::Endpoint;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::{debug, trace};

use super::{
    attempt, Attempt, DatagramOptions, DatagramSocket, StreamListener, StreamSocket, Transport,
};

/// Real sockets
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTransport;

impl SystemTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for SystemTransport {
    type Datagram = SystemDatagram;
    type Stream = SystemStream;
    type Listener = SystemListener;

    fn bind_datagram(&self, options: DatagramOptions) -> io::Result<SystemDatagram> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        if options.reuse_address {
            socket.set_reuse_address(true)?;
        }
        if options.broadcast {
            socket.set_broadcast(true)?;
        }
        socket.set_nonblocking(true)?;
        socket.bind(&SockAddr::from(Endpoint::any(options.port).socket_addr()))?;

        let socket: UdpSocket = socket.into();
        debug!(local = ?socket.local_addr().ok(), broadcast = options.broadcast, "Datagram socket bound");
        Ok(SystemDatagram { socket })
    }

    fn listen(&self, port: u16, backlog: i32) -> io::Result<SystemListener> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&SockAddr::from(Endpoint::any(port).socket_addr()))?;
        socket.listen(backlog)?;

        let listener: TcpListener = socket.into();
        debug!(local = ?listener.local_addr().ok(), "Stream listener bound");
        Ok(SystemListener { listener })
    }

    fn connect(&self, target: Endpoint) -> io::Result<SystemStream> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;
        match socket.connect(&SockAddr::from(target.socket_addr())) {
            Ok(()) => {}
            Err(e) if connect_in_progress(&e) => {
                trace!(target = %target, "Connect in progress");
            }
            Err(e) => return Err(e),
        }

        let stream: TcpStream = socket.into();
        stream.set_nodelay(true)?;
        Ok(SystemStream { stream, target })
    }
}

fn connect_in_progress(e: &io::Error) -> bool {
    if e.kind() == io::ErrorKind::WouldBlock {
        return true;
    }
    #[cfg(unix)]
    {
        if e.raw_os_error() == Some(libc::EINPROGRESS) {
            return true;
        }
    }
    false
}

fn endpoint_of(addr: std::net::SocketAddr) -> io::Result<Endpoint> {
    Endpoint::try_from(addr).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
}

/// UDP endpoint
#[derive(Debug)]
pub struct SystemDatagram {
    socket: UdpSocket,
}

impl DatagramSocket for SystemDatagram {
    fn send_to(&self, buf: &[u8], target: Endpoint) -> io::Result<Attempt<usize>> {
        attempt(self.socket.send_to(buf, target.socket_addr()))
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<Attempt<(usize, Endpoint)>> {
        match attempt(self.socket.recv_from(buf))? {
            Attempt::Ready((len, from)) => Ok(Attempt::Ready((len, endpoint_of(from)?))),
            Attempt::WouldBlock => Ok(Attempt::WouldBlock),
        }
    }

    fn local_endpoint(&self) -> io::Result<Endpoint> {
        endpoint_of(self.socket.local_addr()?)
    }
}

/// TCP listener
#[derive(Debug)]
pub struct SystemListener {
    listener: TcpListener,
}

impl StreamListener for SystemListener {
    type Stream = SystemStream;

    fn accept(&self) -> io::Result<Attempt<(SystemStream, Endpoint)>> {
        match attempt(self.listener.accept())? {
            Attempt::Ready((stream, addr)) => {
                stream.set_nonblocking(true)?;
                stream.set_nodelay(true)?;
                let peer = endpoint_of(addr)?;
                Ok(Attempt::Ready((SystemStream { stream, target: peer }, peer)))
            }
            Attempt::WouldBlock => Ok(Attempt::WouldBlock),
        }
    }

    fn local_endpoint(&self) -> io::Result<Endpoint> {
        endpoint_of(self.listener.local_addr()?)
    }
}

/// TCP stream
#[derive(Debug)]
pub struct SystemStream {
    stream: TcpStream,
    /// Remote end as requested; `peer_addr` is unavailable mid-connect
    target: Endpoint,
}

impl StreamSocket for SystemStream {
    fn send(&mut self, buf: &[u8]) -> io::Result<Attempt<usize>> {
        match attempt(self.stream.write(buf)) {
            // Still connecting
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(Attempt::WouldBlock),
            other => other,
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<Attempt<usize>> {
        match attempt(self.stream.read(buf)) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(Attempt::WouldBlock),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(Attempt::WouldBlock),
            other => other,
        }
    }

    fn peer_endpoint(&self) -> io::Result<Endpoint> {
        Ok(self.target)
    }
}
