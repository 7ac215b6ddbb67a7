//! In-process LAN
//!
//! A [`VirtualLan`] is a shared, single-threaded network. Each
//! [`MemoryTransport`] handed out by [`VirtualLan::host`] is one machine with
//! its own IPv4 address. Datagrams to the broadcast address reach every
//! datagram socket bound to the target port; streams are pairs of byte
//! pipes with close propagation. Behaviour mirrors what the lobby relies on
//! from real sockets: `AddrInUse` on double-bind, refused connects, broadcast
//! permission, would-block on empty queues and EOF after peer close.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::Ipv4Addr;
use std::rc::Rc;

use lanlobby_core::Endpoint;

use super::{Attempt, DatagramOptions, DatagramSocket, StreamListener, StreamSocket, Transport};

const FIRST_EPHEMERAL_PORT: u16 = 49152;

type PipeId = u64;
type SocketId = u64;

struct Pipe {
    data: VecDeque<u8>,
    /// One of the two ends has gone away
    closed: bool,
    open_ends: u8,
}

struct DatagramSlot {
    local: Endpoint,
    broadcast: bool,
    reuse_address: bool,
    inbox: VecDeque<(Vec<u8>, Endpoint)>,
}

struct PendingConnect {
    /// Client to server
    upstream: PipeId,
    /// Server to client
    downstream: PipeId,
    client: Endpoint,
}

struct ListenerSlot {
    backlog: usize,
    pending: VecDeque<PendingConnect>,
}

#[derive(Default)]
struct LanState {
    next_id: u64,
    next_port: HashMap<Ipv4Addr, u16>,
    datagrams: HashMap<SocketId, DatagramSlot>,
    listeners: HashMap<Endpoint, ListenerSlot>,
    pipes: HashMap<PipeId, Pipe>,
    /// Max bytes buffered per pipe before `send` would block
    pipe_capacity: Option<usize>,
}

impl LanState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn ephemeral_port(&mut self, address: Ipv4Addr) -> u16 {
        let port = self.next_port.entry(address).or_insert(FIRST_EPHEMERAL_PORT);
        let assigned = *port;
        *port = port.checked_add(1).unwrap_or(FIRST_EPHEMERAL_PORT);
        assigned
    }

    fn new_pipe(&mut self) -> PipeId {
        let id = self.next_id();
        self.pipes.insert(
            id,
            Pipe {
                data: VecDeque::new(),
                closed: false,
                open_ends: 2,
            },
        );
        id
    }

    fn release_pipe_end(&mut self, id: PipeId) {
        let remove = match self.pipes.get_mut(&id) {
            Some(pipe) => {
                pipe.closed = true;
                pipe.open_ends = pipe.open_ends.saturating_sub(1);
                pipe.open_ends == 0
            }
            None => false,
        };
        if remove {
            self.pipes.remove(&id);
        }
    }
}

/// Shared in-memory network
#[derive(Clone, Default)]
pub struct VirtualLan {
    state: Rc<RefCell<LanState>>,
}

impl VirtualLan {
    pub fn new() -> Self {
        Self::default()
    }

    /// A machine on this LAN
    pub fn host(&self, address: Ipv4Addr) -> MemoryTransport {
        MemoryTransport {
            lan: self.clone(),
            address,
        }
    }

    /// Limit how many bytes a stream direction buffers before `send` blocks.
    /// Unlimited by default.
    pub fn set_pipe_capacity(&self, capacity: Option<usize>) {
        self.state.borrow_mut().pipe_capacity = capacity;
    }
}

/// One machine on a [`VirtualLan`]
#[derive(Clone)]
pub struct MemoryTransport {
    lan: VirtualLan,
    address: Ipv4Addr,
}

impl MemoryTransport {
    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    /// Loopback targets mean this machine
    fn resolve(&self, target: Endpoint) -> Endpoint {
        if target.address.is_loopback() {
            Endpoint::new(self.address, target.port)
        } else {
            target
        }
    }
}

impl Transport for MemoryTransport {
    type Datagram = MemoryDatagram;
    type Stream = MemoryStream;
    type Listener = MemoryListener;

    fn bind_datagram(&self, options: DatagramOptions) -> io::Result<MemoryDatagram> {
        let mut state = self.lan.state.borrow_mut();
        let port = if options.port == 0 {
            state.ephemeral_port(self.address)
        } else {
            options.port
        };
        let local = Endpoint::new(self.address, port);

        let conflict = state
            .datagrams
            .values()
            .any(|slot| slot.local == local && !(slot.reuse_address && options.reuse_address));
        if conflict {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("datagram port {} in use", local),
            ));
        }

        let id = state.next_id();
        state.datagrams.insert(
            id,
            DatagramSlot {
                local,
                broadcast: options.broadcast,
                reuse_address: options.reuse_address,
                inbox: VecDeque::new(),
            },
        );

        Ok(MemoryDatagram {
            lan: self.lan.clone(),
            id,
            local,
        })
    }

    fn listen(&self, port: u16, backlog: i32) -> io::Result<MemoryListener> {
        let mut state = self.lan.state.borrow_mut();
        let port = if port == 0 {
            state.ephemeral_port(self.address)
        } else {
            port
        };
        let local = Endpoint::new(self.address, port);

        if state.listeners.contains_key(&local) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("stream port {} in use", local),
            ));
        }

        state.listeners.insert(
            local,
            ListenerSlot {
                backlog: backlog.max(1) as usize,
                pending: VecDeque::new(),
            },
        );

        Ok(MemoryListener {
            lan: self.lan.clone(),
            local,
        })
    }

    fn connect(&self, target: Endpoint) -> io::Result<MemoryStream> {
        let target = self.resolve(target);
        let mut state = self.lan.state.borrow_mut();

        let accepting = match state.listeners.get(&target) {
            Some(listener) => listener.pending.len() < listener.backlog,
            None => false,
        };
        if !accepting {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("nothing accepting on {}", target),
            ));
        }

        let client = Endpoint::new(self.address, state.ephemeral_port(self.address));
        let upstream = state.new_pipe();
        let downstream = state.new_pipe();
        if let Some(listener) = state.listeners.get_mut(&target) {
            listener.pending.push_back(PendingConnect {
                upstream,
                downstream,
                client,
            });
        }

        Ok(MemoryStream {
            lan: self.lan.clone(),
            inbound: downstream,
            outbound: upstream,
            peer: target,
        })
    }
}

/// Datagram endpoint on a [`VirtualLan`]
pub struct MemoryDatagram {
    lan: VirtualLan,
    id: SocketId,
    local: Endpoint,
}

impl DatagramSocket for MemoryDatagram {
    fn send_to(&self, buf: &[u8], target: Endpoint) -> io::Result<Attempt<usize>> {
        let mut state = self.lan.state.borrow_mut();
        let is_broadcast = target.address.is_broadcast();

        if is_broadcast {
            let allowed = state
                .datagrams
                .get(&self.id)
                .map(|slot| slot.broadcast)
                .unwrap_or(false);
            if !allowed {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "broadcast not enabled on socket",
                ));
            }
        }

        let local = self.local;
        for slot in state.datagrams.values_mut() {
            let addressed = if is_broadcast {
                slot.local.port == target.port
            } else {
                slot.local == target
            };
            if addressed {
                slot.inbox.push_back((buf.to_vec(), local));
            }
        }

        // Undeliverable unicast is silently lost, like UDP
        Ok(Attempt::Ready(buf.len()))
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<Attempt<(usize, Endpoint)>> {
        let mut state = self.lan.state.borrow_mut();
        let slot = state
            .datagrams
            .get_mut(&self.id)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;

        match slot.inbox.pop_front() {
            Some((payload, from)) => {
                let len = payload.len().min(buf.len());
                buf[..len].copy_from_slice(&payload[..len]);
                Ok(Attempt::Ready((len, from)))
            }
            None => Ok(Attempt::WouldBlock),
        }
    }

    fn local_endpoint(&self) -> io::Result<Endpoint> {
        Ok(self.local)
    }
}

impl Drop for MemoryDatagram {
    fn drop(&mut self) {
        if let Ok(mut state) = self.lan.state.try_borrow_mut() {
            state.datagrams.remove(&self.id);
        }
    }
}

/// Listener on a [`VirtualLan`]
pub struct MemoryListener {
    lan: VirtualLan,
    local: Endpoint,
}

impl StreamListener for MemoryListener {
    type Stream = MemoryStream;

    fn accept(&self) -> io::Result<Attempt<(MemoryStream, Endpoint)>> {
        let mut state = self.lan.state.borrow_mut();
        let listener = state
            .listeners
            .get_mut(&self.local)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;

        match listener.pending.pop_front() {
            Some(pending) => Ok(Attempt::Ready((
                MemoryStream {
                    lan: self.lan.clone(),
                    inbound: pending.upstream,
                    outbound: pending.downstream,
                    peer: pending.client,
                },
                pending.client,
            ))),
            None => Ok(Attempt::WouldBlock),
        }
    }

    fn local_endpoint(&self) -> io::Result<Endpoint> {
        Ok(self.local)
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        if let Ok(mut state) = self.lan.state.try_borrow_mut() {
            if let Some(listener) = state.listeners.remove(&self.local) {
                // Connects never accepted see the connection drop
                for pending in listener.pending {
                    state.release_pipe_end(pending.upstream);
                    state.release_pipe_end(pending.downstream);
                }
            }
        }
    }
}

/// One end of a stream on a [`VirtualLan`]
pub struct MemoryStream {
    lan: VirtualLan,
    inbound: PipeId,
    outbound: PipeId,
    peer: Endpoint,
}

impl StreamSocket for MemoryStream {
    fn send(&mut self, buf: &[u8]) -> io::Result<Attempt<usize>> {
        let mut state = self.lan.state.borrow_mut();
        let capacity = state.pipe_capacity;
        let pipe = state
            .pipes
            .get_mut(&self.outbound)
            .ok_or_else(|| io::Error::from(io::ErrorKind::BrokenPipe))?;
        if pipe.closed {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }

        let room = match capacity {
            Some(cap) => cap.saturating_sub(pipe.data.len()),
            None => buf.len(),
        };
        if room == 0 && !buf.is_empty() {
            return Ok(Attempt::WouldBlock);
        }

        let len = room.min(buf.len());
        pipe.data.extend(&buf[..len]);
        Ok(Attempt::Ready(len))
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<Attempt<usize>> {
        let mut state = self.lan.state.borrow_mut();
        let pipe = match state.pipes.get_mut(&self.inbound) {
            Some(pipe) => pipe,
            None => return Ok(Attempt::Ready(0)),
        };

        if pipe.data.is_empty() {
            return if pipe.closed {
                Ok(Attempt::Ready(0))
            } else {
                Ok(Attempt::WouldBlock)
            };
        }

        let len = pipe.data.len().min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(pipe.data.drain(..len)) {
            *slot = byte;
        }
        Ok(Attempt::Ready(len))
    }

    fn peer_endpoint(&self) -> io::Result<Endpoint> {
        Ok(self.peer)
    }
}

impl Drop for MemoryStream {
    fn drop(&mut self) {
        if let Ok(mut state) = self.lan.state.try_borrow_mut() {
            state.release_pipe_end(self.inbound);
            state.release_pipe_end(self.outbound);
        }
    }
}
