//! Lobby host
//!
//! The host advertises its session over LAN broadcast, accepts stream
//! connections, authorizes them with the Hello handshake and relays chat
//! between joined peers. Everything happens inside [`LobbyHost::advance`],
//! which the embedding application calls once per tick; no call blocks.

use std::collections::{BTreeMap, VecDeque};
use std::net::Ipv4Addr;

use bytes::Bytes;
use lanlobby_core::{
    ChatMessage, Clock, Endpoint, IdSource, LobbyConfig, MonotonicClock, Privacy, RandomIds,
    SessionId, SYSTEM_SENDER,
};
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::frame::MAX_FRAME_LEN;
use crate::invite::InviteUrl;
use crate::link::{RecvOutcome, StreamLink};
use crate::protocol::{self, Advertise, Hello, HelloAck, Kick, Packet};
use crate::transport::{
    Attempt, DatagramOptions, DatagramSocket, StreamListener, StreamSocket, Transport,
};

/// Display name used when the host did not give one
const DEFAULT_HOST_NAME: &str = "host";

const INVALID_INVITE_REASON: &str = "Invalid invite code";
const LOBBY_FULL_REASON: &str = "Lobby is full";
/// Largest UDP payload over IPv4
const MAX_DATAGRAM_LEN: usize = 65_507;

const RESERVED_NAME_REASON: &str = "Player name is reserved";

/// What the host announces when it starts a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSettings {
    pub lobby_name: String,
    pub host_player_name: String,
    pub privacy: Privacy,
    /// Required (non-empty) for [`Privacy::InviteOnly`]
    pub invite_code: String,
}

impl HostSettings {
    pub fn open(lobby_name: impl Into<String>, host_player_name: impl Into<String>) -> Self {
        Self {
            lobby_name: lobby_name.into(),
            host_player_name: host_player_name.into(),
            privacy: Privacy::Open,
            invite_code: String::new(),
        }
    }

    pub fn invite_only(
        lobby_name: impl Into<String>,
        host_player_name: impl Into<String>,
        invite_code: impl Into<String>,
    ) -> Self {
        Self {
            lobby_name: lobby_name.into(),
            host_player_name: host_player_name.into(),
            privacy: Privacy::InviteOnly,
            invite_code: invite_code.into(),
        }
    }

    fn display_name(&self) -> &str {
        if self.host_player_name.is_empty() || self.host_player_name == SYSTEM_SENDER {
            DEFAULT_HOST_NAME
        } else {
            &self.host_player_name
        }
    }
}

/// Identifies one accepted connection for the lifetime of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

/// Snapshot of a connection for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSummary {
    pub id: ConnectionId,
    pub endpoint: Endpoint,
    /// Set once the handshake completes
    pub name: Option<String>,
    pub joined: bool,
}

/// Session identity shared by every connection
struct Identity {
    session_id: SessionId,
    session_port: u16,
    settings: HostSettings,
}

impl Identity {
    fn advertise(&self) -> Packet {
        Packet::Advertise(Advertise {
            session_id: self.session_id,
            session_port: self.session_port,
            privacy: self.settings.privacy,
            lobby_name: self.settings.lobby_name.clone(),
            host_player_name: self.settings.host_player_name.clone(),
        })
    }

    fn hello_ack(&self) -> Packet {
        Packet::HelloAck(HelloAck {
            session_id: self.session_id,
            lobby_name: self.settings.lobby_name.clone(),
            host_player_name: self.settings.host_player_name.clone(),
            privacy: self.settings.privacy,
        })
    }

    fn admits(&self, invite_code: &str) -> bool {
        !self.settings.privacy.requires_invite() || invite_code == self.settings.invite_code
    }
}

/// Accepted stream peer
struct Connection<S> {
    id: ConnectionId,
    endpoint: Endpoint,
    name: Option<String>,
    joined: bool,
    link: StreamLink<S>,
}

impl<S: StreamSocket> Connection<S> {
    /// One bounded read, then dispatch every whole packet it completed.
    /// Returns encoded chat packets to relay to the other peers.
    fn pump(&mut self, identity: &Identity, now: u64, chat: &mut VecDeque<ChatMessage>) -> Vec<Bytes> {
        let mut relays = Vec::new();

        // Anything a previous advance could not hand to the socket
        if self.link.flush().is_err() {
            return relays;
        }

        match self.link.receive() {
            RecvOutcome::Idle | RecvOutcome::Closed => return relays,
            RecvOutcome::Received(n) => trace!(peer = %self.endpoint, bytes = n, "Received"),
        }

        while self.link.is_open() {
            let frame = match self.link.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    warn!(peer = %self.endpoint, error = %e, "Framing violation, closing connection");
                    self.link.close();
                    break;
                }
            };

            let mut body = &frame[..];
            let kind = match protocol::decode_header(&mut body) {
                Ok(kind) => kind,
                Err(e) => {
                    debug!(peer = %self.endpoint, error = %e, "Dropping packet with bad header");
                    continue;
                }
            };

            let packet = match protocol::decode_body(kind, &mut body) {
                Ok(packet) => packet,
                Err(e) if kind == protocol::MessageType::Hello => {
                    warn!(peer = %self.endpoint, error = %e, "Malformed hello, closing connection");
                    self.link.close();
                    break;
                }
                Err(e) => {
                    debug!(peer = %self.endpoint, kind = ?kind, error = %e, "Dropping malformed packet");
                    continue;
                }
            };

            match packet {
                Packet::Hello(hello) => self.handle_hello(hello, identity, now, chat),
                Packet::Chat(msg) => {
                    if let Some(relay) = self.handle_chat(msg, chat) {
                        relays.push(relay);
                    }
                }
                Packet::Advertise(_) | Packet::HelloAck(_) | Packet::Kick(_) => {
                    debug!(peer = %self.endpoint, kind = ?kind, "Ignoring unexpected message type");
                }
            }
        }

        relays
    }

    fn handle_hello(
        &mut self,
        hello: Hello,
        identity: &Identity,
        now: u64,
        chat: &mut VecDeque<ChatMessage>,
    ) {
        if hello.session_id != identity.session_id {
            // No reply: a foreign prober learns nothing about this session
            warn!(peer = %self.endpoint, session = %hello.session_id, "Hello for another session, closing");
            self.link.close();
            return;
        }

        if !identity.admits(&hello.invite_code) {
            info!(peer = %self.endpoint, player = %hello.player_name, "Join rejected: invalid invite code");
            kick_and_close(&mut self.link, self.endpoint, INVALID_INVITE_REASON);
            return;
        }

        if self.joined {
            debug!(peer = %self.endpoint, "Ignoring repeated hello");
            return;
        }

        // Lines from this name are host notices
        if hello.player_name == SYSTEM_SENDER {
            info!(peer = %self.endpoint, "Join rejected: reserved player name");
            kick_and_close(&mut self.link, self.endpoint, RESERVED_NAME_REASON);
            return;
        }

        if let Err(e) = self.link.send_packet(&identity.hello_ack()) {
            warn!(peer = %self.endpoint, error = %e, "Failed to acknowledge hello");
            self.link.close();
            return;
        }

        info!(peer = %self.endpoint, player = %hello.player_name, "Peer joined");
        chat.push_back(ChatMessage::system(now, format!("{} joined", hello.player_name)));
        self.name = Some(hello.player_name);
        self.joined = true;
    }

    fn handle_chat(&mut self, mut msg: ChatMessage, chat: &mut VecDeque<ChatMessage>) -> Option<Bytes> {
        let name = match (self.joined, self.name.as_ref()) {
            (true, Some(name)) => name,
            _ => {
                debug!(peer = %self.endpoint, "Ignoring chat from peer that has not joined");
                return None;
            }
        };

        // The sender is whoever completed the handshake on this stream
        if msg.from != *name {
            debug!(peer = %self.endpoint, claimed = %msg.from, player = %name, "Rewriting chat sender");
            msg.from = name.clone();
        }

        let relay = Packet::Chat(msg.clone()).encode();
        chat.push_back(msg);
        Some(relay)
    }
}

/// Queue a Kick and close. The link is closed either way, so a Kick the
/// socket did not take in full is lost.
fn kick_and_close<S: StreamSocket>(link: &mut StreamLink<S>, peer: Endpoint, reason: &str) {
    let kick = Packet::Kick(Kick {
        reason: reason.to_string(),
    });
    match link.send_packet(&kick) {
        Ok(()) if link.backlog() > 0 => {
            warn!(peer = %peer, unsent = link.backlog(), reason, "Kick only partly delivered")
        }
        Ok(()) => {}
        Err(e) => debug!(peer = %peer, error = %e, "Could not deliver kick"),
    }
    link.close();
}

/// Everything that exists only while hosting
struct Session<T: Transport> {
    identity: Identity,
    advertiser: T::Datagram,
    listener: T::Listener,
    last_advertise_ms: Option<u64>,
    connections: BTreeMap<ConnectionId, Connection<T::Stream>>,
    next_connection_id: u64,
    chat: VecDeque<ChatMessage>,
}

impl<T: Transport> Session<T> {
    /// Fixed-rate broadcast heartbeat
    fn advertise(&mut self, now: u64, config: &LobbyConfig) {
        if let Some(last) = self.last_advertise_ms {
            if now.saturating_sub(last) < config.advertise_interval_ms {
                return;
            }
        }
        self.last_advertise_ms = Some(now);

        let packet = self.identity.advertise().encode();
        let target = Endpoint::new(config.broadcast_address, config.discovery_port);
        match self.advertiser.send_to(&packet, target) {
            Ok(Attempt::Ready(_)) => trace!(target = %target, "Advertised"),
            Ok(Attempt::WouldBlock) => debug!("Advertise skipped, socket busy"),
            Err(e) => debug!(target = %target, error = %e, "Advertise failed"),
        }
    }

    fn accept_connections(&mut self, config: &LobbyConfig) {
        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(Attempt::Ready(accepted)) => accepted,
                Ok(Attempt::WouldBlock) => return,
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    return;
                }
            };

            let mut link = StreamLink::new(stream, config.recv_buffer_size, config.max_outbound_backlog);

            if self.connections.len() >= config.max_connections {
                warn!(peer = %peer, max = config.max_connections, "Lobby full, refusing connection");
                kick_and_close(&mut link, peer, LOBBY_FULL_REASON);
                continue;
            }

            self.next_connection_id += 1;
            let id = ConnectionId(self.next_connection_id);
            debug!(peer = %peer, id = id.0, "New connection");
            self.connections.insert(
                id,
                Connection {
                    id,
                    endpoint: peer,
                    name: None,
                    joined: false,
                    link,
                },
            );
        }
    }

    fn pump_connections(&mut self, now: u64) {
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for id in ids {
            let relays = match self.connections.get_mut(&id) {
                Some(conn) => conn.pump(&self.identity, now, &mut self.chat),
                None => continue,
            };
            for relay in relays {
                self.fan_out(&relay, Some(id));
            }
        }
    }

    /// Send to every joined connection except `except`
    fn fan_out(&mut self, packet: &Bytes, except: Option<ConnectionId>) {
        for conn in self.connections.values_mut() {
            if !conn.joined || !conn.link.is_open() || Some(conn.id) == except {
                continue;
            }
            if let Err(e) = conn.link.send_encoded(packet) {
                debug!(peer = %conn.endpoint, error = %e, "Relay failed, dropping connection");
            }
        }
    }

    /// Remove connections whose transport is gone
    fn reap(&mut self, now: u64) {
        let chat = &mut self.chat;
        self.connections.retain(|_, conn| {
            if conn.link.is_open() {
                return true;
            }
            match (&conn.name, conn.joined) {
                (Some(name), true) => {
                    info!(peer = %conn.endpoint, player = %name, "Peer left");
                    chat.push_back(ChatMessage::system(now, format!("{} left", name)));
                }
                _ => debug!(peer = %conn.endpoint, "Connection closed before joining"),
            }
            false
        });
    }
}

/// Hosts one LAN lobby session at a time
pub struct LobbyHost<T: Transport> {
    transport: T,
    config: LobbyConfig,
    clock: Box<dyn Clock>,
    ids: Box<dyn IdSource>,
    session: Option<Session<T>>,
}

impl<T: Transport> LobbyHost<T> {
    /// Host using the system monotonic clock and an entropy-seeded id source
    pub fn new(transport: T, config: LobbyConfig) -> Self {
        Self::with_services(transport, config, MonotonicClock::new(), RandomIds::new())
    }

    pub fn with_services(
        transport: T,
        config: LobbyConfig,
        clock: impl Clock + 'static,
        ids: impl IdSource + 'static,
    ) -> Self {
        Self {
            transport,
            config,
            clock: Box::new(clock),
            ids: Box::new(ids),
            session: None,
        }
    }

    /// Open the advertising and listening endpoints and start a new session.
    ///
    /// On failure nothing is kept: the host stays stopped.
    pub fn start(&mut self, settings: HostSettings) -> Result<()> {
        if self.session.is_some() {
            return Err(Error::AlreadyRunning);
        }
        if settings.privacy.requires_invite() && settings.invite_code.is_empty() {
            return Err(Error::InviteCodeRequired);
        }

        // Session id and port are fixed width, so placeholders give the final size
        let mut identity = Identity {
            session_id: SessionId(0),
            session_port: 0,
            settings,
        };
        let advertise_len = identity.advertise().encode().len();
        let max = self.config.recv_buffer_size.min(MAX_DATAGRAM_LEN);
        if advertise_len > max {
            return Err(Error::AdvertisementTooLarge {
                len: advertise_len,
                max,
            });
        }

        let advertiser = self.transport.bind_datagram(
            DatagramOptions::port(0)
                .broadcast(true)
                .reuse_address(true),
        )?;

        let backlog = self.config.listen_backlog;
        let listener = match self.transport.listen(self.config.session_port, backlog) {
            Ok(listener) => listener,
            Err(e) if self.config.session_port != 0 => {
                info!(
                    port = self.config.session_port,
                    error = %e,
                    "Default session port unavailable, using an ephemeral port"
                );
                self.transport.listen(0, backlog)?
            }
            Err(e) => return Err(e.into()),
        };
        identity.session_port = listener.local_endpoint()?.port;
        identity.session_id = SessionId(self.ids.random_u64());
        let now = self.clock.now_ms();

        info!(
            session = %identity.session_id,
            port = identity.session_port,
            lobby = %identity.settings.lobby_name,
            privacy = %identity.settings.privacy,
            "Lobby started"
        );

        let mut chat = VecDeque::new();
        chat.push_back(ChatMessage::system(now, "Lobby started"));

        self.session = Some(Session {
            identity,
            advertiser,
            listener,
            last_advertise_ms: None,
            connections: BTreeMap::new(),
            next_connection_id: 0,
            chat,
        });
        Ok(())
    }

    /// Close both endpoints, drop every connection and queued chat.
    /// Safe to call when not running.
    pub fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            info!(
                session = %session.identity.session_id,
                peers = session.connections.len(),
                "Lobby stopped"
            );
        }
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    /// Advertise, accept, pump every connection, reap closed ones
    pub fn advance(&mut self) {
        let now = self.clock.now_ms();
        let Some(session) = self.session.as_mut() else {
            return;
        };

        session.advertise(now, &self.config);
        session.accept_connections(&self.config);
        session.pump_connections(now);
        session.reap(now);
    }

    /// Post a chat line as the host. Always accepted while running.
    pub fn send_chat_from_host(&mut self, text: &str) -> Result<()> {
        let now = self.clock.now_ms();
        let session = self.session.as_mut().ok_or(Error::NotRunning)?;

        let msg = ChatMessage::new(now, session.identity.settings.display_name(), text);
        let packet = Packet::Chat(msg.clone()).encode();
        if packet.len() > MAX_FRAME_LEN {
            return Err(Error::FrameTooLarge {
                len: packet.len(),
                max: MAX_FRAME_LEN,
            });
        }

        session.chat.push_back(msg);
        session.fan_out(&packet, None);
        Ok(())
    }

    /// Oldest queued chat line
    pub fn pop_chat(&mut self) -> Option<ChatMessage> {
        self.session.as_mut()?.chat.pop_front()
    }

    pub fn drain_chat(&mut self) -> Vec<ChatMessage> {
        match self.session.as_mut() {
            Some(session) => session.chat.drain(..).collect(),
            None => Vec::new(),
        }
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.identity.session_id)
    }

    /// The port actually bound and advertised
    pub fn session_port(&self) -> Option<u16> {
        self.session.as_ref().map(|s| s.identity.session_port)
    }

    pub fn privacy(&self) -> Option<Privacy> {
        self.session.as_ref().map(|s| s.identity.settings.privacy)
    }

    pub fn invite_code(&self) -> Option<&str> {
        self.session
            .as_ref()
            .map(|s| s.identity.settings.invite_code.as_str())
    }

    pub fn lobby_name(&self) -> Option<&str> {
        self.session
            .as_ref()
            .map(|s| s.identity.settings.lobby_name.as_str())
    }

    /// Invite URL for joining without discovery, reachable at `address`
    pub fn invite_url(&self, address: Ipv4Addr) -> Option<InviteUrl> {
        self.session.as_ref().map(|s| {
            InviteUrl::new(
                Endpoint::new(address, s.identity.session_port),
                s.identity.session_id,
                s.identity.settings.invite_code.clone(),
            )
        })
    }

    /// Live connections, joined or not
    pub fn peers(&self) -> Vec<PeerSummary> {
        match &self.session {
            Some(session) => session
                .connections
                .values()
                .map(|c| PeerSummary {
                    id: c.id,
                    endpoint: c.endpoint,
                    name: c.name.clone(),
                    joined: c.joined,
                })
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.connections.len())
    }
}

impl<T: Transport> Drop for LobbyHost<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{write_frame, FrameDecoder};
    use crate::transport::{MemoryTransport, VirtualLan};
    use bytes::BytesMut;
    use lanlobby_core::{ManualClock, SequenceIds};

    const HOST_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 10);
    const PEER_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 20);
    const SESSION: SessionId = SessionId(0x5eed);

    type MemStream = <MemoryTransport as Transport>::Stream;

    fn host_on(lan: &VirtualLan, clock: &ManualClock) -> LobbyHost<MemoryTransport> {
        LobbyHost::with_services(
            lan.host(HOST_IP),
            LobbyConfig::default(),
            clock.clone(),
            SequenceIds::starting_at(SESSION.0),
        )
    }

    /// A hand-driven stream peer speaking raw frames
    struct RawPeer {
        stream: MemStream,
        decoder: FrameDecoder,
    }

    impl RawPeer {
        fn connect(lan: &VirtualLan, host: &LobbyHost<MemoryTransport>) -> Self {
            let port = host.session_port().unwrap();
            let stream = lan
                .host(PEER_IP)
                .connect(Endpoint::new(HOST_IP, port))
                .unwrap();
            Self {
                stream,
                decoder: FrameDecoder::new(),
            }
        }

        fn send_raw(&mut self, bytes: &[u8]) {
            assert_eq!(self.stream.send(bytes).unwrap(), Attempt::Ready(bytes.len()));
        }

        fn send(&mut self, packet: &Packet) {
            let mut buf = BytesMut::new();
            write_frame(&mut buf, &packet.encode()).unwrap();
            self.send_raw(&buf);
        }

        fn hello(&mut self, name: &str, code: &str) {
            self.send(&Packet::Hello(Hello {
                session_id: SESSION,
                player_name: name.to_string(),
                invite_code: code.to_string(),
            }));
        }

        /// Everything received so far; `None` once the host closed the stream
        fn received(&mut self) -> Option<Vec<Packet>> {
            let mut buf = [0u8; 4096];
            let mut closed = false;
            loop {
                match self.stream.recv(&mut buf) {
                    Ok(Attempt::Ready(0)) | Err(_) => {
                        closed = true;
                        break;
                    }
                    Ok(Attempt::Ready(n)) => self.decoder.extend(&buf[..n]),
                    Ok(Attempt::WouldBlock) => break,
                }
            }
            let mut packets = Vec::new();
            while let Some(frame) = self.decoder.next_frame().unwrap() {
                packets.push(Packet::decode(&frame).unwrap());
            }
            if closed && packets.is_empty() {
                None
            } else {
                Some(packets)
            }
        }

        fn is_closed(&mut self) -> bool {
            let mut buf = [0u8; 1];
            matches!(self.stream.recv(&mut buf), Ok(Attempt::Ready(0)) | Err(_))
        }
    }

    fn chat(from: &str, text: &str) -> Packet {
        Packet::Chat(ChatMessage::new(77, from, text))
    }

    #[test]
    fn test_start_binds_default_port_and_seeds_chat() {
        let lan = VirtualLan::new();
        let clock = ManualClock::new(0);
        let mut host = host_on(&lan, &clock);

        host.start(HostSettings::open("lobby", "alice")).unwrap();
        assert!(host.is_running());
        assert_eq!(host.session_port(), Some(26368));
        assert_eq!(host.session_id(), Some(SESSION));
        assert_eq!(host.pop_chat().unwrap().text, "Lobby started");
        assert!(host.pop_chat().is_none());
    }

    #[test]
    fn test_start_falls_back_to_ephemeral_port() {
        let lan = VirtualLan::new();
        let _squatter = lan.host(HOST_IP).listen(26368, 8).unwrap();
        let clock = ManualClock::new(0);
        let mut host = host_on(&lan, &clock);

        host.start(HostSettings::open("lobby", "alice")).unwrap();
        let port = host.session_port().unwrap();
        assert_ne!(port, 26368);
        assert_ne!(port, 0);
    }

    #[test]
    fn test_invite_only_without_code_fails_cleanly() {
        let lan = VirtualLan::new();
        let clock = ManualClock::new(0);
        let mut host = host_on(&lan, &clock);

        let err = host
            .start(HostSettings::invite_only("lobby", "alice", ""))
            .unwrap_err();
        assert!(matches!(err, Error::InviteCodeRequired));
        assert!(!host.is_running());
        assert_eq!(host.session_port(), None);

        // Nothing was left bound
        assert!(lan.host(HOST_IP).listen(26368, 8).is_ok());
    }

    #[test]
    fn test_second_start_rejected() {
        let lan = VirtualLan::new();
        let clock = ManualClock::new(0);
        let mut host = host_on(&lan, &clock);
        host.start(HostSettings::open("lobby", "alice")).unwrap();
        assert!(matches!(
            host.start(HostSettings::open("again", "alice")),
            Err(Error::AlreadyRunning)
        ));
    }

    #[test]
    fn test_stop_is_idempotent_and_resets_identity() {
        let lan = VirtualLan::new();
        let clock = ManualClock::new(0);
        let mut host = host_on(&lan, &clock);
        host.start(HostSettings::open("lobby", "alice")).unwrap();
        let mut peer = RawPeer::connect(&lan, &host);
        host.advance();

        host.stop();
        host.stop();
        assert!(!host.is_running());
        assert_eq!(host.session_id(), None);
        assert_eq!(host.session_port(), None);
        assert!(host.pop_chat().is_none());
        assert!(peer.is_closed());
        assert!(matches!(host.send_chat_from_host("hi"), Err(Error::NotRunning)));
    }

    #[test]
    fn test_advertise_cadence() {
        let lan = VirtualLan::new();
        let clock = ManualClock::new(5_000);
        let mut host = host_on(&lan, &clock);
        let listener = lan
            .host(PEER_IP)
            .bind_datagram(DatagramOptions::port(26367))
            .unwrap();
        host.start(HostSettings::open("lobby", "alice")).unwrap();

        let mut buf = [0u8; 1024];
        let mut count = || {
            let mut n = 0;
            while let Attempt::Ready((len, _)) = listener.recv_from(&mut buf).unwrap() {
                let packet = Packet::decode(&buf[..len]).unwrap();
                assert!(matches!(packet, Packet::Advertise(ref a) if a.session_port == 26368));
                n += 1;
            }
            n
        };

        host.advance();
        assert_eq!(count(), 1);

        clock.advance(999);
        host.advance();
        assert_eq!(count(), 0);

        clock.advance(1);
        host.advance();
        host.advance();
        assert_eq!(count(), 1);
    }

    #[test]
    fn test_open_lobby_join() {
        let lan = VirtualLan::new();
        let clock = ManualClock::new(0);
        let mut host = host_on(&lan, &clock);
        host.start(HostSettings::open("lobby", "alice")).unwrap();
        host.drain_chat();

        let mut peer = RawPeer::connect(&lan, &host);
        peer.hello("bob", "");
        host.advance();

        let got = peer.received().unwrap();
        assert_eq!(
            got,
            vec![Packet::HelloAck(HelloAck {
                session_id: SESSION,
                lobby_name: "lobby".to_string(),
                host_player_name: "alice".to_string(),
                privacy: Privacy::Open,
            })]
        );
        assert_eq!(host.pop_chat().unwrap().text, "bob joined");

        let peers = host.peers();
        assert_eq!(peers.len(), 1);
        assert!(peers[0].joined);
        assert_eq!(peers[0].name.as_deref(), Some("bob"));
    }

    #[test]
    fn test_invite_enforcement() {
        for wrong in ["", "XYZ"] {
            let lan = VirtualLan::new();
            let clock = ManualClock::new(0);
            let mut host = host_on(&lan, &clock);
            host.start(HostSettings::invite_only("lobby", "alice", "ABC"))
                .unwrap();

            let mut peer = RawPeer::connect(&lan, &host);
            peer.hello("mallory", wrong);
            host.advance();

            let got = peer.received().unwrap();
            match got.as_slice() {
                [Packet::Kick(kick)] => assert!(!kick.reason.is_empty()),
                other => panic!("expected a kick, got {:?}", other),
            }
            assert!(peer.is_closed());
            assert_eq!(host.connection_count(), 0);
        }

        let lan = VirtualLan::new();
        let clock = ManualClock::new(0);
        let mut host = host_on(&lan, &clock);
        host.start(HostSettings::invite_only("lobby", "alice", "ABC"))
            .unwrap();
        let mut peer = RawPeer::connect(&lan, &host);
        peer.hello("bob", "ABC");
        host.advance();

        assert!(matches!(
            peer.received().unwrap().as_slice(),
            [Packet::HelloAck(_)]
        ));
        assert!(host.peers()[0].joined);
    }

    #[test]
    fn test_session_mismatch_closes_silently() {
        let lan = VirtualLan::new();
        let clock = ManualClock::new(0);
        let mut host = host_on(&lan, &clock);
        host.start(HostSettings::open("lobby", "alice")).unwrap();

        let mut peer = RawPeer::connect(&lan, &host);
        peer.send(&Packet::Hello(Hello {
            session_id: SessionId(1),
            player_name: "stranger".to_string(),
            invite_code: String::new(),
        }));
        host.advance();

        assert_eq!(peer.received(), None);
        assert_eq!(host.connection_count(), 0);
    }

    #[test]
    fn test_malformed_hello_closes() {
        let lan = VirtualLan::new();
        let clock = ManualClock::new(0);
        let mut host = host_on(&lan, &clock);
        host.start(HostSettings::open("lobby", "alice")).unwrap();

        let mut peer = RawPeer::connect(&lan, &host);
        let hello = Packet::Hello(Hello {
            session_id: SESSION,
            player_name: "bob".to_string(),
            invite_code: String::new(),
        })
        .encode();
        let mut buf = BytesMut::new();
        write_frame(&mut buf, &hello[..hello.len() - 2]).unwrap();
        peer.send_raw(&buf);
        host.advance();

        assert_eq!(host.connection_count(), 0);
    }

    #[test]
    fn test_chat_before_join_ignored() {
        let lan = VirtualLan::new();
        let clock = ManualClock::new(0);
        let mut host = host_on(&lan, &clock);
        host.start(HostSettings::open("lobby", "alice")).unwrap();
        host.drain_chat();

        let mut peer = RawPeer::connect(&lan, &host);
        peer.send(&chat("sneaky", "let me in"));
        host.advance();

        assert!(host.pop_chat().is_none());
        assert_eq!(host.connection_count(), 1);
        assert!(!host.peers()[0].joined);
    }

    #[test]
    fn test_bad_header_does_not_close() {
        let lan = VirtualLan::new();
        let clock = ManualClock::new(0);
        let mut host = host_on(&lan, &clock);
        host.start(HostSettings::open("lobby", "alice")).unwrap();

        let mut peer = RawPeer::connect(&lan, &host);
        let mut foreign = Packet::Hello(Hello {
            session_id: SESSION,
            player_name: "bob".to_string(),
            invite_code: String::new(),
        })
        .encode()
        .to_vec();
        foreign[0] ^= 0xff;
        let mut buf = BytesMut::new();
        write_frame(&mut buf, &foreign).unwrap();
        peer.send_raw(&buf);

        let mut versioned = foreign.clone();
        versioned[0] ^= 0xff;
        versioned[4..8].copy_from_slice(&9u32.to_be_bytes());
        let mut buf = BytesMut::new();
        write_frame(&mut buf, &versioned).unwrap();
        peer.send_raw(&buf);
        host.advance();

        assert_eq!(host.connection_count(), 1);
        assert!(!host.peers()[0].joined);

        // The same connection can still join afterwards
        peer.hello("bob", "");
        host.advance();
        assert!(host.peers()[0].joined);
    }

    #[test]
    fn test_oversized_frame_closes() {
        let lan = VirtualLan::new();
        let clock = ManualClock::new(0);
        let mut host = host_on(&lan, &clock);
        host.start(HostSettings::open("lobby", "alice")).unwrap();

        let mut peer = RawPeer::connect(&lan, &host);
        peer.send_raw(&65537u32.to_le_bytes());
        host.advance();

        assert_eq!(host.connection_count(), 0);
        assert!(peer.is_closed());
    }

    #[test]
    fn test_zero_length_frame_closes() {
        let lan = VirtualLan::new();
        let clock = ManualClock::new(0);
        let mut host = host_on(&lan, &clock);
        host.start(HostSettings::open("lobby", "alice")).unwrap();

        let mut peer = RawPeer::connect(&lan, &host);
        peer.send_raw(&[0, 0, 0, 0]);
        host.advance();

        assert_eq!(host.connection_count(), 0);
    }

    #[test]
    fn test_hello_split_across_advances() {
        let lan = VirtualLan::new();
        let clock = ManualClock::new(0);
        let mut host = host_on(&lan, &clock);
        host.start(HostSettings::open("lobby", "alice")).unwrap();

        let mut peer = RawPeer::connect(&lan, &host);
        let mut buf = BytesMut::new();
        let hello = Packet::Hello(Hello {
            session_id: SESSION,
            player_name: "bob".to_string(),
            invite_code: String::new(),
        });
        write_frame(&mut buf, &hello.encode()).unwrap();

        for byte in buf.iter() {
            peer.send_raw(&[*byte]);
            host.advance();
        }
        assert!(host.peers()[0].joined);
    }

    #[test]
    fn test_peer_departure_is_announced() {
        let lan = VirtualLan::new();
        let clock = ManualClock::new(0);
        let mut host = host_on(&lan, &clock);
        host.start(HostSettings::open("lobby", "alice")).unwrap();

        let mut peer = RawPeer::connect(&lan, &host);
        peer.hello("bob", "");
        host.advance();
        host.drain_chat();

        drop(peer);
        host.advance();
        assert_eq!(host.connection_count(), 0);
        assert_eq!(host.pop_chat().unwrap().text, "bob left");
    }

    #[test]
    fn test_host_chat_reaches_joined_peers_only() {
        let lan = VirtualLan::new();
        let clock = ManualClock::new(0);
        let mut host = host_on(&lan, &clock);
        host.start(HostSettings::open("lobby", "")).unwrap();
        host.drain_chat();

        let mut joined = RawPeer::connect(&lan, &host);
        joined.hello("bob", "");
        let mut lurker = RawPeer::connect(&lan, &host);
        host.advance();
        joined.received();

        clock.set(1234);
        host.send_chat_from_host("welcome").unwrap();

        assert_eq!(joined.received().unwrap(), vec![chat_at(1234, "host", "welcome")]);
        assert!(lurker.received().unwrap().is_empty());

        let lines = host.drain_chat();
        assert_eq!(lines.last().unwrap().from, "host");
    }

    fn chat_at(ts: u64, from: &str, text: &str) -> Packet {
        Packet::Chat(ChatMessage::new(ts, from, text))
    }

    #[test]
    fn test_relay_skips_sender() {
        let lan = VirtualLan::new();
        let clock = ManualClock::new(0);
        let mut host = host_on(&lan, &clock);
        host.start(HostSettings::open("lobby", "alice")).unwrap();

        let mut a = RawPeer::connect(&lan, &host);
        let mut b = RawPeer::connect(&lan, &host);
        a.hello("a", "");
        b.hello("b", "");
        host.advance();
        a.received();
        b.received();
        host.drain_chat();

        a.send(&chat("a", "hi all"));
        host.advance();

        assert_eq!(b.received().unwrap(), vec![chat("a", "hi all")]);
        assert!(a.received().unwrap().is_empty());
        assert_eq!(host.pop_chat().unwrap(), ChatMessage::new(77, "a", "hi all"));
    }

    #[test]
    fn test_capacity_limit_kicks_newcomers() {
        let lan = VirtualLan::new();
        let clock = ManualClock::new(0);
        let config = LobbyConfig {
            max_connections: 1,
            ..LobbyConfig::default()
        };
        let mut host = LobbyHost::with_services(
            lan.host(HOST_IP),
            config,
            clock.clone(),
            SequenceIds::starting_at(SESSION.0),
        );
        host.start(HostSettings::open("lobby", "alice")).unwrap();

        let _first = RawPeer::connect(&lan, &host);
        let mut second = RawPeer::connect(&lan, &host);
        host.advance();

        assert_eq!(host.connection_count(), 1);
        assert_eq!(
            second.received().unwrap(),
            vec![Packet::Kick(Kick {
                reason: "Lobby is full".to_string()
            })]
        );
    }

    #[test]
    fn test_oversized_advertisement_rejected() {
        let lan = VirtualLan::new();
        let clock = ManualClock::new(0);
        let mut host = host_on(&lan, &clock);

        let err = host
            .start(HostSettings::open("x".repeat(5000), "hal"))
            .unwrap_err();
        match err {
            Error::AdvertisementTooLarge { len, max } => {
                assert!(len > 5000);
                assert_eq!(max, 4096);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(!host.is_running());
        assert!(lan.host(HOST_IP).listen(26368, 8).is_ok());

        // A name that fits is still discoverable
        let browser = lan
            .host(PEER_IP)
            .bind_datagram(DatagramOptions::port(26367))
            .unwrap();
        host.start(HostSettings::open("x".repeat(4000), "hal")).unwrap();
        host.advance();
        let mut buf = [0u8; 4096];
        let (len, _) = browser.recv_from(&mut buf).unwrap().ready().unwrap();
        assert!(matches!(Packet::decode(&buf[..len]).unwrap(), Packet::Advertise(_)));
    }

    #[test]
    fn test_reserved_player_name_kicked() {
        let lan = VirtualLan::new();
        let clock = ManualClock::new(0);
        let mut host = host_on(&lan, &clock);
        host.start(HostSettings::open("lobby", "alice")).unwrap();
        host.drain_chat();

        let mut peer = RawPeer::connect(&lan, &host);
        peer.hello("system", "");
        host.advance();

        assert_eq!(
            peer.received().unwrap(),
            vec![Packet::Kick(Kick {
                reason: "Player name is reserved".to_string()
            })]
        );
        assert!(peer.is_closed());
        assert_eq!(host.connection_count(), 0);
        assert!(host.pop_chat().is_none());
    }

    #[test]
    fn test_chat_sender_is_handshake_name() {
        let lan = VirtualLan::new();
        let clock = ManualClock::new(0);
        let mut host = host_on(&lan, &clock);
        host.start(HostSettings::open("lobby", "alice")).unwrap();

        let mut a = RawPeer::connect(&lan, &host);
        let mut b = RawPeer::connect(&lan, &host);
        a.hello("a", "");
        b.hello("b", "");
        host.advance();
        a.received();
        b.received();
        host.drain_chat();

        a.send(&chat("system", "alice left"));
        host.advance();

        assert_eq!(b.received().unwrap(), vec![chat("a", "alice left")]);
        let logged = host.pop_chat().unwrap();
        assert_eq!(logged.from, "a");
        assert!(!logged.is_system());
    }

    #[test]
    fn test_host_named_system_posts_as_host() {
        let lan = VirtualLan::new();
        let clock = ManualClock::new(0);
        let mut host = host_on(&lan, &clock);
        host.start(HostSettings::open("lobby", "system")).unwrap();
        host.drain_chat();

        host.send_chat_from_host("hi").unwrap();
        assert_eq!(host.pop_chat().unwrap().from, "host");
    }

    #[test]
    fn test_partly_sent_kick_still_closes() {
        let lan = VirtualLan::new();
        let clock = ManualClock::new(0);
        let mut host = host_on(&lan, &clock);
        host.start(HostSettings::invite_only("lobby", "alice", "ABC"))
            .unwrap();

        let mut peer = RawPeer::connect(&lan, &host);
        peer.hello("mallory", "XYZ");
        lan.set_pipe_capacity(Some(6));
        host.advance();

        assert_eq!(host.connection_count(), 0);
        let mut buf = [0u8; 64];
        assert_eq!(peer.stream.recv(&mut buf).unwrap(), Attempt::Ready(6));
        assert!(peer.is_closed());
    }

    #[test]
    fn test_invite_url_carries_session() {
        let lan = VirtualLan::new();
        let clock = ManualClock::new(0);
        let mut host = host_on(&lan, &clock);
        assert!(host.invite_url(HOST_IP).is_none());

        host.start(HostSettings::invite_only("lobby", "alice", "ABC"))
            .unwrap();
        let url = host.invite_url(HOST_IP).unwrap();
        assert_eq!(url.endpoint, Endpoint::new(HOST_IP, 26368));
        assert_eq!(url.session_id, SESSION);
        assert_eq!(url.invite_code, "ABC");
    }
}
