//! Lobby client
//!
//! Two independent halves: discovery listens for host advertisements on the
//! well-known datagram port, and the connection half joins one host over a
//! stream and exchanges chat with it. Both are driven by [`LobbyClient::advance`].

use std::collections::VecDeque;

use lanlobby_core::{
    ChatMessage, Clock, Endpoint, LobbyConfig, MonotonicClock, Privacy, SessionAdvertisement,
    SessionId,
};
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::frame::MAX_FRAME_LEN;
use crate::invite::InviteUrl;
use crate::link::{RecvOutcome, StreamLink};
use crate::protocol::{Advertise, Hello, HelloAck, Packet, PROTOCOL_VERSION};
use crate::transport::{Attempt, DatagramOptions, DatagramSocket, StreamSocket, Transport};

/// Name sent when the player did not give one
const DEFAULT_PLAYER_NAME: &str = "player";

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Stream opened and Hello queued, no HelloAck yet
    Connecting,
    /// HelloAck received
    Connected,
}

/// Where to join and which session to ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinTarget {
    pub endpoint: Endpoint,
    pub session_id: SessionId,
}

impl From<&SessionAdvertisement> for JoinTarget {
    fn from(ad: &SessionAdvertisement) -> Self {
        Self {
            endpoint: ad.session_endpoint(),
            session_id: ad.session_id,
        }
    }
}

impl From<&InviteUrl> for JoinTarget {
    fn from(invite: &InviteUrl) -> Self {
        Self {
            endpoint: invite.endpoint,
            session_id: invite.session_id,
        }
    }
}

/// Session metadata from the host's HelloAck
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedSession {
    pub session_id: SessionId,
    pub lobby_name: String,
    pub host_player_name: String,
    pub privacy: Privacy,
    pub endpoint: Endpoint,
}

struct Discovery<D> {
    socket: D,
    found: Vec<SessionAdvertisement>,
    buf: Vec<u8>,
}

impl<D: DatagramSocket> Discovery<D> {
    fn drain_socket(&mut self, max_datagrams: usize) {
        for _ in 0..max_datagrams {
            let (len, source) = match self.socket.recv_from(&mut self.buf) {
                Ok(Attempt::Ready(received)) => received,
                Ok(Attempt::WouldBlock) => return,
                Err(e) => {
                    debug!(error = %e, "Discovery receive failed");
                    return;
                }
            };

            match Packet::decode(&self.buf[..len]) {
                Ok(Packet::Advertise(ad)) => {
                    trace!(source = %source, session = %ad.session_id, "Advertisement");
                    self.found.push(advertisement(ad, source));
                }
                Ok(other) => {
                    debug!(source = %source, kind = ?other.message_type(), "Ignoring non-advertise datagram");
                }
                Err(e) => debug!(source = %source, error = %e, "Dropping foreign datagram"),
            }
        }
    }
}

fn advertisement(ad: Advertise, source: Endpoint) -> SessionAdvertisement {
    SessionAdvertisement {
        session_id: ad.session_id,
        lobby_name: ad.lobby_name,
        host_player_name: ad.host_player_name,
        privacy: ad.privacy,
        session_port: ad.session_port,
        protocol_version: PROTOCOL_VERSION,
        source,
    }
}

/// How an advance ended the session
enum Teardown {
    /// Host sent Kick; chat log is kept so the reason stays visible
    Kicked,
    /// Transport or framing failure
    Lost,
}

struct Session<S> {
    target: JoinTarget,
    player_name: String,
    link: StreamLink<S>,
    joined: Option<JoinedSession>,
}

impl<S: StreamSocket> Session<S> {
    fn pump(&mut self, now: u64, chat: &mut VecDeque<ChatMessage>) -> Option<Teardown> {
        if self.link.flush().is_err() {
            return Some(Teardown::Lost);
        }

        match self.link.receive() {
            RecvOutcome::Idle => return None,
            RecvOutcome::Closed => return Some(Teardown::Lost),
            RecvOutcome::Received(n) => trace!(bytes = n, "Received"),
        }

        loop {
            let frame = match self.link.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => return None,
                Err(e) => {
                    warn!(host = %self.target.endpoint, error = %e, "Framing violation from host");
                    return Some(Teardown::Lost);
                }
            };

            let packet = match Packet::decode(&frame) {
                Ok(packet) => packet,
                Err(e) => {
                    debug!(host = %self.target.endpoint, error = %e, "Dropping malformed packet");
                    continue;
                }
            };

            match packet {
                Packet::HelloAck(ack) => {
                    if !self.handle_ack(ack) {
                        return Some(Teardown::Lost);
                    }
                }
                Packet::Chat(msg) => chat.push_back(msg),
                Packet::Kick(kick) => {
                    info!(host = %self.target.endpoint, reason = %kick.reason, "Kicked from lobby");
                    chat.push_back(ChatMessage::system(now, format!("Kicked: {}", kick.reason)));
                    return Some(Teardown::Kicked);
                }
                Packet::Advertise(_) | Packet::Hello(_) => {
                    debug!(host = %self.target.endpoint, "Ignoring unexpected message type");
                }
            }
        }
    }

    /// False when the ack names another session; the caller drops the stream
    fn handle_ack(&mut self, ack: HelloAck) -> bool {
        if ack.session_id != self.target.session_id {
            warn!(expected = %self.target.session_id, got = %ack.session_id, "HelloAck for another session");
            return false;
        }

        info!(lobby = %ack.lobby_name, host = %ack.host_player_name, "Joined lobby");
        self.joined = Some(JoinedSession {
            session_id: ack.session_id,
            lobby_name: ack.lobby_name,
            host_player_name: ack.host_player_name,
            privacy: ack.privacy,
            endpoint: self.target.endpoint,
        });
        true
    }
}

/// Finds and joins LAN lobbies
pub struct LobbyClient<T: Transport> {
    transport: T,
    config: LobbyConfig,
    clock: Box<dyn Clock>,
    discovery: Option<Discovery<T::Datagram>>,
    session: Option<Session<T::Stream>>,
    chat: VecDeque<ChatMessage>,
}

impl<T: Transport> LobbyClient<T> {
    pub fn new(transport: T, config: LobbyConfig) -> Self {
        Self::with_clock(transport, config, MonotonicClock::new())
    }

    pub fn with_clock(transport: T, config: LobbyConfig, clock: impl Clock + 'static) -> Self {
        Self {
            transport,
            config,
            clock: Box::new(clock),
            discovery: None,
            session: None,
            chat: VecDeque::new(),
        }
    }

    // --- Discovery ---

    /// Listen for advertisements. Does nothing if already listening.
    pub fn start_discovery(&mut self) -> Result<()> {
        if self.discovery.is_some() {
            return Ok(());
        }

        let socket = self.transport.bind_datagram(
            DatagramOptions::port(self.config.discovery_port).reuse_address(true),
        )?;
        info!(port = self.config.discovery_port, "Discovery started");

        self.discovery = Some(Discovery {
            socket,
            found: Vec::new(),
            buf: vec![0u8; self.config.recv_buffer_size.max(1)],
        });
        Ok(())
    }

    /// Close the discovery endpoint and forget undrained advertisements
    pub fn stop_discovery(&mut self) {
        if self.discovery.take().is_some() {
            info!("Discovery stopped");
        }
    }

    pub fn is_discovering(&self) -> bool {
        self.discovery.is_some()
    }

    pub fn advance_discovery(&mut self) {
        if let Some(discovery) = self.discovery.as_mut() {
            discovery.drain_socket(self.config.max_datagrams_per_advance);
        }
    }

    /// Advertisements seen since the last drain, repeats included
    pub fn drain_discovered(&mut self) -> Vec<SessionAdvertisement> {
        match self.discovery.as_mut() {
            Some(discovery) => std::mem::take(&mut discovery.found),
            None => Vec::new(),
        }
    }

    // --- Connection ---

    /// Open a stream to `target` and queue the Hello.
    ///
    /// Returns once the Hello is queued; the handshake completes over later
    /// advances. Any current session is dropped first.
    pub fn connect(
        &mut self,
        target: impl Into<JoinTarget>,
        player_name: &str,
        invite_code: &str,
    ) -> Result<()> {
        let target = target.into();
        self.disconnect();

        info!(host = %target.endpoint, session = %target.session_id, "Connecting to lobby");
        let stream = self.transport.connect(target.endpoint)?;
        let mut link = StreamLink::new(
            stream,
            self.config.recv_buffer_size,
            self.config.max_outbound_backlog,
        );

        let player_name = if player_name.is_empty() {
            DEFAULT_PLAYER_NAME.to_string()
        } else {
            player_name.to_string()
        };

        link.send_packet(&Packet::Hello(Hello {
            session_id: target.session_id,
            player_name: player_name.clone(),
            invite_code: invite_code.to_string(),
        }))?;

        self.session = Some(Session {
            target,
            player_name,
            link,
            joined: None,
        });
        Ok(())
    }

    /// Close the stream and clear the chat log. Safe when not connected.
    pub fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            info!(host = %session.target.endpoint, "Disconnected");
        }
        self.chat.clear();
    }

    /// True from `connect` until disconnect, kick or connection loss
    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn connection_state(&self) -> ConnectionState {
        match &self.session {
            None => ConnectionState::Disconnected,
            Some(session) if session.joined.is_none() => ConnectionState::Connecting,
            Some(_) => ConnectionState::Connected,
        }
    }

    /// Metadata from the host's HelloAck, once received
    pub fn session(&self) -> Option<&JoinedSession> {
        self.session.as_ref()?.joined.as_ref()
    }

    pub fn target(&self) -> Option<JoinTarget> {
        self.session.as_ref().map(|s| s.target)
    }

    pub fn player_name(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.player_name.as_str())
    }

    pub fn advance_connection(&mut self) {
        let now = self.clock.now_ms();
        let Some(session) = self.session.as_mut() else {
            return;
        };

        match session.pump(now, &mut self.chat) {
            None => {}
            Some(Teardown::Kicked) => {
                self.session = None;
            }
            Some(Teardown::Lost) => {
                warn!(host = %session.target.endpoint, "Lost connection to lobby");
                self.disconnect();
            }
        }
    }

    /// Send a chat line and append it to the local log.
    /// Does nothing when not connected.
    pub fn send_chat(&mut self, text: &str) -> Result<()> {
        let now = self.clock.now_ms();
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };

        let msg = ChatMessage::new(now, session.player_name.as_str(), text);
        let packet = Packet::Chat(msg.clone()).encode();
        if packet.len() > MAX_FRAME_LEN {
            return Err(Error::FrameTooLarge {
                len: packet.len(),
                max: MAX_FRAME_LEN,
            });
        }

        if let Err(e) = session.link.send_encoded(&packet) {
            warn!(error = %e, "Chat send failed, dropping connection");
            self.disconnect();
            return Err(e);
        }

        self.chat.push_back(msg);
        Ok(())
    }

    pub fn pop_chat(&mut self) -> Option<ChatMessage> {
        self.chat.pop_front()
    }

    pub fn drain_chat(&mut self) -> Vec<ChatMessage> {
        self.chat.drain(..).collect()
    }

    /// Advance discovery, then the connection
    pub fn advance(&mut self) {
        self.advance_discovery();
        self.advance_connection();
    }
}
