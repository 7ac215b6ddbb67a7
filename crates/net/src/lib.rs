//! LAN Lobby Network Library
//!
//! Discovery and chat for games on a local network, with no central server.
//!
//! # Architecture
//!
//! - **Host**: advertises a session over UDP broadcast, accepts stream peers,
//!   checks the Hello handshake and relays chat
//! - **Client**: listens for advertisements and joins one host
//! - **Protocol**: binary packets with a magic/version header; stream packets
//!   carry a little-endian length prefix
//! - **Transport**: real sockets or an in-process virtual LAN
//!
//! Nothing here spawns threads or blocks. The application calls `advance`
//! on each side at a steady cadence.
//!
//! # Usage
//!
//! ```ignore
//! let mut host = LobbyHost::new(SystemTransport::new(), LobbyConfig::default());
//! host.start(HostSettings::open("Friday night", "alice"))?;
//!
//! let mut client = LobbyClient::new(SystemTransport::new(), LobbyConfig::default());
//! client.start_discovery()?;
//!
//! loop {
//!     host.advance();
//!     client.advance();
//!     for ad in client.drain_discovered() {
//!         client.connect(&ad, "bob", "")?;
//!     }
//!     while let Some(line) = client.pop_chat() { /* display */ }
//! }
//! ```

pub mod client;
pub mod error;
pub mod frame;
pub mod host;
pub mod invite;
pub mod link;
pub mod protocol;
pub mod transport;

pub use client::{ConnectionState, JoinTarget, JoinedSession, LobbyClient};
pub use error::{Error, Result};
pub use host::{ConnectionId, HostSettings, LobbyHost, PeerSummary};
pub use invite::InviteUrl;
pub use protocol::{Packet, PROTOCOL_VERSION};
pub use transport::{MemoryTransport, SystemTransport, Transport, VirtualLan};

pub use lanlobby_core::config::{DEFAULT_DISCOVERY_PORT, DEFAULT_SESSION_PORT};
