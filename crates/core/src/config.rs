//! Lobby configuration
//!
//! Loaded from an optional TOML file. Every field has a default, so an
//! empty file (or no file) yields the stock LAN settings.

use std::net::Ipv4Addr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Well-known UDP port lobbies are advertised on
pub const DEFAULT_DISCOVERY_PORT: u16 = 26367;

/// Stream port a host tries first
pub const DEFAULT_SESSION_PORT: u16 = 26368;

/// Tunables for host and client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LobbyConfig {
    pub discovery_port: u16,
    /// Preferred session port; an OS-assigned port is used if it is taken
    pub session_port: u16,
    pub broadcast_address: Ipv4Addr,
    pub advertise_interval_ms: u64,
    /// Size of the single bounded read done per socket per advance
    pub recv_buffer_size: usize,
    pub max_connections: usize,
    pub listen_backlog: i32,
    /// Unsent bytes a stream may queue before it is considered stalled
    pub max_outbound_backlog: usize,
    pub max_datagrams_per_advance: usize,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            discovery_port: DEFAULT_DISCOVERY_PORT,
            session_port: DEFAULT_SESSION_PORT,
            broadcast_address: Ipv4Addr::BROADCAST,
            advertise_interval_ms: 1000,
            recv_buffer_size: 4096,
            max_connections: 32,
            listen_backlog: 8,
            max_outbound_backlog: 1024 * 1024,
            max_datagrams_per_advance: 256,
        }
    }
}

impl LobbyConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: LobbyConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "Loaded lobby config");
        Ok(config)
    }

    /// Load from a file if it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.discovery_port == 0 {
            return Err(Error::InvalidConfig("discovery_port must not be 0".into()));
        }
        if self.recv_buffer_size == 0 {
            return Err(Error::InvalidConfig("recv_buffer_size must be positive".into()));
        }
        if self.max_connections == 0 {
            return Err(Error::InvalidConfig("max_connections must be positive".into()));
        }
        if self.listen_backlog <= 0 {
            return Err(Error::InvalidConfig("listen_backlog must be positive".into()));
        }
        if self.max_datagrams_per_advance == 0 {
            return Err(Error::InvalidConfig(
                "max_datagrams_per_advance must be positive".into(),
            ));
        }
        if self.max_outbound_backlog < 64 * 1024 {
            return Err(Error::InvalidConfig(format!(
                "max_outbound_backlog must hold at least one full frame (got {})",
                self.max_outbound_backlog
            )));
        }
        Ok(())
    }
}
