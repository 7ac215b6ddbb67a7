//! Session identity and advertisement models

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::Endpoint;

/// Random 64-bit identity of one hosted lobby session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl SessionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() || s.len() > 16 {
            return Err(Error::InvalidSessionId(s.to_string()));
        }
        u64::from_str_radix(s, 16)
            .map(SessionId)
            .map_err(|_| Error::InvalidSessionId(s.to_string()))
    }
}

/// Who may join a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Privacy {
    #[default]
    Open = 0,
    /// Joining requires the host's invite code
    InviteOnly = 1,
}

impl Privacy {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn requires_invite(self) -> bool {
        self == Privacy::InviteOnly
    }
}

impl TryFrom<u8> for Privacy {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, u8> {
        match value {
            0 => Ok(Privacy::Open),
            1 => Ok(Privacy::InviteOnly),
            other => Err(other),
        }
    }
}

impl fmt::Display for Privacy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Privacy::Open => write!(f, "Open"),
            Privacy::InviteOnly => write!(f, "Invite only"),
        }
    }
}

/// A lobby seen through discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAdvertisement {
    pub session_id: SessionId,
    pub lobby_name: String,
    pub host_player_name: String,
    pub privacy: Privacy,
    /// Stream port the host actually bound (not necessarily the default)
    pub session_port: u16,
    pub protocol_version: u32,
    /// Network source of the advertisement datagram
    pub source: Endpoint,
}

impl SessionAdvertisement {
    /// Where a client should open its stream connection
    pub fn session_endpoint(&self) -> Endpoint {
        self.source.with_port(self.session_port)
    }

    /// Same session reached through the same endpoint
    pub fn same_lobby(&self, other: &SessionAdvertisement) -> bool {
        self.session_id == other.session_id && self.session_endpoint() == other.session_endpoint()
    }
}

/// Merge a drained discovery batch into a caller-held list.
///
/// Repeated sightings refresh the stored entry instead of duplicating it.
/// Returns true if the list changed.
pub fn merge_discovered(
    known: &mut Vec<SessionAdvertisement>,
    incoming: impl IntoIterator<Item = SessionAdvertisement>,
) -> bool {
    let mut changed = false;
    for item in incoming {
        match known.iter_mut().find(|existing| existing.same_lobby(&item)) {
            Some(existing) => {
                if *existing != item {
                    *existing = item;
                    changed = true;
                }
            }
            None => {
                known.push(item);
                changed = true;
            }
        }
    }
    changed
}
