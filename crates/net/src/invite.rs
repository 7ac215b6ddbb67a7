//! Invite URL generation and parsing
//!
//! Invite format: lanlobby://<ipv4>:<port>/<session-id>/<invite-code>
//!
//! The session id is the 16-digit hex form of [`SessionId`]. The code is
//! empty for open lobbies, so `lanlobby://10.0.0.5:26368/00000000000000ff/`
//! and the shorter form without the trailing slash are both accepted.

use std::fmt;
use std::str::FromStr;

use lanlobby_core::{Endpoint, SessionId};

use crate::error::{Error, Result};

const SCHEME: &str = "lanlobby://";

/// Everything needed to join a lobby without discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteUrl {
    pub endpoint: Endpoint,
    pub session_id: SessionId,
    pub invite_code: String,
}

impl InviteUrl {
    pub fn new(endpoint: Endpoint, session_id: SessionId, invite_code: impl Into<String>) -> Self {
        Self {
            endpoint,
            session_id,
            invite_code: invite_code.into(),
        }
    }

    pub fn to_url(&self) -> String {
        format!(
            "{}{}/{}/{}",
            SCHEME, self.endpoint, self.session_id, self.invite_code
        )
    }

    pub fn parse(s: &str) -> Result<Self> {
        let rest = s
            .trim()
            .strip_prefix(SCHEME)
            .ok_or_else(|| Error::InvalidInvite(format!("missing {} prefix", SCHEME)))?;

        let parts: Vec<&str> = rest.splitn(3, '/').collect();
        if parts.len() < 2 {
            return Err(Error::InvalidInvite(
                "expected address:port/session/code".into(),
            ));
        }

        let endpoint: Endpoint = parts[0]
            .parse()
            .map_err(|_| Error::InvalidInvite(format!("bad address '{}'", parts[0])))?;
        if endpoint.port == 0 {
            return Err(Error::InvalidInvite("port must not be 0".into()));
        }

        let session_id: SessionId = parts[1]
            .parse()
            .map_err(|_| Error::InvalidInvite(format!("bad session id '{}'", parts[1])))?;

        let invite_code = parts.get(2).copied().unwrap_or_default().to_string();

        Ok(Self {
            endpoint,
            session_id,
            invite_code,
        })
    }
}

impl fmt::Display for InviteUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_url())
    }
}

impl FromStr for InviteUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_invite_roundtrip() {
        let invite = InviteUrl::new(
            Endpoint::new(Ipv4Addr::new(192, 168, 1, 100), 26368),
            SessionId(0xdead_beef),
            "abc123",
        );

        let url = invite.to_url();
        assert_eq!(url, "lanlobby://192.168.1.100:26368/00000000deadbeef/abc123");
        assert_eq!(InviteUrl::parse(&url).unwrap(), invite);
    }

    #[test]
    fn test_invite_open_lobby_forms() {
        let with_slash: InviteUrl = "lanlobby://10.0.0.5:4000/ff/".parse().unwrap();
        let without: InviteUrl = "lanlobby://10.0.0.5:4000/ff".parse().unwrap();
        assert_eq!(with_slash, without);
        assert_eq!(without.invite_code, "");
        assert_eq!(without.session_id, SessionId(0xff));
    }

    #[test]
    fn test_invite_code_keeps_slashes() {
        let invite = InviteUrl::parse("lanlobby://10.0.0.5:4000/1/a/b").unwrap();
        assert_eq!(invite.invite_code, "a/b");
    }

    #[test]
    fn test_invite_parse_invalid() {
        // Missing prefix
        assert!(InviteUrl::parse("http://10.0.0.5:4000/1/x").is_err());

        // Missing session
        assert!(InviteUrl::parse("lanlobby://10.0.0.5:4000").is_err());

        // Hostnames are not resolved
        assert!(InviteUrl::parse("lanlobby://localhost:4000/1/x").is_err());

        // Port 0
        assert!(InviteUrl::parse("lanlobby://10.0.0.5:0/1/x").is_err());

        // Bad session id
        assert!(matches!(
            InviteUrl::parse("lanlobby://10.0.0.5:4000/not-hex/x"),
            Err(Error::InvalidInvite(_))
        ));
    }
}
