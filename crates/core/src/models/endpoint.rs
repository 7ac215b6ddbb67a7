//! Network endpoint value type

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An IPv4 (address, port) pair identifying a network peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: Ipv4Addr,
    pub port: u16,
}

impl Endpoint {
    pub const fn new(address: Ipv4Addr, port: u16) -> Self {
        Self { address, port }
    }

    /// Wildcard address on the given port, for binding
    pub const fn any(port: u16) -> Self {
        Self::new(Ipv4Addr::UNSPECIFIED, port)
    }

    /// Same address, different port
    pub fn with_port(self, port: u16) -> Self {
        Self { port, ..self }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.address, self.port))
    }
}

impl From<SocketAddrV4> for Endpoint {
    fn from(addr: SocketAddrV4) -> Self {
        Self::new(*addr.ip(), addr.port())
    }
}

impl From<Endpoint> for SocketAddr {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.socket_addr()
    }
}

impl TryFrom<SocketAddr> for Endpoint {
    type Error = Error;

    fn try_from(addr: SocketAddr) -> Result<Self> {
        match addr {
            SocketAddr::V4(v4) => Ok(v4.into()),
            // Dual-stack sockets may report IPv4 peers as ::ffff:a.b.c.d
            SocketAddr::V6(v6) => v6
                .ip()
                .to_ipv4_mapped()
                .map(|ip| Self::new(ip, v6.port()))
                .ok_or(Error::UnsupportedAddress(addr)),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let addr: SocketAddrV4 = s
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("bad endpoint '{}'", s)))?;
        Ok(addr.into())
    }
}
