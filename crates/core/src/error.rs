//! Error types for LAN Lobby Core

use std::net::SocketAddr;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config TOML: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Unsupported address: {0} (IPv4 only)")]
    UnsupportedAddress(SocketAddr),

    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),
}

pub type Result<T> = std::result::Result<T, Error>;
