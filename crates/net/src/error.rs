//! Network error types

use std::io;

/// Network result type
pub type Result<T> = std::result::Result<T, Error>;

/// Network errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Lobby error: {0}")]
    Core(#[from] lanlobby_core::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: usize, max: usize },

    #[error("Advertisement too large: {len} bytes (max {max}); shorten the lobby or player name")]
    AdvertisementTooLarge { len: usize, max: usize },

    #[error("Invite-only lobby needs a non-empty invite code")]
    InviteCodeRequired,

    #[error("Invalid invite URL: {0}")]
    InvalidInvite(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Already hosting")]
    AlreadyRunning,

    #[error("Lobby is not running")]
    NotRunning,
}
