//! Data models for the LAN lobby

mod chat;
mod endpoint;
mod session;

pub use chat::*;
pub use endpoint::*;
pub use session::*;
