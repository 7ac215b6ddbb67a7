//! LAN Lobby Core Library
//!
//! Domain models, configuration and the injected time/randomness services
//! shared by the lobby protocol and its front-ends.

pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use config::LobbyConfig;
pub use error::{Error, Result};
pub use models::*;
pub use services::{Clock, IdSource, ManualClock, MonotonicClock, RandomIds, SequenceIds};
