//! Command line interface

use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use lanlobby_core::SessionId;

#[derive(Debug, Parser)]
#[command(name = "lanlobby", version, about = "Find, host and chat in game lobbies on your LAN")]
pub struct Cli {
    /// Config file (defaults to lanlobby.toml in the platform config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Host a lobby and chat with whoever joins
    Host(HostArgs),
    /// List lobbies advertised on the LAN
    Browse(BrowseArgs),
    /// Join a lobby
    Join(JoinArgs),
}

#[derive(Debug, Args)]
pub struct HostArgs {
    /// Lobby name shown to browsers
    #[arg(long)]
    pub name: String,

    /// Your display name
    #[arg(long, default_value = "")]
    pub player: String,

    /// Make the lobby invite-only with this code
    #[arg(long)]
    pub invite: Option<String>,

    /// Address to put in the invite URL (detected when omitted)
    #[arg(long)]
    pub address: Option<Ipv4Addr>,
}

#[derive(Debug, Args)]
pub struct BrowseArgs {
    /// How long to listen for advertisements
    #[arg(long, default_value_t = 3)]
    pub seconds: u64,
}

#[derive(Debug, Args)]
pub struct JoinArgs {
    /// Your display name
    #[arg(long, default_value = "")]
    pub player: String,

    /// Invite code (overrides the one in --url)
    #[arg(long)]
    pub invite: Option<String>,

    /// lanlobby:// invite URL; skips discovery
    #[arg(long, conflicts_with = "session")]
    pub url: Option<String>,

    /// Join the advertised lobby with this session id (hex) instead of the first found
    #[arg(long)]
    pub session: Option<SessionId>,

    /// Seconds to wait for a matching advertisement
    #[arg(long, default_value_t = 5)]
    pub wait: u64,
}
