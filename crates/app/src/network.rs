//! Network loops for the console front-end
//!
//! The lobby core is poll-driven, so each command runs a single-threaded
//! loop: a fixed-rate tick calls `advance`, and stdin lines become chat.

use std::io;
use std::net::Ipv4Addr;
use std::time::Duration;

use lanlobby_core::{merge_discovered, SessionAdvertisement, SessionId};
use lanlobby_net::{
    ConnectionState, Error, HostSettings, InviteUrl, JoinTarget, LobbyClient, LobbyHost, Result,
    SystemTransport,
};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::time::{interval, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cli::{BrowseArgs, HostArgs, JoinArgs};
use crate::display;
use crate::platform;
use crate::state::AppState;

/// Roughly one advance per display frame
const TICK: Duration = Duration::from_millis(16);

/// A line typed at the console
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Quit,
    Peers,
    History,
    Help,
    Chat(String),
    Empty,
}

impl Input {
    fn parse(line: &str) -> Self {
        match line.trim() {
            "" => Input::Empty,
            "/quit" | "/exit" => Input::Quit,
            "/peers" => Input::Peers,
            "/history" => Input::History,
            "/help" => Input::Help,
            text => Input::Chat(text.to_string()),
        }
    }
}

const HELP: &str = "Commands: /peers (host only), /history, /quit. Anything else is sent as chat.";

/// Stdin lines. After EOF it stays pending so the loop keeps running headless.
struct Console {
    lines: Lines<BufReader<Stdin>>,
    open: bool,
}

impl Console {
    fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            open: true,
        }
    }

    async fn next(&mut self) -> Input {
        if self.open {
            match self.lines.next_line().await {
                Ok(Some(line)) => return Input::parse(&line),
                Ok(None) => debug!("stdin closed"),
                Err(e) => warn!(error = %e, "Failed to read stdin"),
            }
            self.open = false;
        }
        std::future::pending().await
    }
}

fn ticker() -> Interval {
    let mut ticker = interval(TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

pub async fn run_host(state: &mut AppState, args: HostArgs) -> Result<()> {
    let mut host = LobbyHost::new(SystemTransport::new(), state.config.clone());
    let settings = match args.invite {
        Some(code) => HostSettings::invite_only(args.name, args.player, code),
        None => HostSettings::open(args.name, args.player),
    };
    host.start(settings)?;

    let address = args
        .address
        .or_else(platform::local_ipv4)
        .unwrap_or(Ipv4Addr::LOCALHOST);
    if let Some(url) = host.invite_url(address) {
        println!("Hosting on port {}. Invite: {}", url.endpoint.port, url);
    }
    println!("{}", HELP);

    let mut ticker = ticker();
    let mut console = Console::new();
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                host.advance();
                for msg in host.drain_chat() {
                    state.record(msg);
                }
            }
            input = console.next() => match input {
                Input::Quit => break,
                Input::Peers => {
                    for peer in host.peers() {
                        let name = peer.name.as_deref().unwrap_or("(joining)");
                        println!("  {} {}", peer.endpoint, name);
                    }
                }
                Input::History => state.replay_history(),
                Input::Help => println!("{}", HELP),
                Input::Chat(text) => {
                    if let Err(e) = host.send_chat_from_host(&text) {
                        println!("Not sent: {}", e);
                    }
                }
                Input::Empty => {}
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    host.stop();
    Ok(())
}

pub async fn run_browse(state: &mut AppState, args: BrowseArgs) -> Result<()> {
    let mut client = LobbyClient::new(SystemTransport::new(), state.config.clone());
    client.start_discovery()?;
    println!("Listening for lobbies for {}s...", args.seconds);

    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    let mut known = Vec::new();
    let mut ticker = ticker();
    while Instant::now() < deadline {
        tokio::select! {
            _ = ticker.tick() => {
                client.advance_discovery();
                merge_discovered(&mut known, client.drain_discovered());
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.stop_discovery();
    display::print_sessions(&known);
    Ok(())
}

/// Wait for an advertisement, optionally for one session in particular
async fn discover(
    client: &mut LobbyClient<SystemTransport>,
    session: Option<SessionId>,
    wait: Duration,
) -> Result<SessionAdvertisement> {
    client.start_discovery()?;
    let deadline = Instant::now() + wait;
    let mut ticker = ticker();

    let found = loop {
        if Instant::now() >= deadline {
            break None;
        }
        ticker.tick().await;
        client.advance_discovery();
        let matching = client
            .drain_discovered()
            .into_iter()
            .find(|ad| session.map_or(true, |id| ad.session_id == id));
        if matching.is_some() {
            break matching;
        }
    };

    client.stop_discovery();
    found.ok_or_else(|| {
        Error::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("no matching lobby advertised within {}s", wait.as_secs()),
        ))
    })
}

pub async fn run_join(state: &mut AppState, args: JoinArgs) -> Result<()> {
    let mut client = LobbyClient::new(SystemTransport::new(), state.config.clone());

    let (target, url_code) = match &args.url {
        Some(url) => {
            let invite: InviteUrl = url.parse()?;
            (JoinTarget::from(&invite), invite.invite_code)
        }
        None => {
            println!("Looking for a lobby...");
            let ad = discover(&mut client, args.session, Duration::from_secs(args.wait)).await?;
            println!("Found {}", display::format_session(&ad));
            (JoinTarget::from(&ad), String::new())
        }
    };
    let invite_code = args.invite.unwrap_or(url_code);

    client.connect(target, &args.player, &invite_code)?;
    println!("Connecting to {}...", target.endpoint);

    let mut ticker = ticker();
    let mut console = Console::new();
    let mut last_state = client.connection_state();
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                client.advance_connection();
                for msg in client.drain_chat() {
                    state.record(msg);
                }

                let now = client.connection_state();
                if now != last_state {
                    match (now, client.session()) {
                        (ConnectionState::Connected, Some(joined)) => {
                            info!(lobby = %joined.lobby_name, "Handshake complete");
                            println!(
                                "Joined \"{}\" hosted by {} ({})",
                                joined.lobby_name, joined.host_player_name, joined.privacy
                            );
                            println!("{}", HELP);
                        }
                        (ConnectionState::Disconnected, _) => {
                            println!("Disconnected from lobby");
                            break;
                        }
                        _ => {}
                    }
                    last_state = now;
                }
            }
            input = console.next() => match input {
                Input::Quit => break,
                Input::History => state.replay_history(),
                Input::Help | Input::Peers => println!("{}", HELP),
                Input::Chat(text) => match client.send_chat(&text) {
                    Ok(()) => {
                        for msg in client.drain_chat() {
                            state.history.push(msg);
                        }
                    }
                    Err(e) => println!("Not sent: {}", e),
                },
                Input::Empty => {}
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.disconnect();
    Ok(())
}
