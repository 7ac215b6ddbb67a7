//! Console rendering of chat lines and lobby lists

use chrono::{DateTime, Local, TimeZone};
use lanlobby_core::{ChatMessage, SessionAdvertisement};

pub fn format_chat<Tz: TimeZone>(msg: &ChatMessage, at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let time = at.format("%H:%M:%S");
    if msg.is_system() {
        format!("[{}] * {}", time, msg.text)
    } else {
        format!("[{}] <{}> {}", time, msg.from, msg.text)
    }
}

/// Print a chat line stamped with the local wall-clock time
pub fn print_chat(msg: &ChatMessage) {
    println!("{}", format_chat(msg, &Local::now()));
}

pub fn format_session(ad: &SessionAdvertisement) -> String {
    format!(
        "{}  {:<24} host {:<16} {:<11} {}",
        ad.session_id,
        ad.lobby_name,
        ad.host_player_name,
        ad.privacy.to_string(),
        ad.session_endpoint()
    )
}

pub fn print_sessions(sessions: &[SessionAdvertisement]) {
    if sessions.is_empty() {
        println!("No lobbies found");
        return;
    }
    for ad in sessions {
        println!("{}", format_session(ad));
    }
}
