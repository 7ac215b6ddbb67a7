//! Host and client over real loopback sockets

use std::net::Ipv4Addr;
use std::thread;
use std::time::{Duration, Instant};

use lanlobby_core::{Endpoint, LobbyConfig};
use lanlobby_net::{
    ConnectionState, HostSettings, JoinTarget, LobbyClient, LobbyHost, SystemTransport,
};

const DEADLINE: Duration = Duration::from_secs(5);

fn config() -> LobbyConfig {
    LobbyConfig {
        // Ephemeral ports so parallel test runs do not collide
        session_port: 0,
        discovery_port: 47_913,
        broadcast_address: Ipv4Addr::LOCALHOST,
        ..LobbyConfig::default()
    }
}

fn pump_until(
    host: &mut LobbyHost<SystemTransport>,
    client: &mut LobbyClient<SystemTransport>,
    mut done: impl FnMut(&mut LobbyHost<SystemTransport>, &mut LobbyClient<SystemTransport>) -> bool,
) -> bool {
    let start = Instant::now();
    while start.elapsed() < DEADLINE {
        host.advance();
        client.advance();
        if done(host, client) {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn test_join_and_chat_over_loopback() {
    let mut host = LobbyHost::new(SystemTransport::new(), config());
    host.start(HostSettings::open("loopback", "hal")).unwrap();
    let port = host.session_port().unwrap();
    assert_ne!(port, 0);

    let mut client = LobbyClient::new(SystemTransport::new(), config());
    client
        .connect(
            JoinTarget {
                endpoint: Endpoint::new(Ipv4Addr::LOCALHOST, port),
                session_id: host.session_id().unwrap(),
            },
            "bob",
            "",
        )
        .unwrap();

    assert!(pump_until(&mut host, &mut client, |_, c| {
        c.connection_state() == ConnectionState::Connected
    }));
    assert_eq!(client.session().unwrap().lobby_name, "loopback");

    client.send_chat("over the wire").unwrap();
    client.drain_chat();

    let mut lines = Vec::new();
    assert!(pump_until(&mut host, &mut client, |h, _| {
        lines.extend(h.drain_chat());
        lines.iter().any(|m| m.text == "over the wire")
    }));

    host.send_chat_from_host("welcome").unwrap();
    assert!(pump_until(&mut host, &mut client, |_, c| {
        c.drain_chat().iter().any(|m| m.from == "hal" && m.text == "welcome")
    }));

    host.stop();
    assert!(pump_until(&mut host, &mut client, |_, c| !c.is_connected()));
}
