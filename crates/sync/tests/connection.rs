use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use glam::Vec3;
use railsync::net::{ClientLogin, ModInfo, NetworkRole, UdpTransport, VehicleSnapshot};
use railsync::{
    ClientEvent, ClientState, NetworkClient, NetworkServer, ServerInfo, Settings, WorldCache,
};

static PORT_COUNTER: AtomicU16 = AtomicU16::new(41000);

fn next_port() -> u16 {
    PORT_COUNTER.fetch_add(10, Ordering::SeqCst)
}

type Server = NetworkServer<UdpTransport>;
type Client = NetworkClient<UdpTransport, WorldCache>;

fn localhost() -> UdpTransport {
    UdpTransport::new(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn start_server(port: u16) -> Server {
    let settings = Settings {
        password: "pw".to_string(),
        port,
        ..Settings::default()
    };
    let mut world = WorldCache::with_layout(3, 0);
    world.insert_vehicle(VehicleSnapshot {
        car_guid: "shunter".to_string(),
        ..VehicleSnapshot::default()
    });
    let info = ServerInfo {
        build_version: 7,
        mods: vec![ModInfo::new("Multiplayer", "0.1.0")],
    };
    let mut server = NetworkServer::new(localhost(), settings, info, Box::new(world)).unwrap();
    server.start().unwrap();
    server
}

fn new_client() -> Client {
    NetworkClient::new(localhost(), &Settings::default(), WorldCache::new()).unwrap()
}

fn login(username: &str, password: &str) -> ClientLogin {
    ClientLogin {
        password: password.to_string(),
        build_version: 7,
        username: username.to_string(),
        mods: vec![ModInfo::new("Multiplayer", "0.1.0")],
    }
}

/// Pumps everyone until `done` holds or the timeout passes.
fn pump_until(
    server: &mut Server,
    clients: &mut [&mut Client],
    timeout_ms: u64,
    mut done: impl FnMut(&Server, &[&mut Client]) -> bool,
) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(timeout_ms) {
        server.pump();
        for client in clients.iter_mut() {
            client.pump();
            if client.state() == ClientState::Loading {
                client.send_ready().unwrap();
            }
        }
        if done(server, clients) {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

#[test]
fn test_udp_join_syncs_world() {
    let port = next_port();
    let server_addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
    let mut server = start_server(port);
    let mut client = new_client();

    client.connect(server_addr, login("alice", "pw")).unwrap();
    let playing = pump_until(&mut server, &mut [&mut client], 2000, |_, clients| {
        clients[0].state() == ClientState::Playing
    });

    assert!(playing, "client never finished joining");
    assert!(client.world().vehicle("shunter").is_some());
    assert_eq!(server.registry().ready_count(), 1);
    assert!(client.drain_events().any(|e| e == ClientEvent::WorldSynced));
}

#[test]
fn test_udp_wrong_password_is_denied() {
    let port = next_port();
    let server_addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
    let mut server = start_server(port);
    let mut client = new_client();

    client.connect(server_addr, login("mallory", "guess")).unwrap();
    let denied = pump_until(&mut server, &mut [&mut client], 2000, |_, clients| {
        clients[0].state() == ClientState::Disconnected
    });
    let events: Vec<ClientEvent> = client.drain_events().collect();

    assert!(denied);
    assert!(events.iter().any(|e| matches!(
        e,
        ClientEvent::LoginDenied { reason, .. } if reason == "invalid password"
    )));
    assert!(server.registry().is_empty());
}

#[test]
fn test_udp_position_relay_and_disconnect() {
    let port = next_port();
    let server_addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
    let mut server = start_server(port);
    let mut alice = new_client();
    let mut bob = new_client();

    alice.connect(server_addr, login("alice", "pw")).unwrap();
    bob.connect(server_addr, login("bob", "pw")).unwrap();
    let joined = pump_until(&mut server, &mut [&mut alice, &mut bob], 2000, |server, _| {
        server.registry().ready_count() == 2
    });
    assert!(joined, "both clients should be ready");

    let target = Vec3::new(3.0, 0.5, -8.0);
    let seen = pump_until(&mut server, &mut [&mut alice, &mut bob], 2000, |_, clients| {
        clients[1].players().any(|p| p.username == "alice")
    });
    assert!(seen, "bob should know alice");

    // A lost sample is never resent, so keep sending until one lands.
    let start = Instant::now();
    let mut relayed = false;
    while !relayed && start.elapsed() < Duration::from_millis(2000) {
        alice.send_position(target, 180.0, false);
        server.pump();
        alice.pump();
        bob.pump();
        relayed = bob.players().any(|p| p.position == target);
        thread::sleep(Duration::from_millis(1));
    }
    assert!(relayed, "bob never saw alice's position");

    alice.disconnect();
    let left = pump_until(&mut server, &mut [&mut alice, &mut bob], 2000, |server, clients| {
        server.registry().ready_count() == 1 && clients[1].players().count() == 0
    });
    assert!(left, "alice's departure should reach bob");
}
