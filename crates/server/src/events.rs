use std::net::SocketAddr;

use log::Level;
use railsync::ServerEvent;
use railsync::server::describe_disconnect;

/// Turns a drained server event into a log line for the dashboard.
pub fn describe(event: &ServerEvent, show_ips: bool) -> (Level, String) {
    match event {
        ServerEvent::LoginAccepted { id, username, addr } => (
            Level::Info,
            format!("{} joined as peer {} from {}", username, id, address(*addr, show_ips)),
        ),
        ServerEvent::LoginDenied {
            addr,
            username,
            reason,
        } => (
            Level::Warn,
            format!(
                "denied {} from {}: {}",
                username,
                address(*addr, show_ips),
                reason
            ),
        ),
        ServerEvent::PlayerReady { id } => (Level::Info, format!("peer {} finished loading", id)),
        ServerEvent::PlayerDisconnected {
            id,
            username,
            reason,
        } => {
            let name = username.as_deref().unwrap_or("unknown player");
            (
                Level::Info,
                format!("{} (peer {}) {}", name, id, describe_disconnect(reason)),
            )
        }
        ServerEvent::NetworkError { message } => (Level::Error, message.clone()),
    }
}

fn address(addr: SocketAddr, show_ips: bool) -> String {
    if show_ips {
        addr.to_string()
    } else {
        "<hidden>".to_string()
    }
}
