use std::net::SocketAddr;

use crate::net::{DisconnectReason, PeerId};

use super::handshake::DenyReason;

/// Things the embedding application may want to show or log.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    LoginAccepted {
        id: PeerId,
        username: String,
        addr: SocketAddr,
    },
    LoginDenied {
        addr: SocketAddr,
        username: String,
        reason: DenyReason,
    },
    PlayerReady {
        id: PeerId,
    },
    PlayerDisconnected {
        id: PeerId,
        username: Option<String>,
        reason: DisconnectReason,
    },
    NetworkError {
        message: String,
    },
}

pub fn describe_disconnect(reason: &DisconnectReason) -> &'static str {
    match reason {
        DisconnectReason::RemoteClose => "disconnected",
        DisconnectReason::LocalClose => "kicked",
        DisconnectReason::Timeout => "timed out",
        DisconnectReason::ConnectionRejected { .. } => "rejected",
    }
}
