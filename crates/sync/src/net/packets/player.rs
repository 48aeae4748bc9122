use rkyv::{Archive, Deserialize, Serialize};

use crate::net::protocol::PeerId;
use crate::net::types::Vector3;

/// Local player transform reported by a client. The server stamps the
/// sender's id when relaying it.
#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
pub struct PositionSample {
    pub position: Vector3,
    pub rotation_y: f32,
    pub is_jumping: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
pub struct TimeAdvanceRequest {
    pub seconds: f32,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct PlayerJoined {
    pub id: PeerId,
    pub username: String,
}

/// One already-playing peer as seen by a joiner during world sync. Unlike
/// `PlayerPosition` it is never dropped or overtaken.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: PeerId,
    pub username: String,
    pub position: Vector3,
    pub rotation_y: f32,
    pub is_jumping: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
pub struct PlayerDisconnect {
    pub id: PeerId,
}

#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
pub struct PlayerPosition {
    pub id: PeerId,
    pub position: Vector3,
    pub rotation_y: f32,
    pub is_jumping: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
pub struct PingUpdate {
    pub id: PeerId,
    pub ping: u32,
}

/// Millisecond component (0..1000) of the server's UTC wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
pub struct TimeSync {
    pub server_time: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
pub struct TimeAdvance {
    pub seconds: f32,
}
