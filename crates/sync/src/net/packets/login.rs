use rkyv::{Archive, Deserialize, Serialize};

use crate::net::types::ModInfo;

/// Carried as the payload of the transport's connection request.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct ClientLogin {
    pub password: String,
    pub build_version: u16,
    pub username: String,
    pub mods: Vec<ModInfo>,
}

/// Sent once the client finished loading and can take live traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Archive, Serialize, Deserialize)]
pub struct ClientReady;

#[derive(Debug, Clone, Default, PartialEq, Archive, Serialize, Deserialize)]
pub struct ServerDeny {
    pub reason: String,
    pub missing: Vec<ModInfo>,
    pub extra: Vec<ModInfo>,
}
