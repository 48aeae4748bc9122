use std::collections::BTreeMap;
use std::net::SocketAddr;

use glam::Vec3;

use crate::net::{PeerHandle, PeerId};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("peer {0} already has a player")]
    DuplicatePlayer(PeerId),
    #[error("peer {0} is not registered")]
    UnknownPeer(PeerId),
    #[error("peer {0} is already ready")]
    AlreadyReady(PeerId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: PeerId,
    pub remote: SocketAddr,
    pub username: String,
    pub position: Vec3,
    pub rotation_y: f32,
    pub is_jumping: bool,
    pub ping: u32,
}

impl Player {
    pub fn new(handle: PeerHandle, username: impl Into<String>) -> Self {
        Self {
            id: handle.id,
            remote: handle.remote,
            username: username.into(),
            position: Vec3::ZERO,
            rotation_y: 0.0,
            is_jumping: false,
            ping: 0,
        }
    }

    pub fn handle(&self) -> PeerHandle {
        PeerHandle::new(self.id, self.remote)
    }
}

/// Players by peer id plus the handles of peers that finished joining.
///
/// A peer is in `active` only while it also has a player record, so every
/// ready handle resolves to a player.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    players: BTreeMap<PeerId, Player>,
    active: BTreeMap<PeerId, PeerHandle>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// First join phase: the login was accepted but the peer is still loading.
    pub fn add_pending(&mut self, player: Player) -> Result<(), RegistryError> {
        if self.players.contains_key(&player.id) {
            return Err(RegistryError::DuplicatePlayer(player.id));
        }
        self.players.insert(player.id, player);
        Ok(())
    }

    /// Second join phase: from here on the peer receives broadcasts.
    pub fn mark_ready(&mut self, handle: PeerHandle) -> Result<&Player, RegistryError> {
        if self.active.contains_key(&handle.id) {
            return Err(RegistryError::AlreadyReady(handle.id));
        }
        let player = self
            .players
            .get(&handle.id)
            .ok_or(RegistryError::UnknownPeer(handle.id))?;
        self.active.insert(handle.id, handle);
        Ok(player)
    }

    /// Drops the player and its handle together.
    pub fn remove(&mut self, id: PeerId) -> Option<Player> {
        self.active.remove(&id);
        self.players.remove(&id)
    }

    pub fn is_ready(&self, id: PeerId) -> bool {
        self.active.contains_key(&id)
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.players.contains_key(&id)
    }

    pub fn get(&self, id: PeerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn get_mut(&mut self, id: PeerId) -> Option<&mut Player> {
        self.players.get_mut(&id)
    }

    /// Handles of every ready peer, by ascending id.
    pub fn ready_handles(&self) -> Vec<PeerHandle> {
        self.active.values().copied().collect()
    }

    pub fn ready_players(&self) -> impl Iterator<Item = &Player> {
        self.active.keys().filter_map(|id| self.players.get(id))
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn ready_count(&self) -> usize {
        self.active.len()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: u8) -> PeerHandle {
        let addr: SocketAddr = ([127, 0, 0, 1], 5000 + id as u16).into();
        PeerHandle::new(PeerId(id), addr)
    }

    #[test]
    fn test_pending_players_are_not_ready() {
        let mut registry = PeerRegistry::new();
        registry.add_pending(Player::new(handle(1), "ada")).unwrap();

        assert!(registry.contains(PeerId(1)));
        assert!(!registry.is_ready(PeerId(1)));
        assert!(registry.ready_handles().is_empty());
    }

    #[test]
    fn test_ready_requires_a_player_and_happens_once() {
        let mut registry = PeerRegistry::new();
        assert_eq!(
            registry.mark_ready(handle(3)).unwrap_err(),
            RegistryError::UnknownPeer(PeerId(3))
        );

        registry.add_pending(Player::new(handle(3), "bo")).unwrap();
        assert_eq!(registry.mark_ready(handle(3)).unwrap().username, "bo");
        assert_eq!(
            registry.mark_ready(handle(3)).unwrap_err(),
            RegistryError::AlreadyReady(PeerId(3))
        );
        assert_eq!(registry.ready_handles(), vec![handle(3)]);
    }

    #[test]
    fn test_duplicate_player_is_refused() {
        let mut registry = PeerRegistry::new();
        registry.add_pending(Player::new(handle(0), "a")).unwrap();
        assert_eq!(
            registry.add_pending(Player::new(handle(0), "b")),
            Err(RegistryError::DuplicatePlayer(PeerId(0)))
        );
        assert_eq!(registry.get(PeerId(0)).unwrap().username, "a");
    }

    #[test]
    fn test_remove_clears_both_maps() {
        let mut registry = PeerRegistry::new();
        for id in [2, 7] {
            registry.add_pending(Player::new(handle(id), "p")).unwrap();
            registry.mark_ready(handle(id)).unwrap();
        }

        assert_eq!(registry.remove(PeerId(7)).unwrap().id, PeerId(7));
        assert!(!registry.contains(PeerId(7)));
        assert!(!registry.is_ready(PeerId(7)));
        assert_eq!(registry.ready_handles(), vec![handle(2)]);
        assert!(registry.remove(PeerId(7)).is_none());
    }

    #[test]
    fn test_boundary_peer_id_is_usable() {
        let mut registry = PeerRegistry::new();
        registry.add_pending(Player::new(handle(255), "last")).unwrap();
        registry.mark_ready(handle(255)).unwrap();
        assert_eq!(registry.ready_players().next().unwrap().id, PeerId::MAX);
    }
}
