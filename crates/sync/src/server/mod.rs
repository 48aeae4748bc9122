//! The authoritative session host.
//!
//! Logins arrive as connection requests and go through the handshake checks.
//! Accepted peers load their world, report ready, and only then join the
//! broadcast set. Everything runs inside `pump`, one event at a time.

mod events;
mod handshake;
mod registry;
mod snapshot;

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, error, info, trace, warn};

use crate::net::{
    BogieUpdate, ChangeJunction, ClientLogin, ClientReady, CockFiddle, CodecError, DisconnectReason,
    Dispatcher, HoseConnected, HoseDisconnected, ModInfo, NetworkError, NetworkManager,
    NetworkRole, Origin, Packet, PacketBody, PacketKind, PeerHandle, PeerId, PingUpdate,
    PlayerDisconnect, PlayerJoined, PlayerPosition, PositionSample, RotateTurntable,
    SpawnNewVehicle, TimeAdvance, TimeAdvanceRequest, TimeSync, TrainCouple, TrainUncouple,
    Transport, TransportError,
};
use crate::settings::Settings;
use crate::world::{WorldEvent, WorldState};

pub use events::{ServerEvent, describe_disconnect};
pub use handshake::{DenyReason, LoginCheck, LoginPolicy, Verdict, mod_diff, validate};
pub use registry::{PeerRegistry, Player, RegistryError};
pub use snapshot::snapshot_sequence;

/// Build identity a login has to match.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerInfo {
    pub build_version: u16,
    pub mods: Vec<ModInfo>,
}

impl ServerInfo {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            build_version: settings.build_version,
            mods: settings.mods.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub connected: usize,
    pub players: usize,
    pub ready: usize,
    pub logins_accepted: u64,
    pub logins_denied: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerInfo {
    pub id: PeerId,
    pub username: String,
    pub ping: u32,
    pub ready: bool,
}

pub struct NetworkServer<T: Transport + 'static> {
    manager: NetworkManager<T>,
    dispatcher: Rc<Dispatcher<Self>>,
    registry: PeerRegistry,
    settings: Settings,
    info: ServerInfo,
    world: Box<dyn WorldState>,
    host_addr: Option<SocketAddr>,
    events: VecDeque<ServerEvent>,
    logins_accepted: u64,
    logins_denied: u64,
}

impl<T: Transport + 'static> NetworkServer<T> {
    pub fn new(
        transport: T,
        settings: Settings,
        info: ServerInfo,
        world: Box<dyn WorldState>,
    ) -> Result<Self, CodecError> {
        Ok(Self {
            manager: NetworkManager::new(transport, settings.transport_options()),
            dispatcher: Rc::new(Self::build_dispatcher()?),
            registry: PeerRegistry::new(),
            settings,
            info,
            world,
            host_addr: None,
            events: VecDeque::new(),
            logins_accepted: 0,
            logins_denied: 0,
        })
    }

    fn build_dispatcher() -> Result<Dispatcher<Self>, CodecError> {
        let mut dispatcher = Dispatcher::new();
        dispatcher.subscribe::<ClientLogin>(Self::on_login)?;
        dispatcher.subscribe::<ClientReady>(Self::on_ready)?;
        dispatcher.subscribe::<PositionSample>(Self::on_position)?;
        dispatcher.subscribe::<TimeAdvanceRequest>(Self::on_time_advance)?;
        dispatcher.subscribe::<ChangeJunction>(Self::on_world_event::<ChangeJunction>)?;
        dispatcher.subscribe::<RotateTurntable>(Self::on_world_event::<RotateTurntable>)?;
        dispatcher.subscribe::<TrainCouple>(Self::on_world_event::<TrainCouple>)?;
        dispatcher.subscribe::<TrainUncouple>(Self::on_world_event::<TrainUncouple>)?;
        dispatcher.subscribe::<HoseConnected>(Self::on_world_event::<HoseConnected>)?;
        dispatcher.subscribe::<HoseDisconnected>(Self::on_world_event::<HoseDisconnected>)?;
        dispatcher.subscribe::<CockFiddle>(Self::on_world_event::<CockFiddle>)?;
        Ok(dispatcher)
    }

    pub fn start(&mut self) -> Result<(), TransportError> {
        self.manager.transport_mut().start(self.settings.port)?;
        info!(
            "server listening on port {} (build {}, {} mods, max {} players)",
            self.settings.port,
            self.info.build_version,
            self.info.mods.len(),
            self.settings.max_players
        );
        Ok(())
    }

    /// Takes new settings without restarting. Login policy applies to the
    /// next login, transport options are pushed to the live transport.
    pub fn apply_settings(&mut self, settings: Settings) {
        if settings.port != self.settings.port {
            warn!(
                "port change to {} takes effect after a restart",
                settings.port
            );
        }
        self.manager.apply_options(settings.transport_options());
        self.settings = settings;
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    /// The address the hosting player's client connects from.
    pub fn set_host_address(&mut self, addr: Option<SocketAddr>) {
        self.host_addr = addr;
    }

    pub fn is_host(&self, peer: PeerHandle) -> bool {
        self.host_addr == Some(peer.remote)
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn world(&self) -> &dyn WorldState {
        self.world.as_ref()
    }

    pub fn transport(&self) -> &T {
        self.manager.transport()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.events.drain(..)
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            connected: self.manager.transport().connected_count(),
            players: self.registry.len(),
            ready: self.registry.ready_count(),
            logins_accepted: self.logins_accepted,
            logins_denied: self.logins_denied,
        }
    }

    pub fn player_infos(&self) -> Vec<PlayerInfo> {
        self.registry
            .players()
            .map(|player| PlayerInfo {
                id: player.id,
                username: player.username.clone(),
                ping: player.ping,
                ready: self.registry.is_ready(player.id),
            })
            .collect()
    }

    /// Closes the peer's connection. The registry entry goes away when the
    /// transport reports the disconnect.
    pub fn kick(&mut self, id: PeerId) -> Result<(), TransportError> {
        let handle = self
            .registry
            .get(id)
            .map(Player::handle)
            .ok_or(TransportError::UnknownPeer(id))?;
        info!("kicking peer {id}");
        self.manager.transport_mut().disconnect(handle)
    }

    /// Announces a vehicle spawned on the server. The host spawned it
    /// locally and is skipped.
    pub fn send_spawn_vehicle(&mut self, spawn: SpawnNewVehicle) {
        let event = WorldEvent::SpawnVehicle(spawn);
        self.world.observe(&event);

        let targets = self.registry.ready_handles();
        let host = targets.iter().find(|peer| self.is_host(**peer)).map(|peer| peer.id);
        let packet = Packet::from(event);
        match host {
            Some(host) => self.manager.send_to_all_except(targets, &packet, host),
            None => self.manager.send_to_all(targets, &packet),
        };
    }

    pub fn send_bogie_update(&mut self, update: BogieUpdate) {
        let event = WorldEvent::BogieUpdate(update);
        self.world.observe(&event);
        let targets = self.registry.ready_handles();
        self.manager.send_to_all(targets, &Packet::from(event));
    }

    pub fn stop(&mut self) {
        info!("server stopping with {} players", self.registry.len());
        self.manager.stop();
    }

    fn addr_label(&self, addr: SocketAddr) -> String {
        if self.settings.log_ips {
            addr.to_string()
        } else {
            "<hidden>".to_string()
        }
    }

    fn broadcast(&mut self, packet: &Packet, exclude: Option<PeerId>) {
        let targets = self.registry.ready_handles();
        let report = match exclude {
            Some(id) => self.manager.send_to_all_except(targets, packet, id),
            None => self.manager.send_to_all(targets, packet),
        };
        if report.failed > 0 {
            debug!(
                "{:?} reached {} peers, {} sends failed",
                packet.kind(),
                report.delivered,
                report.failed
            );
        }
    }

    /// The sender of a live-traffic packet, when it is allowed to send one.
    fn ready_sender(&self, origin: &Origin, kind: PacketKind) -> Option<PeerHandle> {
        let peer = origin.peer()?;
        if self.registry.is_ready(peer.id) {
            Some(peer)
        } else {
            trace!("ignoring {kind:?} from peer {} before it is ready", peer.id);
            None
        }
    }

    fn on_login(&mut self, login: ClientLogin, origin: &Origin) {
        let Some(request) = origin.request() else {
            debug!("ignoring login packet on an established connection");
            return;
        };

        let policy = LoginPolicy {
            password: &self.settings.password,
            build_version: self.info.build_version,
            max_players: self.settings.max_players,
            connected: self.manager.transport().connected_count(),
            mods: &self.info.mods,
        };

        match validate(&policy, &login) {
            Verdict::Accept => {
                let handle = match self.manager.transport_mut().accept(request) {
                    Ok(handle) => handle,
                    Err(e) => {
                        warn!("accepting login from {} failed: {e}", login.username);
                        return;
                    }
                };
                if let Err(e) = self
                    .registry
                    .add_pending(Player::new(handle, login.username.clone()))
                {
                    warn!("{e}; dropping the new connection");
                    if let Err(e) = self.manager.transport_mut().disconnect(handle) {
                        debug!("closing peer {} failed: {e}", handle.id);
                    }
                    return;
                }

                info!(
                    "{} ({}) logged in as peer {}",
                    login.username,
                    self.addr_label(request.remote),
                    handle.id
                );
                self.logins_accepted += 1;
                self.events.push_back(ServerEvent::LoginAccepted {
                    id: handle.id,
                    username: login.username,
                    addr: request.remote,
                });
            }
            Verdict::Reject(reason) => {
                warn!(
                    "denied login of {} ({}): {reason}",
                    login.username,
                    self.addr_label(request.remote)
                );
                self.manager.reject(request, &reason.to_packet().into());
                self.logins_denied += 1;
                self.events.push_back(ServerEvent::LoginDenied {
                    addr: request.remote,
                    username: login.username,
                    reason,
                });
            }
        }
    }

    fn on_ready(&mut self, _ready: ClientReady, origin: &Origin) {
        let Some(peer) = origin.peer() else {
            return;
        };

        let username = match self.registry.mark_ready(peer) {
            Ok(player) => player.username.clone(),
            Err(e) => {
                warn!("ready from peer {}: {e}", peer.id);
                return;
            }
        };

        self.broadcast(
            &PlayerJoined {
                id: peer.id,
                username: username.clone(),
            }
            .into(),
            Some(peer.id),
        );

        let is_host = self.is_host(peer);
        info!(
            "peer {} ({username}) is ready{}",
            peer.id,
            if is_host { ", host skips world sync" } else { ", sending world state" }
        );

        let others = self.registry.ready_players().filter(|p| p.id != peer.id);
        let packets = snapshot_sequence(self.world.as_ref(), others, is_host);
        for packet in &packets {
            self.manager.send_packet(peer, packet);
        }

        self.events.push_back(ServerEvent::PlayerReady { id: peer.id });
    }

    fn on_position(&mut self, sample: PositionSample, origin: &Origin) {
        let Some(peer) = self.ready_sender(origin, PositionSample::KIND) else {
            return;
        };
        if let Some(player) = self.registry.get_mut(peer.id) {
            player.position = sample.position.into();
            player.rotation_y = sample.rotation_y;
            player.is_jumping = sample.is_jumping;
        }

        let packet = PlayerPosition {
            id: peer.id,
            position: sample.position,
            rotation_y: sample.rotation_y,
            is_jumping: sample.is_jumping,
        };
        self.broadcast(&packet.into(), Some(peer.id));
    }

    fn on_time_advance(&mut self, request: TimeAdvanceRequest, origin: &Origin) {
        let Some(peer) = self.ready_sender(origin, TimeAdvanceRequest::KIND) else {
            return;
        };
        self.broadcast(
            &TimeAdvance {
                seconds: request.seconds,
            }
            .into(),
            Some(peer.id),
        );
    }

    /// Junction and turntable changes echo back to the sender so every peer
    /// applies them in the same order. Everything else skips the sender.
    fn on_world_event<P: PacketBody>(&mut self, body: P, origin: &Origin) {
        let Some(peer) = self.ready_sender(origin, P::KIND) else {
            return;
        };
        let packet: Packet = body.into();
        let Ok(event) = WorldEvent::try_from(packet) else {
            return;
        };
        self.world.observe(&event);

        let echo = matches!(
            P::KIND,
            PacketKind::ChangeJunction | PacketKind::RotateTurntable
        );
        let packet = Packet::from(event);
        self.broadcast(&packet, (!echo).then_some(peer.id));
    }
}

impl<T: Transport + 'static> NetworkRole for NetworkServer<T> {
    type Transport = T;

    fn manager(&mut self) -> &mut NetworkManager<T> {
        &mut self.manager
    }

    fn dispatcher(&self) -> Rc<Dispatcher<Self>> {
        Rc::clone(&self.dispatcher)
    }

    fn on_peer_connected(&mut self, peer: PeerHandle) {
        debug!("peer {} connected", peer.id);
    }

    fn on_peer_disconnected(&mut self, peer: PeerHandle, reason: DisconnectReason) {
        let Some(player) = self.registry.remove(peer.id) else {
            debug!("peer {} disconnected without a player", peer.id);
            return;
        };

        info!(
            "{} (peer {}) {}",
            player.username,
            peer.id,
            describe_disconnect(&reason)
        );
        // Sent for loading peers too. Clients ignore ids they never saw.
        self.broadcast(&PlayerDisconnect { id: peer.id }.into(), None);
        self.events.push_back(ServerEvent::PlayerDisconnected {
            id: peer.id,
            username: Some(player.username),
            reason,
        });
    }

    fn on_latency_update(&mut self, peer: PeerHandle, latency_ms: u32) {
        let Some(player) = self.registry.get_mut(peer.id) else {
            return;
        };
        player.ping = latency_ms;

        self.broadcast(
            &PingUpdate {
                id: peer.id,
                ping: latency_ms,
            }
            .into(),
            Some(peer.id),
        );
        self.manager.send_packet(
            peer,
            &TimeSync {
                server_time: server_time_millis(),
            }
            .into(),
        );
    }

    fn on_unconnected(&mut self, addr: SocketAddr, data: Vec<u8>) {
        debug!(
            "ignoring {} byte unconnected message from {}",
            data.len(),
            self.addr_label(addr)
        );
    }

    fn on_network_error(&mut self, error: NetworkError) {
        let message = match error.addr {
            Some(addr) => format!("{} ({})", error.error, self.addr_label(addr)),
            None => error.error.to_string(),
        };
        error!("network error: {message}");
        self.events.push_back(ServerEvent::NetworkError { message });
    }
}

/// Millisecond component of the UTC wall clock.
fn server_time_millis() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |now| now.subsec_millis())
}
