//! The joining side of a session.
//!
//! A client logs in with its connection request, loads, reports ready and
//! then plays. The server's answers drive the state machine below.

use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::rc::Rc;

use glam::Vec3;
use log::{debug, info, trace, warn};

use crate::net::{
    BeginWorldSync, BogieUpdate, ChangeJunction, ClientLogin, ClientReady, CockFiddle, CodecError,
    ConnectionRequest, DisconnectReason, Dispatcher, HoseConnected, HoseDisconnected,
    JunctionState, ModInfo, NetworkManager, NetworkRole, Origin, Packet, PacketBody, PeerHandle,
    PeerId, PingUpdate, PlayerDisconnect, PlayerJoined, PlayerPosition, PositionSample,
    RemoveLoadingScreen, RosterEntry, RotateTurntable, ServerDeny, SpawnNewVehicle, TimeAdvance,
    TimeAdvanceRequest, TimeSync, TrainCouple, TrainUncouple, Transport, TransportError,
    TurntableState, VehicleSnapshot, WeatherState,
};
use crate::settings::Settings;
use crate::world::{WorldEvent, WorldSink};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("already connected or connecting")]
    AlreadyConnected,
    #[error("not connected")]
    NotConnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    /// Login sent, waiting for the server's verdict.
    Connecting,
    /// Accepted; the local world is loading and `send_ready` has not been called.
    Loading,
    /// Ready sent, world snapshot streaming in.
    Syncing,
    Playing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected,
    LoginDenied {
        reason: String,
        missing: Vec<ModInfo>,
        extra: Vec<ModInfo>,
    },
    Disconnected {
        reason: DisconnectReason,
    },
    PlayerJoined {
        id: PeerId,
        username: String,
    },
    PlayerLeft {
        id: PeerId,
    },
    WorldSynced,
    TimeAdvanced {
        seconds: f32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemotePlayer {
    pub id: PeerId,
    pub username: String,
    pub position: Vec3,
    pub rotation_y: f32,
    pub is_jumping: bool,
    pub ping: u32,
}

pub struct NetworkClient<T: Transport + 'static, W: WorldSink + 'static> {
    manager: NetworkManager<T>,
    dispatcher: Rc<Dispatcher<Self>>,
    world: W,
    state: ClientState,
    server: Option<PeerHandle>,
    players: BTreeMap<PeerId, RemotePlayer>,
    server_time: Option<u32>,
    ping: u32,
    events: VecDeque<ClientEvent>,
}

impl<T: Transport + 'static, W: WorldSink + 'static> NetworkClient<T, W> {
    pub fn new(transport: T, settings: &Settings, world: W) -> Result<Self, CodecError> {
        Ok(Self {
            manager: NetworkManager::new(transport, settings.transport_options()),
            dispatcher: Rc::new(Self::build_dispatcher()?),
            world,
            state: ClientState::Disconnected,
            server: None,
            players: BTreeMap::new(),
            server_time: None,
            ping: 0,
            events: VecDeque::new(),
        })
    }

    fn build_dispatcher() -> Result<Dispatcher<Self>, CodecError> {
        let mut d = Dispatcher::new();
        d.subscribe::<PlayerJoined>(Self::on_player_joined)?;
        d.subscribe::<PlayerDisconnect>(Self::on_player_disconnect)?;
        d.subscribe::<PlayerPosition>(Self::on_player_position)?;
        d.subscribe::<RosterEntry>(Self::on_roster_entry)?;
        d.subscribe::<PingUpdate>(Self::on_ping_update)?;
        d.subscribe::<TimeSync>(Self::on_time_sync)?;
        d.subscribe::<TimeAdvance>(Self::on_time_advance)?;
        d.subscribe::<BeginWorldSync>(Self::on_begin_world_sync)?;
        d.subscribe::<WeatherState>(Self::on_weather)?;
        d.subscribe::<JunctionState>(Self::on_junctions)?;
        d.subscribe::<TurntableState>(Self::on_turntables)?;
        d.subscribe::<VehicleSnapshot>(Self::on_existing_vehicle)?;
        d.subscribe::<RemoveLoadingScreen>(Self::on_remove_loading_screen)?;
        d.subscribe::<ChangeJunction>(Self::on_world_event::<ChangeJunction>)?;
        d.subscribe::<RotateTurntable>(Self::on_world_event::<RotateTurntable>)?;
        d.subscribe::<TrainCouple>(Self::on_world_event::<TrainCouple>)?;
        d.subscribe::<TrainUncouple>(Self::on_world_event::<TrainUncouple>)?;
        d.subscribe::<HoseConnected>(Self::on_world_event::<HoseConnected>)?;
        d.subscribe::<HoseDisconnected>(Self::on_world_event::<HoseDisconnected>)?;
        d.subscribe::<CockFiddle>(Self::on_world_event::<CockFiddle>)?;
        d.subscribe::<SpawnNewVehicle>(Self::on_world_event::<SpawnNewVehicle>)?;
        d.subscribe::<BogieUpdate>(Self::on_world_event::<BogieUpdate>)?;
        Ok(d)
    }

    /// Starts the transport on an ephemeral port if needed and sends the
    /// login along with the connection request.
    pub fn connect(&mut self, addr: SocketAddr, login: ClientLogin) -> Result<(), ClientError> {
        if self.state != ClientState::Disconnected {
            return Err(ClientError::AlreadyConnected);
        }
        if !self.manager.transport().is_running() {
            self.manager.transport_mut().start(0)?;
        }

        let payload = self.manager.encode(&login.into())?.to_vec();
        let server = self.manager.transport_mut().connect(addr, &payload)?;
        info!("connecting to {addr}");
        self.server = Some(server);
        self.state = ClientState::Connecting;
        Ok(())
    }

    /// Tells the server the local world finished loading.
    pub fn send_ready(&mut self) -> Result<(), ClientError> {
        let server = self.server.ok_or(ClientError::NotConnected)?;
        if self.state != ClientState::Loading {
            debug!("ready ignored in state {:?}", self.state);
            return Ok(());
        }
        self.manager.send_packet(server, &ClientReady.into());
        self.state = ClientState::Syncing;
        Ok(())
    }

    pub fn send_position(&mut self, position: Vec3, rotation_y: f32, is_jumping: bool) -> bool {
        self.send_live(
            PositionSample {
                position: position.into(),
                rotation_y,
                is_jumping,
            }
            .into(),
        )
    }

    /// Vehicle spawns and bogie updates come from the server only.
    pub fn send_world_event(&mut self, event: WorldEvent) -> bool {
        if matches!(
            event,
            WorldEvent::SpawnVehicle(_) | WorldEvent::BogieUpdate(_)
        ) {
            warn!("{event:?} cannot be sent by a client");
            return false;
        }
        self.send_live(event.into())
    }

    pub fn request_time_advance(&mut self, seconds: f32) -> bool {
        self.send_live(TimeAdvanceRequest { seconds }.into())
    }

    pub fn disconnect(&mut self) {
        if let Some(server) = self.server.take() {
            if let Err(e) = self.manager.transport_mut().disconnect(server) {
                debug!("disconnect: {e}");
            }
        }
        self.reset();
    }

    pub fn apply_settings(&mut self, settings: &Settings) {
        self.manager.apply_options(settings.transport_options());
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn world(&self) -> &W {
        &self.world
    }

    pub fn players(&self) -> impl Iterator<Item = &RemotePlayer> {
        self.players.values()
    }

    pub fn player(&self, id: PeerId) -> Option<&RemotePlayer> {
        self.players.get(&id)
    }

    /// Last time sync value received from the server.
    pub fn server_time(&self) -> Option<u32> {
        self.server_time
    }

    /// Latency to the server as last measured by the transport.
    pub fn ping(&self) -> u32 {
        self.ping
    }

    pub fn transport(&self) -> &T {
        self.manager.transport()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ClientEvent> + '_ {
        self.events.drain(..)
    }

    fn send_live(&mut self, packet: Packet) -> bool {
        match (self.state, self.server) {
            (ClientState::Playing, Some(server)) => self.manager.send_packet(server, &packet),
            _ => {
                trace!("not playing, dropping {:?}", packet.kind());
                false
            }
        }
    }

    fn reset(&mut self) {
        self.state = ClientState::Disconnected;
        self.server = None;
        self.players.clear();
    }

    fn from_server(&self, origin: &Origin) -> bool {
        origin.peer().is_some_and(|peer| Some(peer) == self.server)
    }

    fn on_player_joined(&mut self, packet: PlayerJoined, origin: &Origin) {
        if !self.from_server(origin) {
            return;
        }
        info!("{} joined as peer {}", packet.username, packet.id);
        self.players.insert(
            packet.id,
            RemotePlayer {
                id: packet.id,
                username: packet.username.clone(),
                position: Vec3::ZERO,
                rotation_y: 0.0,
                is_jumping: false,
                ping: 0,
            },
        );
        self.events.push_back(ClientEvent::PlayerJoined {
            id: packet.id,
            username: packet.username,
        });
    }

    fn on_roster_entry(&mut self, entry: RosterEntry, origin: &Origin) {
        if !self.from_server(origin) {
            return;
        }
        debug!("{} is already playing as peer {}", entry.username, entry.id);
        self.players.insert(
            entry.id,
            RemotePlayer {
                id: entry.id,
                username: entry.username.clone(),
                position: entry.position.into(),
                rotation_y: entry.rotation_y,
                is_jumping: entry.is_jumping,
                ping: 0,
            },
        );
        self.events.push_back(ClientEvent::PlayerJoined {
            id: entry.id,
            username: entry.username,
        });
    }

    fn on_player_disconnect(&mut self, packet: PlayerDisconnect, origin: &Origin) {
        if !self.from_server(origin) {
            return;
        }
        if let Some(player) = self.players.remove(&packet.id) {
            info!("{} left", player.username);
            self.events.push_back(ClientEvent::PlayerLeft { id: packet.id });
        }
    }

    fn on_player_position(&mut self, packet: PlayerPosition, origin: &Origin) {
        if !self.from_server(origin) {
            return;
        }
        if let Some(player) = self.players.get_mut(&packet.id) {
            player.position = packet.position.into();
            player.rotation_y = packet.rotation_y;
            player.is_jumping = packet.is_jumping;
        }
    }

    fn on_ping_update(&mut self, packet: PingUpdate, origin: &Origin) {
        if !self.from_server(origin) {
            return;
        }
        if let Some(player) = self.players.get_mut(&packet.id) {
            player.ping = packet.ping;
        }
    }

    fn on_time_sync(&mut self, packet: TimeSync, origin: &Origin) {
        if self.from_server(origin) {
            self.server_time = Some(packet.server_time);
        }
    }

    fn on_time_advance(&mut self, packet: TimeAdvance, origin: &Origin) {
        if self.from_server(origin) {
            self.events.push_back(ClientEvent::TimeAdvanced {
                seconds: packet.seconds,
            });
        }
    }

    fn on_begin_world_sync(&mut self, _packet: BeginWorldSync, origin: &Origin) {
        if self.from_server(origin) {
            debug!("world sync started");
            self.world.begin_sync();
        }
    }

    fn on_weather(&mut self, packet: WeatherState, origin: &Origin) {
        if self.from_server(origin) {
            self.world.load_weather(packet);
        }
    }

    fn on_junctions(&mut self, packet: JunctionState, origin: &Origin) {
        if self.from_server(origin) {
            self.world.load_junctions(packet);
        }
    }

    fn on_turntables(&mut self, packet: TurntableState, origin: &Origin) {
        if self.from_server(origin) {
            self.world.load_turntables(packet);
        }
    }

    fn on_existing_vehicle(&mut self, packet: VehicleSnapshot, origin: &Origin) {
        if self.from_server(origin) {
            self.world.spawn_vehicle(packet);
        }
    }

    fn on_remove_loading_screen(&mut self, _packet: RemoveLoadingScreen, origin: &Origin) {
        if !self.from_server(origin) {
            return;
        }
        self.world.finish_sync();
        self.state = ClientState::Playing;
        info!("world synced, {} other players", self.players.len());
        self.events.push_back(ClientEvent::WorldSynced);
    }

    fn on_world_event<P: PacketBody>(&mut self, body: P, origin: &Origin) {
        if !self.from_server(origin) {
            return;
        }
        let packet: Packet = body.into();
        if let Ok(event) = WorldEvent::try_from(packet) {
            self.world.apply_event(event);
        }
    }
}

impl<T: Transport + 'static, W: WorldSink + 'static> NetworkRole for NetworkClient<T, W> {
    type Transport = T;

    fn manager(&mut self) -> &mut NetworkManager<T> {
        &mut self.manager
    }

    fn dispatcher(&self) -> Rc<Dispatcher<Self>> {
        Rc::clone(&self.dispatcher)
    }

    fn on_peer_connected(&mut self, peer: PeerHandle) {
        if self.state != ClientState::Connecting || self.server.map(|s| s.remote) != Some(peer.remote) {
            debug!("unexpected connection from peer {}", peer.id);
            return;
        }
        info!("login accepted");
        self.server = Some(peer);
        self.state = ClientState::Loading;
        self.events.push_back(ClientEvent::Connected);
    }

    fn on_peer_disconnected(&mut self, peer: PeerHandle, reason: DisconnectReason) {
        if self.server.is_some_and(|server| server != peer) {
            return;
        }

        match &reason {
            DisconnectReason::ConnectionRejected { payload } => {
                let deny = match self.manager.decode(payload) {
                    Ok(packet) => ServerDeny::try_from(packet).unwrap_or_default(),
                    Err(_) => ServerDeny::default(),
                };
                warn!("login denied: {}", deny.reason);
                self.events.push_back(ClientEvent::LoginDenied {
                    reason: deny.reason,
                    missing: deny.missing,
                    extra: deny.extra,
                });
            }
            other => {
                info!("disconnected from server: {other:?}");
                self.events.push_back(ClientEvent::Disconnected {
                    reason: other.clone(),
                });
            }
        }
        self.reset();
    }

    fn on_latency_update(&mut self, peer: PeerHandle, latency_ms: u32) {
        if Some(peer) == self.server {
            self.ping = latency_ms;
        }
    }

    fn on_connection_request(&mut self, request: ConnectionRequest) {
        debug!("client refuses incoming connection request {}", request.id);
        self.manager.turn_away(&request);
    }
}
