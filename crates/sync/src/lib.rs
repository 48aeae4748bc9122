pub mod client;
pub mod net;
pub mod server;
pub mod settings;
pub mod world;

pub use client::{ClientError, ClientEvent, ClientState, NetworkClient, RemotePlayer};
pub use net::{
    Codec, CodecError, DEFAULT_PORT, DeliveryGuarantee, DisconnectReason, MAX_PEERS,
    MemoryNetwork, MemoryTransport, ModInfo, NetworkManager, NetworkRole, NetworkStats,
    PROTOCOL_VERSION, Packet, PacketKind, PeerHandle, PeerId, Transport, TransportError,
    TransportEvent, TransportOptions, UdpTransport,
};
pub use server::{
    DenyReason, NetworkServer, PeerRegistry, Player, PlayerInfo, ServerEvent, ServerInfo,
    ServerStats, Verdict,
};
pub use settings::{Settings, SettingsError};
pub use world::{WorldCache, WorldError, WorldEvent, WorldSink, WorldState};
