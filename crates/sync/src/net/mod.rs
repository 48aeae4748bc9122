mod codec;
mod dispatch;
mod fanout;
mod manager;
mod memory;
mod packets;
mod protocol;
mod stats;
mod transport;
mod types;
pub mod udp;

pub use codec::{Codec, CodecError};
pub use dispatch::{Dispatcher, Origin};
pub use fanout::{Fanout, FanoutReport};
pub use manager::{NetworkManager, NetworkRole};
pub use memory::{MemoryNetwork, MemoryTransport};
pub use packets::*;
pub use protocol::{
    CompoundType, CompoundValue, DEFAULT_PORT, DeliveryGuarantee, MAX_PEERS, PROTOCOL_VERSION,
    PeerId,
};
pub use stats::{NetworkStats, PacketLossSimulation};
pub use transport::{
    ConnectionRequest, DisconnectReason, NetworkError, PeerHandle, RequestId, Transport,
    TransportError, TransportEvent, TransportOptions,
};
pub use types::{BogieData, ModInfo, Vector3};
pub use udp::UdpTransport;
