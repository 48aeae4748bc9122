//! The closed packet catalog.
//!
//! Every packet is a plain data record. `Packet` is the tagged union that goes
//! over the wire; its discriminant is the routing tag. The delivery guarantee
//! and the compound types a packet references are fixed per packet kind.

mod login;
mod player;
mod world;

use rkyv::{Archive, Deserialize, Serialize};

use super::protocol::{CompoundType, DeliveryGuarantee};

pub use login::{ClientLogin, ClientReady, ServerDeny};
pub use player::{
    PingUpdate, PlayerDisconnect, PlayerJoined, PlayerPosition, PositionSample, RosterEntry,
    TimeAdvance, TimeAdvanceRequest, TimeSync,
};
pub use world::{
    BeginWorldSync, BogieUpdate, ChangeJunction, CockFiddle, HoseConnected, HoseDisconnected,
    JunctionState, RemoveLoadingScreen, RotateTurntable, SpawnNewVehicle, TrainCouple,
    TrainUncouple, TurntableState, VehicleSnapshot, WeatherState,
};

/// A concrete packet record that knows which catalog entry it is.
pub trait PacketBody: Into<Packet> + TryFrom<Packet, Error = Packet> {
    const KIND: PacketKind;
}

macro_rules! packet_catalog {
    ($($variant:ident($body:ty) => $delivery:ident [$($compound:ident),*];)+) => {
        #[allow(clippy::large_enum_variant)]
        #[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
        pub enum Packet {
            $($variant($body),)+
        }

        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum PacketKind {
            $($variant,)+
        }

        impl Packet {
            pub fn kind(&self) -> PacketKind {
                match self {
                    $(Packet::$variant(_) => PacketKind::$variant,)+
                }
            }
        }

        impl PacketKind {
            pub const ALL: &'static [PacketKind] = &[$(PacketKind::$variant,)+];

            pub fn delivery(self) -> DeliveryGuarantee {
                match self {
                    $(PacketKind::$variant => DeliveryGuarantee::$delivery,)+
                }
            }

            pub fn compound_types(self) -> &'static [CompoundType] {
                match self {
                    $(PacketKind::$variant => &[$(CompoundType::$compound),*],)+
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(PacketKind::$variant => stringify!($variant),)+
                }
            }
        }

        $(
            impl From<$body> for Packet {
                fn from(body: $body) -> Self {
                    Packet::$variant(body)
                }
            }

            impl TryFrom<Packet> for $body {
                type Error = Packet;

                fn try_from(packet: Packet) -> Result<Self, Packet> {
                    match packet {
                        Packet::$variant(body) => Ok(body),
                        #[allow(unreachable_patterns)]
                        other => Err(other),
                    }
                }
            }

            impl PacketBody for $body {
                const KIND: PacketKind = PacketKind::$variant;
            }
        )+
    };
}

packet_catalog! {
    // client -> server
    ClientLogin(ClientLogin) => ReliableOrdered [ModInfo];
    ClientReady(ClientReady) => ReliableOrdered [];
    PositionSample(PositionSample) => Sequenced [Vector3];
    TimeAdvanceRequest(TimeAdvanceRequest) => ReliableOrdered [];

    // server -> client
    ServerDeny(ServerDeny) => ReliableOrdered [ModInfo];
    PlayerJoined(PlayerJoined) => ReliableOrdered [];
    PlayerDisconnect(PlayerDisconnect) => ReliableOrdered [];
    PlayerPosition(PlayerPosition) => Sequenced [Vector3];
    PingUpdate(PingUpdate) => ReliableOrdered [];
    TimeSync(TimeSync) => ReliableOrdered [];
    TimeAdvance(TimeAdvance) => ReliableOrdered [];
    BeginWorldSync(BeginWorldSync) => ReliableOrdered [];
    RosterEntry(RosterEntry) => ReliableOrdered [Vector3];
    Weather(WeatherState) => ReliableOrdered [];
    JunctionState(JunctionState) => ReliableOrdered [];
    TurntableState(TurntableState) => ReliableOrdered [];
    SpawnExistingVehicle(VehicleSnapshot) => ReliableOrdered [Vector3, BogieData];
    SpawnNewVehicle(SpawnNewVehicle) => ReliableOrdered [Vector3];
    BogieUpdate(BogieUpdate) => ReliableOrdered [BogieData];
    RemoveLoadingScreen(RemoveLoadingScreen) => ReliableOrdered [];

    // either direction
    ChangeJunction(ChangeJunction) => ReliableOrdered [];
    RotateTurntable(RotateTurntable) => ReliableOrdered [];
    TrainCouple(TrainCouple) => ReliableOrdered [];
    TrainUncouple(TrainUncouple) => ReliableOrdered [];
    HoseConnected(HoseConnected) => ReliableOrdered [];
    HoseDisconnected(HoseDisconnected) => ReliableOrdered [];
    CockFiddle(CockFiddle) => ReliableOrdered [];
}

impl Packet {
    pub fn delivery(&self) -> DeliveryGuarantee {
        self.kind().delivery()
    }
}
