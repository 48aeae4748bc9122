use std::fmt;

use rkyv::{Archive, Deserialize, Serialize};

/// Bumped whenever the packet catalog changes shape.
pub const PROTOCOL_VERSION: u32 = 3;
pub const DEFAULT_PORT: u16 = 7777;

/// Upper bound on concurrently connected peers; `PeerId` is byte sized.
pub const MAX_PEERS: usize = 256;

/// Transport-assigned connection identifier, unique among connected peers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Archive, Serialize, Deserialize,
)]
pub struct PeerId(pub u8);

impl PeerId {
    pub const MIN: PeerId = PeerId(u8::MIN);
    pub const MAX: PeerId = PeerId(u8::MAX);

    pub const fn get(self) -> u8 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub fn from_index(index: usize) -> Option<PeerId> {
        u8::try_from(index).ok().map(PeerId)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u8> for PeerId {
    fn from(id: u8) -> Self {
        PeerId(id)
    }
}

/// Delivery contract a packet type is always sent under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
pub enum DeliveryGuarantee {
    ReliableOrdered,
    ReliableUnordered,
    /// Newest sample wins; older in-flight samples are dropped, never replayed.
    Sequenced,
    Unreliable,
}

impl DeliveryGuarantee {
    pub fn is_reliable(self) -> bool {
        matches!(self, Self::ReliableOrdered | Self::ReliableUnordered)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReliableOrdered => "reliable-ordered",
            Self::ReliableUnordered => "reliable-unordered",
            Self::Sequenced => "sequenced",
            Self::Unreliable => "unreliable",
        }
    }
}

/// Compound value types that can appear inside packets. A codec must register
/// every compound type a packet references before it can encode or decode it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CompoundType {
    Vector3,
    ModInfo,
    BogieData,
}

impl CompoundType {
    pub const ALL: [CompoundType; 3] = [Self::Vector3, Self::ModInfo, Self::BogieData];
}

impl fmt::Display for CompoundType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Vector3 => "Vector3",
            Self::ModInfo => "ModInfo",
            Self::BogieData => "BogieData",
        };
        f.write_str(name)
    }
}

pub trait CompoundValue {
    const TYPE: CompoundType;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_bounds() {
        assert_eq!(PeerId::from_index(0), Some(PeerId::MIN));
        assert_eq!(PeerId::from_index(255), Some(PeerId::MAX));
        assert_eq!(PeerId::from_index(MAX_PEERS), None);
        assert_eq!(PeerId::MAX.index() + 1, MAX_PEERS);
    }

    #[test]
    fn test_reliability_classes() {
        assert!(DeliveryGuarantee::ReliableOrdered.is_reliable());
        assert!(DeliveryGuarantee::ReliableUnordered.is_reliable());
        assert!(!DeliveryGuarantee::Sequenced.is_reliable());
        assert!(!DeliveryGuarantee::Unreliable.is_reliable());
    }
}
