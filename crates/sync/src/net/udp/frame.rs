use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize, rancor};

use crate::net::protocol::DeliveryGuarantee;
use crate::net::transport::TransportError;

pub const FRAME_MAGIC: u32 = 0x5253_594E;
pub const FRAME_VERSION: u32 = 1;

/// Largest datagram either side will send or accept.
pub const MAX_DATAGRAM_SIZE: usize = 16 * 1024;
/// Room left for the header and framing around an application payload.
pub const MAX_PAYLOAD_SIZE: usize = MAX_DATAGRAM_SIZE - 256;

/// Frames with this sequence are never tracked or acknowledged.
pub const UNTRACKED: u32 = 0;

const SEQUENCE_WRAP_THRESHOLD: u32 = u32::MAX / 2;

#[inline]
pub fn sequence_greater_than(s1: u32, s2: u32) -> bool {
    ((s1 > s2) && (s1 - s2 <= SEQUENCE_WRAP_THRESHOLD))
        || ((s1 < s2) && (s2 - s1 > SEQUENCE_WRAP_THRESHOLD))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct FrameHeader {
    pub magic: u32,
    pub version: u32,
    pub sequence: u32,
    pub ack: u32,
    pub ack_bitfield: u32,
}

impl FrameHeader {
    pub fn new(sequence: u32, ack: u32, ack_bitfield: u32) -> Self {
        Self {
            magic: FRAME_MAGIC,
            version: FRAME_VERSION,
            sequence,
            ack,
            ack_bitfield,
        }
    }

    pub fn untracked() -> Self {
        Self::new(UNTRACKED, 0, 0)
    }

    pub fn is_valid(&self) -> bool {
        self.magic == FRAME_MAGIC && self.version == FRAME_VERSION
    }

    pub fn is_tracked(&self) -> bool {
        self.sequence != UNTRACKED
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum FrameBody {
    ConnectRequest {
        token: u64,
        data: Vec<u8>,
    },
    ConnectAccept {
        token: u64,
    },
    ConnectReject {
        token: u64,
        data: Vec<u8>,
    },
    Payload {
        guarantee: DeliveryGuarantee,
        channel_sequence: u32,
        data: Vec<u8>,
    },
    Ack,
    Ping {
        timestamp_us: u64,
    },
    Pong {
        timestamp_us: u64,
    },
    Disconnect,
    NatPunch {
        token: u64,
    },
    NatPunchReply {
        token: u64,
    },
    Unconnected {
        data: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct Frame {
    pub header: FrameHeader,
    pub body: FrameBody,
}

impl Frame {
    pub fn new(header: FrameHeader, body: FrameBody) -> Self {
        Self { header, body }
    }

    pub fn untracked(body: FrameBody) -> Self {
        Self::new(FrameHeader::untracked(), body)
    }

    pub fn serialize(&self) -> Result<AlignedVec, TransportError> {
        rkyv::to_bytes::<rancor::Error>(self).map_err(TransportError::Frame)
    }

    /// Validates and decodes a received datagram. The bytes are copied into an
    /// aligned buffer first, so any slice is accepted.
    pub fn deserialize(data: &[u8]) -> Result<Self, TransportError> {
        let mut aligned = AlignedVec::<16>::with_capacity(data.len());
        aligned.extend_from_slice(data);
        rkyv::from_bytes::<Self, rancor::Error>(&aligned).map_err(TransportError::Frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_comparison() {
        assert!(sequence_greater_than(2, 1));
        assert!(!sequence_greater_than(1, 2));
        assert!(!sequence_greater_than(5, 5));
        assert!(sequence_greater_than(0, u32::MAX));
        assert!(!sequence_greater_than(u32::MAX, 0));
    }

    #[test]
    fn test_payload_frame_survives_the_wire() {
        let frame = Frame::new(
            FrameHeader::new(7, 3, 0b101),
            FrameBody::Payload {
                guarantee: DeliveryGuarantee::Sequenced,
                channel_sequence: 11,
                data: vec![1, 2, 3],
            },
        );
        let bytes = frame.serialize().unwrap();
        let decoded = Frame::deserialize(&bytes).unwrap();
        assert_eq!(decoded, frame);
        assert!(decoded.header.is_valid());
        assert!(decoded.header.is_tracked());
    }

    #[test]
    fn test_foreign_header_is_invalid() {
        let mut header = FrameHeader::untracked();
        assert!(header.is_valid());
        assert!(!header.is_tracked());
        header.version += 1;
        assert!(!header.is_valid());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(Frame::deserialize(&[0xAB; 5]).is_err());
        assert!(Frame::deserialize(&[]).is_err());
    }
}
