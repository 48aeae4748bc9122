use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::net::protocol::{DeliveryGuarantee, PeerId};
use crate::net::transport::PeerHandle;

use super::frame::{FrameBody, FrameHeader, UNTRACKED};
use super::tracking::{AckTracker, OrderedChannel, ReceiveTracker, SequencedChannel};

const MAX_PENDING_FRAMES: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerState {
    /// We asked the remote to connect and are waiting for its answer.
    Connecting {
        attempts: u32,
        last_attempt: Instant,
        payload: Vec<u8>,
    },
    Connected,
}

#[derive(Debug, Default)]
struct ChannelSequences {
    reliable_ordered: u32,
    reliable_unordered: u32,
    sequenced: u32,
    unreliable: u32,
}

impl ChannelSequences {
    fn next(&mut self, guarantee: DeliveryGuarantee) -> u32 {
        let counter = match guarantee {
            DeliveryGuarantee::ReliableOrdered => &mut self.reliable_ordered,
            DeliveryGuarantee::ReliableUnordered => &mut self.reliable_unordered,
            DeliveryGuarantee::Sequenced => &mut self.sequenced,
            DeliveryGuarantee::Unreliable => &mut self.unreliable,
        };
        let sequence = *counter;
        *counter = counter.wrapping_add(1);
        sequence
    }
}

/// What a received payload frame turned into.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Received {
    pub deliver: Vec<Vec<u8>>,
    pub stale: bool,
}

#[derive(Debug)]
pub struct Peer {
    pub id: PeerId,
    pub addr: SocketAddr,
    pub token: u64,
    pub state: PeerState,
    pub last_receive_time: Instant,
    pub last_ping_time: Instant,
    pub needs_ack: bool,
    send_sequence: u32,
    acks: AckTracker,
    frames: ReceiveTracker,
    channels: ChannelSequences,
    ordered: OrderedChannel,
    unordered: ReceiveTracker,
    sequenced: SequencedChannel,
}

impl Peer {
    pub fn connecting(id: PeerId, addr: SocketAddr, token: u64, payload: Vec<u8>) -> Self {
        let now = Instant::now();
        Self::new(
            id,
            addr,
            token,
            PeerState::Connecting {
                attempts: 1,
                last_attempt: now,
                payload,
            },
        )
    }

    pub fn accepted(id: PeerId, addr: SocketAddr, token: u64) -> Self {
        Self::new(id, addr, token, PeerState::Connected)
    }

    fn new(id: PeerId, addr: SocketAddr, token: u64, state: PeerState) -> Self {
        let now = Instant::now();
        Self {
            id,
            addr,
            token,
            state,
            last_receive_time: now,
            last_ping_time: now,
            needs_ack: false,
            send_sequence: 1,
            acks: AckTracker::new(MAX_PENDING_FRAMES),
            frames: ReceiveTracker::new(),
            channels: ChannelSequences::default(),
            ordered: OrderedChannel::default(),
            unordered: ReceiveTracker::new(),
            sequenced: SequencedChannel::default(),
        }
    }

    pub fn handle(&self) -> PeerHandle {
        PeerHandle::new(self.id, self.addr)
    }

    pub fn is_connected(&self) -> bool {
        self.state == PeerState::Connected
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_receive_time.elapsed() > timeout
    }

    pub fn touch(&mut self) {
        self.last_receive_time = Instant::now();
    }

    pub fn rtt_ms(&self) -> f32 {
        self.acks.srtt()
    }

    pub fn rtt_var(&self) -> f32 {
        self.acks.rtt_var()
    }

    pub fn unacked_count(&self) -> usize {
        self.acks.unacked_count()
    }

    /// Header for an untracked frame that still carries our ack state.
    pub fn ack_header(&self) -> FrameHeader {
        let (ack, ack_bitfield) = self.frames.ack_data();
        FrameHeader::new(UNTRACKED, ack, ack_bitfield)
    }

    /// Header for a frame the remote must acknowledge. Reliable bodies are
    /// kept so they can be resent if the ack never comes.
    pub fn tracked_header(&mut self, body: &FrameBody, reliable: bool) -> FrameHeader {
        let sequence = self.send_sequence;
        self.send_sequence = match self.send_sequence.wrapping_add(1) {
            UNTRACKED => 1,
            next => next,
        };
        self.acks
            .track_frame(sequence, reliable.then(|| body.clone()));

        let (ack, ack_bitfield) = self.frames.ack_data();
        self.needs_ack = false;
        FrameHeader::new(sequence, ack, ack_bitfield)
    }

    pub fn payload(&mut self, guarantee: DeliveryGuarantee, data: Vec<u8>) -> FrameBody {
        FrameBody::Payload {
            guarantee,
            channel_sequence: self.channels.next(guarantee),
            data,
        }
    }

    /// Records the header of an incoming frame. Returns false for a duplicate.
    pub fn record_header(&mut self, header: &FrameHeader) -> bool {
        self.acks.process_ack(header.ack, header.ack_bitfield);
        if !header.is_tracked() {
            return true;
        }
        self.needs_ack = true;
        self.frames.record_received(header.sequence)
    }

    pub fn take_expired(&mut self, now: Instant) -> super::tracking::Expired {
        self.acks.take_expired(now)
    }

    pub fn receive_payload(
        &mut self,
        guarantee: DeliveryGuarantee,
        channel_sequence: u32,
        data: Vec<u8>,
    ) -> Received {
        match guarantee {
            DeliveryGuarantee::ReliableOrdered => Received {
                deliver: self.ordered.receive(channel_sequence, data),
                stale: false,
            },
            DeliveryGuarantee::ReliableUnordered => {
                if self.unordered.record_received(channel_sequence) {
                    Received {
                        deliver: vec![data],
                        stale: false,
                    }
                } else {
                    Received::default()
                }
            }
            DeliveryGuarantee::Sequenced => {
                if self.sequenced.accept(channel_sequence) {
                    Received {
                        deliver: vec![data],
                        stale: false,
                    }
                } else {
                    Received {
                        deliver: Vec::new(),
                        stale: true,
                    }
                }
            }
            DeliveryGuarantee::Unreliable => Received {
                deliver: vec![data],
                stale: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> Peer {
        Peer::accepted(PeerId(1), "127.0.0.1:5000".parse().unwrap(), 99)
    }

    #[test]
    fn test_tracked_sequences_skip_untracked_marker() {
        let mut peer = peer();
        peer.send_sequence = u32::MAX;
        let first = peer.tracked_header(&FrameBody::Ack, false);
        let second = peer.tracked_header(&FrameBody::Ack, false);
        assert_eq!(first.sequence, u32::MAX);
        assert_eq!(second.sequence, 1);
    }

    #[test]
    fn test_channel_sequences_are_independent() {
        let mut peer = peer();
        let seq = |body: FrameBody| match body {
            FrameBody::Payload {
                channel_sequence, ..
            } => channel_sequence,
            _ => unreachable!(),
        };
        assert_eq!(seq(peer.payload(DeliveryGuarantee::ReliableOrdered, vec![])), 0);
        assert_eq!(seq(peer.payload(DeliveryGuarantee::ReliableOrdered, vec![])), 1);
        assert_eq!(seq(peer.payload(DeliveryGuarantee::Sequenced, vec![])), 0);
    }

    #[test]
    fn test_duplicate_frames_are_reported() {
        let mut peer = peer();
        let header = FrameHeader::new(5, 0, 0);
        assert!(peer.record_header(&header));
        assert!(peer.needs_ack);
        assert!(!peer.record_header(&header));
        assert!(peer.record_header(&FrameHeader::untracked()));
    }

    #[test]
    fn test_unordered_duplicates_are_dropped() {
        let mut peer = peer();
        let first = peer.receive_payload(DeliveryGuarantee::ReliableUnordered, 4, vec![4]);
        assert_eq!(first.deliver, vec![vec![4]]);
        let again = peer.receive_payload(DeliveryGuarantee::ReliableUnordered, 4, vec![4]);
        assert!(again.deliver.is_empty());
    }

    #[test]
    fn test_stale_sequenced_sample_is_flagged() {
        let mut peer = peer();
        peer.receive_payload(DeliveryGuarantee::Sequenced, 3, vec![3]);
        let stale = peer.receive_payload(DeliveryGuarantee::Sequenced, 2, vec![2]);
        assert!(stale.stale);
        assert!(stale.deliver.is_empty());
    }
}
