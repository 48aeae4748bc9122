use log::{error, warn};

use super::codec::Codec;
use super::packets::Packet;
use super::protocol::PeerId;
use super::transport::{PeerHandle, Transport};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: usize,
    pub failed: usize,
}

/// One packet to many peers. The packet is encoded once and the same bytes
/// are handed to every send call before the codec buffer can be reused.
pub struct Fanout<'a, T: Transport> {
    codec: &'a mut Codec,
    transport: &'a mut T,
}

impl<'a, T: Transport> Fanout<'a, T> {
    pub fn new(codec: &'a mut Codec, transport: &'a mut T) -> Self {
        Self { codec, transport }
    }

    pub fn to_all<I>(self, targets: I, packet: &Packet) -> FanoutReport
    where
        I: IntoIterator<Item = PeerHandle>,
    {
        self.send(targets, packet, None)
    }

    pub fn to_all_except<I>(self, targets: I, packet: &Packet, exclude: PeerId) -> FanoutReport
    where
        I: IntoIterator<Item = PeerHandle>,
    {
        self.send(targets, packet, Some(exclude))
    }

    fn send<I>(self, targets: I, packet: &Packet, exclude: Option<PeerId>) -> FanoutReport
    where
        I: IntoIterator<Item = PeerHandle>,
    {
        let mut report = FanoutReport::default();
        let guarantee = packet.delivery();

        let bytes = match self.codec.encode(packet) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("failed to encode {:?} for broadcast: {e}", packet.kind());
                return report;
            }
        };

        for peer in targets {
            if Some(peer.id) == exclude {
                continue;
            }
            match self.transport.send(peer, bytes, guarantee) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!("broadcast of {:?} to peer {} failed: {e}", packet.kind(), peer.id);
                    report.failed += 1;
                }
            }
        }

        report
    }
}
