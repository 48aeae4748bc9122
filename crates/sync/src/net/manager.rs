use std::net::SocketAddr;
use std::rc::Rc;

use log::{debug, error, info, trace, warn};

use super::codec::{Codec, CodecError};
use super::dispatch::{Dispatcher, Origin};
use super::fanout::{Fanout, FanoutReport};
use super::packets::{Packet, PacketKind};
use super::protocol::PeerId;
use super::transport::{
    ConnectionRequest, DisconnectReason, NetworkError, PeerHandle, Transport, TransportEvent,
    TransportOptions,
};

/// Owns the transport and the codec shared by every role.
#[derive(Debug)]
pub struct NetworkManager<T: Transport> {
    transport: T,
    codec: Codec,
    options: TransportOptions,
}

impl<T: Transport> NetworkManager<T> {
    pub fn new(mut transport: T, options: TransportOptions) -> Self {
        transport.apply_options(&options);
        Self {
            transport,
            codec: Codec::with_builtin_types(),
            options,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    /// Reapplies transport options to the live transport. Connections stay up.
    pub fn apply_options(&mut self, options: TransportOptions) {
        if options == self.options {
            return;
        }
        info!(
            "applying transport options: nat_punch={} reuse_readers={} native_sockets={}",
            options.enable_nat_punch, options.reuse_packet_readers, options.use_native_sockets
        );
        self.transport.apply_options(&options);
        self.options = options;
    }

    pub fn poll_events(&mut self) -> Vec<TransportEvent> {
        self.transport.poll()
    }

    /// The returned bytes are only valid until the next `encode`.
    pub fn encode(&mut self, packet: &Packet) -> Result<&[u8], CodecError> {
        self.codec.encode(packet)
    }

    pub fn decode(&self, data: &[u8]) -> Result<Packet, CodecError> {
        self.codec.decode(data)
    }

    pub fn send_packet(&mut self, peer: PeerHandle, packet: &Packet) -> bool {
        let guarantee = packet.delivery();
        let bytes = match self.codec.encode(packet) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("failed to encode {:?}: {e}", packet.kind());
                return false;
            }
        };

        match self.transport.send(peer, bytes, guarantee) {
            Ok(()) => true,
            Err(e) => {
                warn!("sending {:?} to peer {} failed: {e}", packet.kind(), peer.id);
                false
            }
        }
    }

    /// Turns a pending connection away with `packet` as the answer.
    pub fn reject(&mut self, request: &ConnectionRequest, packet: &Packet) -> bool {
        let bytes: &[u8] = match self.codec.encode(packet) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("failed to encode {:?}: {e}", packet.kind());
                &[]
            }
        };

        match self.transport.reject(request, bytes) {
            Ok(()) => true,
            Err(e) => {
                warn!("rejecting connection request {} failed: {e}", request.id);
                false
            }
        }
    }

    /// Turns a pending connection away without an answer.
    pub fn turn_away(&mut self, request: &ConnectionRequest) -> bool {
        match self.transport.reject(request, &[]) {
            Ok(()) => true,
            Err(e) => {
                debug!("turning away connection request {} failed: {e}", request.id);
                false
            }
        }
    }

    pub fn send_to_all<I>(&mut self, targets: I, packet: &Packet) -> FanoutReport
    where
        I: IntoIterator<Item = PeerHandle>,
    {
        Fanout::new(&mut self.codec, &mut self.transport).to_all(targets, packet)
    }

    pub fn send_to_all_except<I>(&mut self, targets: I, packet: &Packet, exclude: PeerId) -> FanoutReport
    where
        I: IntoIterator<Item = PeerHandle>,
    {
        Fanout::new(&mut self.codec, &mut self.transport).to_all_except(targets, packet, exclude)
    }

    pub fn recycle(&mut self, buffer: Vec<u8>) {
        if self.options.reuse_packet_readers {
            self.transport.recycle(buffer);
        }
    }

    pub fn stop(&mut self) {
        if self.transport.is_running() {
            self.transport.stop();
        }
    }
}

/// Shared behaviour of the server and client roles. A role supplies its
/// connection lifecycle hooks and a dispatcher; `pump` drives everything.
pub trait NetworkRole: Sized + 'static {
    type Transport: Transport;

    fn manager(&mut self) -> &mut NetworkManager<Self::Transport>;

    fn dispatcher(&self) -> Rc<Dispatcher<Self>>;

    fn on_peer_connected(&mut self, peer: PeerHandle);

    fn on_peer_disconnected(&mut self, peer: PeerHandle, reason: DisconnectReason);

    fn on_latency_update(&mut self, peer: PeerHandle, latency_ms: u32);

    /// Decodes the request payload and routes it with the request as origin.
    /// Only a login may open a connection; anything else, or a payload that
    /// does not decode, is turned away with an empty answer.
    fn on_connection_request(&mut self, request: ConnectionRequest) {
        let packet = match self.manager().decode(&request.data) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("dropping malformed connection request {}: {e}", request.id);
                self.manager().turn_away(&request);
                return;
            }
        };

        let kind = packet.kind();
        if kind != PacketKind::ClientLogin {
            debug!("connection request {} carries {kind:?}, not a login", request.id);
            self.manager().turn_away(&request);
            return;
        }

        let dispatcher = self.dispatcher();
        if !dispatcher.route(self, packet, &Origin::Request(request.clone())) {
            debug!("no handler for {kind:?} in connection request {}", request.id);
            self.manager().turn_away(&request);
        }
    }

    fn on_message(&mut self, peer: PeerHandle, data: Vec<u8>) {
        let decoded = self.manager().decode(&data);
        self.manager().recycle(data);

        match decoded {
            Ok(packet) => {
                let dispatcher = self.dispatcher();
                let kind = packet.kind();
                if !dispatcher.route(self, packet, &Origin::Peer(peer)) {
                    trace!("no handler for {kind:?} from peer {}", peer.id);
                }
            }
            Err(e) => debug!("dropping malformed message from peer {}: {e}", peer.id),
        }
    }

    fn on_unconnected(&mut self, _addr: SocketAddr, data: Vec<u8>) {
        trace!("ignoring {} byte unconnected message", data.len());
    }

    fn on_network_error(&mut self, error: NetworkError) {
        error!("network error: {}", error.error);
    }

    /// Processes every pending transport event in order. Returns how many
    /// events were handled.
    fn pump(&mut self) -> usize {
        let events = self.manager().poll_events();
        let count = events.len();

        for event in events {
            match event {
                TransportEvent::ConnectionRequest(request) => self.on_connection_request(request),
                TransportEvent::Connected(peer) => self.on_peer_connected(peer),
                TransportEvent::Disconnected { peer, reason } => {
                    self.on_peer_disconnected(peer, reason)
                }
                TransportEvent::Message { peer, data, .. } => self.on_message(peer, data),
                TransportEvent::Latency { peer, latency_ms } => {
                    self.on_latency_update(peer, latency_ms)
                }
                TransportEvent::Unconnected { addr, data } => self.on_unconnected(addr, data),
                TransportEvent::NetworkError(error) => self.on_network_error(error),
            }
        }

        count
    }

    fn send_packet(&mut self, peer: PeerHandle, packet: &Packet) -> bool {
        self.manager().send_packet(peer, packet)
    }
}
