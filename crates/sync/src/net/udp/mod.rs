//! Reliable UDP transport: acked frames over a single socket, with resends,
//! ordered reassembly, stale-sample dropping, ping based latency and
//! timeouts.

mod frame;
mod peer;
mod tracking;

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use super::protocol::{DeliveryGuarantee, MAX_PEERS, PeerId};
use super::stats::{NetworkStats, rand_u64};
use super::transport::{
    ConnectionRequest, DisconnectReason, NetworkError, PeerHandle, RequestId, Transport,
    TransportError, TransportEvent, TransportOptions,
};

pub use frame::{MAX_DATAGRAM_SIZE, MAX_PAYLOAD_SIZE};

use frame::{Frame, FrameBody, FrameHeader};
use peer::{Peer, PeerState};

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(250);
const MAX_CONNECT_ATTEMPTS: u32 = 20;
const BLOCKING_READ_TIMEOUT: Duration = Duration::from_millis(1);
const MAX_POOLED_BUFFERS: usize = 64;

#[derive(Debug)]
struct PendingRequest {
    addr: SocketAddr,
    token: u64,
}

pub struct UdpTransport {
    bind_ip: IpAddr,
    socket: Option<UdpSocket>,
    options: TransportOptions,
    peers: BTreeMap<PeerId, Peer>,
    peers_by_addr: HashMap<SocketAddr, PeerId>,
    requests: HashMap<RequestId, PendingRequest>,
    next_request: u64,
    events: Vec<TransportEvent>,
    stats: NetworkStats,
    recv_buffer: Vec<u8>,
    buffers: Vec<Vec<u8>>,
    epoch: Instant,
}

impl UdpTransport {
    pub fn new(bind_ip: IpAddr) -> Self {
        Self {
            bind_ip,
            socket: None,
            options: TransportOptions::default(),
            peers: BTreeMap::new(),
            peers_by_addr: HashMap::new(),
            requests: HashMap::new(),
            next_request: 0,
            events: Vec::new(),
            stats: NetworkStats::default(),
            recv_buffer: vec![0u8; MAX_DATAGRAM_SIZE],
            buffers: Vec::new(),
            epoch: Instant::now(),
        }
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn peer_rtt(&self, id: PeerId) -> Option<f32> {
        self.peers.get(&id).map(Peer::rtt_ms)
    }

    /// Sends a punch to an address we have no connection with. A transport on
    /// the other side answers if it has NAT punching enabled.
    pub fn send_nat_punch(&mut self, addr: SocketAddr) -> Result<u64, TransportError> {
        let token = rand_u64();
        self.send_frame(addr, &Frame::untracked(FrameBody::NatPunch { token }))?;
        Ok(token)
    }

    pub fn send_unconnected(&mut self, addr: SocketAddr, data: &[u8]) -> Result<(), TransportError> {
        if data.len() > MAX_PAYLOAD_SIZE {
            return Err(TransportError::PayloadTooLarge {
                size: data.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        self.send_frame(
            addr,
            &Frame::untracked(FrameBody::Unconnected {
                data: data.to_vec(),
            }),
        )
    }

    fn socket(&self) -> Result<&UdpSocket, TransportError> {
        self.socket.as_ref().ok_or(TransportError::NotRunning)
    }

    fn configure_socket(&self) -> io::Result<()> {
        let Some(socket) = &self.socket else {
            return Ok(());
        };
        if self.options.use_native_sockets {
            socket.set_nonblocking(true)
        } else {
            socket.set_nonblocking(false)?;
            socket.set_read_timeout(Some(BLOCKING_READ_TIMEOUT))
        }
    }

    fn lowest_free_id(&self) -> Option<PeerId> {
        (0..MAX_PEERS)
            .filter_map(PeerId::from_index)
            .find(|id| !self.peers.contains_key(id))
    }

    fn timestamp_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    fn take_buffer(&mut self, data: Vec<u8>) -> Vec<u8> {
        if !self.options.reuse_packet_readers {
            return data;
        }
        match self.buffers.pop() {
            Some(mut buffer) => {
                buffer.clear();
                buffer.extend_from_slice(&data);
                buffer
            }
            None => data,
        }
    }

    fn send_frame(&mut self, addr: SocketAddr, frame: &Frame) -> Result<(), TransportError> {
        let bytes = frame.serialize()?;
        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(TransportError::PayloadTooLarge {
                size: bytes.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }
        let sent = self.socket()?.send_to(&bytes, addr)?;
        self.stats.record_sent(sent);
        Ok(())
    }

    /// Sends a body to a peer under a fresh tracked sequence.
    fn send_tracked(
        &mut self,
        id: PeerId,
        body: FrameBody,
        reliable: bool,
    ) -> Result<(), TransportError> {
        let peer = self
            .peers
            .get_mut(&id)
            .ok_or(TransportError::UnknownPeer(id))?;
        let header = peer.tracked_header(&body, reliable);
        let addr = peer.addr;
        self.send_frame(addr, &Frame::new(header, body))
    }

    fn report(&mut self, addr: Option<SocketAddr>, error: TransportError) {
        let error = match error {
            TransportError::Io(error) => error,
            other => io::Error::other(other.to_string()),
        };
        self.events
            .push(TransportEvent::NetworkError(NetworkError { addr, error }));
    }

    fn remove_peer(&mut self, id: PeerId, reason: DisconnectReason) {
        if let Some(peer) = self.peers.remove(&id) {
            self.peers_by_addr.remove(&peer.addr);
            self.events.push(TransportEvent::Disconnected {
                peer: peer.handle(),
                reason,
            });
        }
    }

    fn receive_datagrams(&mut self) {
        loop {
            let received = match &self.socket {
                Some(socket) => socket.recv_from(&mut self.recv_buffer),
                None => return,
            };

            match received {
                Ok((size, addr)) => {
                    self.stats.record_received(size);
                    match Frame::deserialize(&self.recv_buffer[..size]) {
                        Ok(frame) if frame.header.is_valid() => self.handle_frame(addr, frame),
                        Ok(_) => trace!("dropping frame with foreign header"),
                        Err(e) => trace!("dropping undecodable datagram: {e}"),
                    }
                }
                Err(ref e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    break;
                }
                // ICMP unreachable from an earlier send; the peer timeout handles it.
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(error) => {
                    self.events
                        .push(TransportEvent::NetworkError(NetworkError { addr: None, error }));
                    break;
                }
            }
        }
    }

    fn handle_frame(&mut self, addr: SocketAddr, frame: Frame) {
        let Frame { header, body } = frame;

        match body {
            FrameBody::ConnectRequest { token, data } => self.handle_connect_request(addr, token, data),
            FrameBody::NatPunch { token } => {
                if self.options.enable_nat_punch {
                    if let Err(e) = self.send_frame(addr, &Frame::untracked(FrameBody::NatPunchReply { token })) {
                        self.report(Some(addr), e);
                    }
                }
            }
            FrameBody::NatPunchReply { token } => self.events.push(TransportEvent::Unconnected {
                addr,
                data: token.to_le_bytes().to_vec(),
            }),
            FrameBody::Unconnected { data } => {
                self.events.push(TransportEvent::Unconnected { addr, data })
            }
            body => {
                let Some(&id) = self.peers_by_addr.get(&addr) else {
                    trace!("dropping {body:?} from unknown address");
                    return;
                };
                self.handle_peer_frame(id, header, body);
            }
        }
    }

    fn handle_connect_request(&mut self, addr: SocketAddr, token: u64, data: Vec<u8>) {
        if let Some(&id) = self.peers_by_addr.get(&addr) {
            let same = self.peers.get(&id).is_some_and(|peer| peer.token == token);
            if same {
                // Our accept got lost; answer again.
                if let Err(e) = self.send_frame(addr, &Frame::untracked(FrameBody::ConnectAccept { token })) {
                    self.report(Some(addr), e);
                }
                return;
            }
            debug!("peer {id} reconnected with a new token");
            self.remove_peer(id, DisconnectReason::RemoteClose);
        }

        if self
            .requests
            .values()
            .any(|request| request.addr == addr && request.token == token)
        {
            return;
        }
        self.requests.retain(|_, request| request.addr != addr);

        let id = RequestId(self.next_request);
        self.next_request += 1;
        self.requests.insert(id, PendingRequest { addr, token });
        self.events
            .push(TransportEvent::ConnectionRequest(ConnectionRequest {
                id,
                remote: addr,
                data,
            }));
    }

    fn handle_peer_frame(&mut self, id: PeerId, header: FrameHeader, body: FrameBody) {
        let Some(peer) = self.peers.get_mut(&id) else {
            return;
        };
        peer.touch();
        if !peer.record_header(&header) {
            trace!("duplicate frame {} from peer {id}", header.sequence);
            return;
        }

        match body {
            FrameBody::ConnectAccept { token } => {
                if peer.token == token && !peer.is_connected() {
                    peer.state = PeerState::Connected;
                    let handle = peer.handle();
                    self.events.push(TransportEvent::Connected(handle));
                }
            }
            FrameBody::ConnectReject { token, data } => {
                if peer.token == token && !peer.is_connected() {
                    self.remove_peer(id, DisconnectReason::ConnectionRejected { payload: data });
                }
            }
            FrameBody::Payload {
                guarantee,
                channel_sequence,
                data,
            } => {
                if !peer.is_connected() {
                    return;
                }
                let handle = peer.handle();
                let received = peer.receive_payload(guarantee, channel_sequence, data);
                if received.stale {
                    self.stats.packets_dropped_stale += 1;
                }
                for data in received.deliver {
                    let data = self.take_buffer(data);
                    self.events.push(TransportEvent::Message {
                        peer: handle,
                        data,
                        guarantee,
                    });
                }
            }
            FrameBody::Ping { timestamp_us } => {
                let header = peer.ack_header();
                let addr = peer.addr;
                if let Err(e) = self.send_frame(addr, &Frame::new(header, FrameBody::Pong { timestamp_us })) {
                    self.report(Some(addr), e);
                }
            }
            FrameBody::Pong { timestamp_us } => {
                let handle = peer.handle();
                let rtt_us = self.timestamp_us().saturating_sub(timestamp_us);
                let latency_ms = (rtt_us / 2 / 1000) as u32;
                self.stats.rtt_ms = rtt_us as f32 / 1000.0;
                self.events.push(TransportEvent::Latency {
                    peer: handle,
                    latency_ms,
                });
            }
            FrameBody::Disconnect => self.remove_peer(id, DisconnectReason::RemoteClose),
            FrameBody::Ack
            | FrameBody::ConnectRequest { .. }
            | FrameBody::NatPunch { .. }
            | FrameBody::NatPunchReply { .. }
            | FrameBody::Unconnected { .. } => {}
        }
    }

    fn maintain(&mut self) {
        let now = Instant::now();
        let timeout = Duration::from_millis(u64::from(self.options.disconnect_timeout_ms));
        let ping_interval = Duration::from_millis(u64::from(self.options.ping_interval_ms));
        let ids: Vec<PeerId> = self.peers.keys().copied().collect();

        for id in ids {
            let Some(peer) = self.peers.get_mut(&id) else {
                continue;
            };

            if let PeerState::Connecting {
                attempts,
                last_attempt,
                payload,
            } = &mut peer.state
            {
                if now.duration_since(*last_attempt) < CONNECT_RETRY_INTERVAL {
                    continue;
                }
                if *attempts >= MAX_CONNECT_ATTEMPTS {
                    self.remove_peer(id, DisconnectReason::Timeout);
                    continue;
                }
                *attempts += 1;
                *last_attempt = now;
                let frame = Frame::untracked(FrameBody::ConnectRequest {
                    token: peer.token,
                    data: payload.clone(),
                });
                let addr = peer.addr;
                if let Err(e) = self.send_frame(addr, &frame) {
                    self.report(Some(addr), e);
                }
                continue;
            }

            if peer.is_timed_out(timeout) {
                self.remove_peer(id, DisconnectReason::Timeout);
                continue;
            }

            let expired = peer.take_expired(now);
            self.stats.packets_lost += expired.lost as u64;
            for body in expired.resend {
                self.stats.packets_resent += 1;
                if let Err(e) = self.send_tracked(id, body, true) {
                    self.report(None, e);
                }
            }

            let Some(peer) = self.peers.get_mut(&id) else {
                continue;
            };
            let addr = peer.addr;
            if now.duration_since(peer.last_ping_time) >= ping_interval {
                peer.last_ping_time = now;
                let header = peer.ack_header();
                peer.needs_ack = false;
                let timestamp_us = self.timestamp_us();
                if let Err(e) = self.send_frame(addr, &Frame::new(header, FrameBody::Ping { timestamp_us })) {
                    self.report(Some(addr), e);
                }
            } else if peer.needs_ack {
                peer.needs_ack = false;
                let header = peer.ack_header();
                if let Err(e) = self.send_frame(addr, &Frame::new(header, FrameBody::Ack)) {
                    self.report(Some(addr), e);
                }
            }
        }

        let unacked: usize = self.peers.values().map(Peer::unacked_count).sum();
        if self.stats.packets_sent > 0 {
            self.stats.packet_loss_percent =
                self.stats.packets_lost as f32 / self.stats.packets_sent as f32 * 100.0;
        }
        if let Some(peer) = self.peers.values().next() {
            self.stats.rtt_variance = peer.rtt_var();
        }
        trace!("{unacked} frames awaiting ack");
    }
}

impl Transport for UdpTransport {
    fn start(&mut self, port: u16) -> Result<(), TransportError> {
        if self.socket.is_some() {
            return Ok(());
        }
        let socket = UdpSocket::bind(SocketAddr::new(self.bind_ip, port))?;
        self.socket = Some(socket);
        self.configure_socket()?;
        self.epoch = Instant::now();
        debug!("udp transport bound to {:?}", self.local_addr());
        Ok(())
    }

    fn connect(&mut self, addr: SocketAddr, payload: &[u8]) -> Result<PeerHandle, TransportError> {
        self.socket()?;
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(TransportError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        if let Some(&id) = self.peers_by_addr.get(&addr) {
            return Ok(PeerHandle::new(id, addr));
        }

        let id = self
            .lowest_free_id()
            .ok_or(TransportError::PeerIdsExhausted)?;
        let token = rand_u64();
        self.send_frame(
            addr,
            &Frame::untracked(FrameBody::ConnectRequest {
                token,
                data: payload.to_vec(),
            }),
        )?;

        self.peers
            .insert(id, Peer::connecting(id, addr, token, payload.to_vec()));
        self.peers_by_addr.insert(addr, id);
        Ok(PeerHandle::new(id, addr))
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        if self.socket.is_some() {
            self.receive_datagrams();
            self.maintain();
        }
        std::mem::take(&mut self.events)
    }

    fn accept(&mut self, request: &ConnectionRequest) -> Result<PeerHandle, TransportError> {
        self.socket()?;
        let pending = self
            .requests
            .remove(&request.id)
            .ok_or(TransportError::UnknownRequest(request.id))?;
        let id = self
            .lowest_free_id()
            .ok_or(TransportError::PeerIdsExhausted)?;

        let peer = Peer::accepted(id, pending.addr, pending.token);
        let handle = peer.handle();
        let header = peer.ack_header();
        self.peers.insert(id, peer);
        self.peers_by_addr.insert(pending.addr, id);

        self.send_frame(
            pending.addr,
            &Frame::new(
                header,
                FrameBody::ConnectAccept {
                    token: pending.token,
                },
            ),
        )?;
        self.events.push(TransportEvent::Connected(handle));
        Ok(handle)
    }

    fn reject(&mut self, request: &ConnectionRequest, payload: &[u8]) -> Result<(), TransportError> {
        let pending = self
            .requests
            .remove(&request.id)
            .ok_or(TransportError::UnknownRequest(request.id))?;
        let frame = Frame::untracked(FrameBody::ConnectReject {
            token: pending.token,
            data: payload.to_vec(),
        });
        // Sent twice; there is no connection left to retry on.
        self.send_frame(pending.addr, &frame)?;
        self.send_frame(pending.addr, &frame)
    }

    fn send(
        &mut self,
        peer: PeerHandle,
        data: &[u8],
        guarantee: DeliveryGuarantee,
    ) -> Result<(), TransportError> {
        self.socket()?;
        if data.len() > MAX_PAYLOAD_SIZE {
            return Err(TransportError::PayloadTooLarge {
                size: data.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let remote = self
            .peers
            .get_mut(&peer.id)
            .ok_or(TransportError::UnknownPeer(peer.id))?;
        if !remote.is_connected() {
            return Err(TransportError::NotConnected(peer.id));
        }

        let body = remote.payload(guarantee, data.to_vec());
        self.send_tracked(peer.id, body, guarantee.is_reliable())
    }

    fn disconnect(&mut self, peer: PeerHandle) -> Result<(), TransportError> {
        let remote = self
            .peers
            .get(&peer.id)
            .ok_or(TransportError::UnknownPeer(peer.id))?;
        let frame = Frame::new(remote.ack_header(), FrameBody::Disconnect);
        let addr = remote.addr;

        let sent = self
            .send_frame(addr, &frame)
            .and_then(|()| self.send_frame(addr, &frame));
        self.remove_peer(peer.id, DisconnectReason::LocalClose);
        sent
    }

    fn connected_count(&self) -> usize {
        self.peers.values().filter(|peer| peer.is_connected()).count()
    }

    fn apply_options(&mut self, options: &TransportOptions) {
        self.options = options.clone();
        if !options.reuse_packet_readers {
            self.buffers.clear();
        }
        if let Err(e) = self.configure_socket() {
            warn!("failed to reconfigure socket: {e}");
        }
    }

    fn recycle(&mut self, buffer: Vec<u8>) {
        if self.options.reuse_packet_readers && self.buffers.len() < MAX_POOLED_BUFFERS {
            self.buffers.push(buffer);
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    fn is_running(&self) -> bool {
        self.socket.is_some()
    }

    fn stop(&mut self) {
        let handles: Vec<PeerHandle> = self.peers.values().map(Peer::handle).collect();
        for handle in handles {
            if let Err(e) = self.disconnect(handle) {
                debug!("dropping peer {} on stop failed: {e}", handle.id);
            }
        }
        self.requests.clear();
        self.socket = None;
    }
}
