//! In-process transport. Endpoints on one `MemoryNetwork` talk to each other by
//! address without touching a socket, which is what a listen server uses for
//! its own host player and what the session tests run on.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Instant;

use log::debug;

use super::protocol::{DeliveryGuarantee, MAX_PEERS, PeerId};
use super::stats::{NetworkStats, PacketLossSimulation};
use super::transport::{
    ConnectionRequest, DisconnectReason, PeerHandle, RequestId, Transport, TransportError,
    TransportEvent, TransportOptions,
};

const MAX_POOLED_BUFFERS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LinkKey {
    id: PeerId,
    generation: u64,
}

#[derive(Debug)]
struct Link {
    remote: SocketAddr,
    /// Our peer as the remote endpoint knows it. `None` while connecting.
    remote_link: Option<LinkKey>,
    generation: u64,
    closing: bool,
    last_ordered_release: Instant,
    send_sequence: u64,
    last_received_sequence: Option<u64>,
}

#[derive(Debug)]
struct PendingRequest {
    remote: SocketAddr,
    remote_link: LinkKey,
}

#[derive(Debug)]
struct Delivery {
    release: Instant,
    order: u64,
    link: Option<LinkKey>,
    sequence: Option<u64>,
    event: TransportEvent,
}

impl PartialEq for Delivery {
    fn eq(&self, other: &Self) -> bool {
        self.release == other.release && self.order == other.order
    }
}

impl Eq for Delivery {}

impl PartialOrd for Delivery {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Delivery {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap
        (other.release, other.order).cmp(&(self.release, self.order))
    }
}

#[derive(Debug, Default)]
struct Endpoint {
    running: bool,
    options: TransportOptions,
    simulation: PacketLossSimulation,
    links: BTreeMap<PeerId, Link>,
    pending: HashMap<RequestId, PendingRequest>,
    queue: BinaryHeap<Delivery>,
    buffers: Vec<Vec<u8>>,
    stats: NetworkStats,
}

impl Endpoint {
    fn lowest_free_id(&self) -> Option<PeerId> {
        (0..MAX_PEERS)
            .filter_map(PeerId::from_index)
            .find(|id| !self.links.contains_key(id))
    }

    fn link_mut(&mut self, key: LinkKey) -> Option<&mut Link> {
        self.links
            .get_mut(&key.id)
            .filter(|link| link.generation == key.generation)
    }

    fn take_buffer(&mut self, data: &[u8]) -> Vec<u8> {
        let mut buffer = if self.options.reuse_packet_readers {
            self.buffers.pop().unwrap_or_default()
        } else {
            Vec::new()
        };
        buffer.clear();
        buffer.extend_from_slice(data);
        buffer
    }
}

#[derive(Debug, Default)]
struct NetworkState {
    endpoints: HashMap<SocketAddr, Endpoint>,
    next_order: u64,
    next_request: u64,
    next_generation: u64,
}

impl NetworkState {
    fn endpoint(&mut self, addr: SocketAddr) -> &mut Endpoint {
        self.endpoints.entry(addr).or_default()
    }

    fn generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn enqueue(
        &mut self,
        to: SocketAddr,
        release: Instant,
        link: Option<LinkKey>,
        sequence: Option<u64>,
        event: TransportEvent,
    ) {
        let order = self.next_order;
        self.next_order += 1;

        if let Some(endpoint) = self.endpoints.get_mut(&to) {
            endpoint.queue.push(Delivery {
                release,
                order,
                link,
                sequence,
                event,
            });
        }
    }

    /// Marks the remote half of a link as closing so it can no longer send.
    fn close_remote(&mut self, remote: SocketAddr, key: LinkKey) -> bool {
        match self
            .endpoints
            .get_mut(&remote)
            .and_then(|endpoint| endpoint.link_mut(key))
        {
            Some(link) if !link.closing => {
                link.closing = true;
                true
            }
            _ => false,
        }
    }
}

/// A set of in-process endpoints that can reach each other.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    state: Rc<RefCell<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoint(&self, addr: SocketAddr) -> MemoryTransport {
        self.state.borrow_mut().endpoint(addr);
        MemoryTransport {
            addr,
            network: self.clone(),
        }
    }
}

#[derive(Debug)]
pub struct MemoryTransport {
    addr: SocketAddr,
    network: MemoryNetwork,
}

impl MemoryTransport {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Applies loss and latency to everything this endpoint sends.
    pub fn set_simulation(&self, simulation: PacketLossSimulation) {
        self.network.state.borrow_mut().endpoint(self.addr).simulation = simulation;
    }

    /// Queues a latency sample for `peer` as if the transport had measured it.
    pub fn inject_latency(&self, peer: PeerId, latency_ms: u32) -> Result<(), TransportError> {
        let mut state = self.network.state.borrow_mut();
        let endpoint = state.endpoint(self.addr);
        let link = endpoint
            .links
            .get(&peer)
            .ok_or(TransportError::UnknownPeer(peer))?;
        let handle = PeerHandle::new(peer, link.remote);
        let key = LinkKey {
            id: peer,
            generation: link.generation,
        };

        state.enqueue(
            self.addr,
            Instant::now(),
            Some(key),
            None,
            TransportEvent::Latency {
                peer: handle,
                latency_ms,
            },
        );
        Ok(())
    }

    pub fn stats(&self) -> NetworkStats {
        self.network
            .state
            .borrow()
            .endpoints
            .get(&self.addr)
            .map(|endpoint| endpoint.stats.clone())
            .unwrap_or_default()
    }

    /// Options most recently pushed through `Transport::apply_options`.
    pub fn options(&self) -> TransportOptions {
        self.network
            .state
            .borrow()
            .endpoints
            .get(&self.addr)
            .map(|endpoint| endpoint.options.clone())
            .unwrap_or_default()
    }

    /// Receive buffers parked for reuse.
    pub fn pooled_buffers(&self) -> usize {
        self.network
            .state
            .borrow()
            .endpoints
            .get(&self.addr)
            .map_or(0, |endpoint| endpoint.buffers.len())
    }

    fn ensure_running(state: &mut NetworkState, addr: SocketAddr) -> Result<(), TransportError> {
        if state.endpoint(addr).running {
            Ok(())
        } else {
            Err(TransportError::NotRunning)
        }
    }
}

impl Transport for MemoryTransport {
    fn start(&mut self, port: u16) -> Result<(), TransportError> {
        if port != 0 && port != self.addr.port() {
            debug!(
                "memory endpoint {} ignores requested port {}",
                self.addr, port
            );
        }
        self.network.state.borrow_mut().endpoint(self.addr).running = true;
        Ok(())
    }

    fn connect(&mut self, addr: SocketAddr, payload: &[u8]) -> Result<PeerHandle, TransportError> {
        let mut state = self.network.state.borrow_mut();
        Self::ensure_running(&mut state, self.addr)?;

        if !state.endpoints.get(&addr).is_some_and(|e| e.running) {
            return Err(TransportError::Unreachable(addr));
        }

        let generation = state.generation();
        let endpoint = state.endpoint(self.addr);
        let id = endpoint
            .lowest_free_id()
            .ok_or(TransportError::PeerIdsExhausted)?;
        let release = Instant::now() + endpoint.simulation.delay();
        endpoint.links.insert(
            id,
            Link {
                remote: addr,
                remote_link: None,
                generation,
                closing: false,
                last_ordered_release: release,
                send_sequence: 0,
                last_received_sequence: None,
            },
        );

        let request = RequestId(state.next_request);
        state.next_request += 1;
        state.endpoint(addr).pending.insert(
            request,
            PendingRequest {
                remote: self.addr,
                remote_link: LinkKey { id, generation },
            },
        );
        state.enqueue(
            addr,
            release,
            None,
            None,
            TransportEvent::ConnectionRequest(ConnectionRequest {
                id: request,
                remote: self.addr,
                data: payload.to_vec(),
            }),
        );

        Ok(PeerHandle::new(id, addr))
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        let mut state = self.network.state.borrow_mut();
        let endpoint = state.endpoint(self.addr);
        if !endpoint.running {
            return Vec::new();
        }

        let now = Instant::now();
        let mut events = Vec::new();

        while endpoint.queue.peek().is_some_and(|d| d.release <= now) {
            let Some(delivery) = endpoint.queue.pop() else {
                break;
            };

            if let Some(key) = delivery.link {
                let Some(link) = endpoint.link_mut(key) else {
                    continue;
                };

                if let Some(sequence) = delivery.sequence {
                    if link
                        .last_received_sequence
                        .is_some_and(|last| sequence <= last)
                    {
                        endpoint.stats.packets_dropped_stale += 1;
                        continue;
                    }
                    link.last_received_sequence = Some(sequence);
                }

                if matches!(delivery.event, TransportEvent::Disconnected { .. }) {
                    endpoint.links.remove(&key.id);
                }
            }

            if let TransportEvent::Message { data, .. } = &delivery.event {
                endpoint.stats.record_received(data.len());
            }
            events.push(delivery.event);
        }

        events
    }

    fn accept(&mut self, request: &ConnectionRequest) -> Result<PeerHandle, TransportError> {
        let mut state = self.network.state.borrow_mut();
        Self::ensure_running(&mut state, self.addr)?;

        let pending = state
            .endpoint(self.addr)
            .pending
            .remove(&request.id)
            .ok_or(TransportError::UnknownRequest(request.id))?;

        let still_waiting = state
            .endpoints
            .get_mut(&pending.remote)
            .and_then(|e| e.link_mut(pending.remote_link))
            .is_some_and(|link| !link.closing);
        if !still_waiting {
            return Err(TransportError::Unreachable(pending.remote));
        }

        let generation = state.generation();
        let endpoint = state.endpoint(self.addr);
        let Some(id) = endpoint.lowest_free_id() else {
            state.close_remote(pending.remote, pending.remote_link);
            state.enqueue(
                pending.remote,
                Instant::now(),
                Some(pending.remote_link),
                None,
                TransportEvent::Disconnected {
                    peer: PeerHandle::new(pending.remote_link.id, self.addr),
                    reason: DisconnectReason::ConnectionRejected {
                        payload: Vec::new(),
                    },
                },
            );
            return Err(TransportError::PeerIdsExhausted);
        };

        let now = Instant::now();
        let release = now + endpoint.simulation.delay();
        endpoint.links.insert(
            id,
            Link {
                remote: pending.remote,
                remote_link: Some(pending.remote_link),
                generation,
                closing: false,
                last_ordered_release: release,
                send_sequence: 0,
                last_received_sequence: None,
            },
        );
        let local = LinkKey { id, generation };

        if let Some(link) = state
            .endpoints
            .get_mut(&pending.remote)
            .and_then(|e| e.link_mut(pending.remote_link))
        {
            link.remote_link = Some(local);
        }

        state.enqueue(
            pending.remote,
            release,
            Some(pending.remote_link),
            None,
            TransportEvent::Connected(PeerHandle::new(pending.remote_link.id, self.addr)),
        );
        let handle = PeerHandle::new(id, pending.remote);
        state.enqueue(
            self.addr,
            now,
            Some(local),
            None,
            TransportEvent::Connected(handle),
        );

        Ok(handle)
    }

    fn reject(
        &mut self,
        request: &ConnectionRequest,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let mut state = self.network.state.borrow_mut();
        let pending = state
            .endpoint(self.addr)
            .pending
            .remove(&request.id)
            .ok_or(TransportError::UnknownRequest(request.id))?;

        if state.close_remote(pending.remote, pending.remote_link) {
            let release = Instant::now() + state.endpoint(self.addr).simulation.delay();
            state.enqueue(
                pending.remote,
                release,
                Some(pending.remote_link),
                None,
                TransportEvent::Disconnected {
                    peer: PeerHandle::new(pending.remote_link.id, self.addr),
                    reason: DisconnectReason::ConnectionRejected {
                        payload: payload.to_vec(),
                    },
                },
            );
        }
        Ok(())
    }

    fn send(
        &mut self,
        peer: PeerHandle,
        data: &[u8],
        guarantee: DeliveryGuarantee,
    ) -> Result<(), TransportError> {
        let mut state = self.network.state.borrow_mut();
        Self::ensure_running(&mut state, self.addr)?;

        let endpoint = state.endpoint(self.addr);
        let simulation = endpoint.simulation.clone();
        let link = endpoint
            .links
            .get_mut(&peer.id)
            .ok_or(TransportError::UnknownPeer(peer.id))?;
        let remote_link = match link.remote_link {
            Some(key) if !link.closing => key,
            _ => return Err(TransportError::NotConnected(peer.id)),
        };
        let remote = link.remote;

        if simulation.should_drop(guarantee) {
            endpoint.stats.packets_lost += 1;
            return Ok(());
        }

        let mut release = Instant::now() + simulation.delay();
        if guarantee.is_reliable() {
            release = release.max(link.last_ordered_release);
            link.last_ordered_release = release;
        }
        let sequence = (guarantee == DeliveryGuarantee::Sequenced).then(|| {
            link.send_sequence += 1;
            link.send_sequence
        });

        let buffer = endpoint.take_buffer(data);
        endpoint.stats.record_sent(data.len());

        state.enqueue(
            remote,
            release,
            Some(remote_link),
            sequence,
            TransportEvent::Message {
                peer: PeerHandle::new(remote_link.id, self.addr),
                data: buffer,
                guarantee,
            },
        );
        Ok(())
    }

    fn disconnect(&mut self, peer: PeerHandle) -> Result<(), TransportError> {
        let mut state = self.network.state.borrow_mut();
        let endpoint = state.endpoint(self.addr);
        let link = endpoint
            .links
            .get_mut(&peer.id)
            .ok_or(TransportError::UnknownPeer(peer.id))?;
        if link.closing {
            return Ok(());
        }
        link.closing = true;

        let local = LinkKey {
            id: peer.id,
            generation: link.generation,
        };
        let release = link.last_ordered_release.max(Instant::now());
        let remote = link.remote;
        let remote_link = link.remote_link;
        let handle = PeerHandle::new(peer.id, remote);

        state.enqueue(
            self.addr,
            Instant::now(),
            Some(local),
            None,
            TransportEvent::Disconnected {
                peer: handle,
                reason: DisconnectReason::LocalClose,
            },
        );

        match remote_link {
            Some(key) => {
                if state.close_remote(remote, key) {
                    state.enqueue(
                        remote,
                        release,
                        Some(key),
                        None,
                        TransportEvent::Disconnected {
                            peer: PeerHandle::new(key.id, self.addr),
                            reason: DisconnectReason::RemoteClose,
                        },
                    );
                }
            }
            None => {
                if let Some(target) = state.endpoints.get_mut(&remote) {
                    let addr = self.addr;
                    target
                        .pending
                        .retain(|_, p| !(p.remote == addr && p.remote_link == local));
                }
            }
        }
        Ok(())
    }

    fn connected_count(&self) -> usize {
        self.network
            .state
            .borrow()
            .endpoints
            .get(&self.addr)
            .map_or(0, |endpoint| {
                endpoint
                    .links
                    .values()
                    .filter(|link| link.remote_link.is_some() && !link.closing)
                    .count()
            })
    }

    fn apply_options(&mut self, options: &TransportOptions) {
        let mut state = self.network.state.borrow_mut();
        let endpoint = state.endpoint(self.addr);
        endpoint.options = options.clone();
        if !options.reuse_packet_readers {
            endpoint.buffers.clear();
        }
    }

    fn recycle(&mut self, buffer: Vec<u8>) {
        let mut state = self.network.state.borrow_mut();
        let endpoint = state.endpoint(self.addr);
        if endpoint.options.reuse_packet_readers && endpoint.buffers.len() < MAX_POOLED_BUFFERS {
            endpoint.buffers.push(buffer);
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.addr)
    }

    fn is_running(&self) -> bool {
        self.network
            .state
            .borrow()
            .endpoints
            .get(&self.addr)
            .is_some_and(|endpoint| endpoint.running)
    }

    fn stop(&mut self) {
        let peers: Vec<PeerHandle> = {
            let mut state = self.network.state.borrow_mut();
            state
                .endpoint(self.addr)
                .links
                .iter()
                .map(|(&id, link)| PeerHandle::new(id, link.remote))
                .collect()
        };
        for peer in peers {
            if let Err(e) = self.disconnect(peer) {
                debug!("dropping peer {} on stop failed: {e}", peer.id);
            }
        }

        let mut state = self.network.state.borrow_mut();
        let endpoint = state.endpoint(self.addr);
        endpoint.running = false;
        endpoint.links.clear();
        endpoint.pending.clear();
        endpoint.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settle(max_latency: Duration) {
        std::thread::sleep(max_latency + Duration::from_millis(2));
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn pair(network: &MemoryNetwork) -> (MemoryTransport, MemoryTransport) {
        let mut server = network.endpoint(addr(7777));
        let mut client = network.endpoint(addr(50000));
        server.start(7777).unwrap();
        client.start(0).unwrap();
        (server, client)
    }

    fn connect(
        server: &mut MemoryTransport,
        client: &mut MemoryTransport,
    ) -> (PeerHandle, PeerHandle) {
        let to_server = client.connect(server.addr(), b"hello").unwrap();
        let request = match server.poll().pop() {
            Some(TransportEvent::ConnectionRequest(request)) => request,
            other => panic!("expected a connection request, got {other:?}"),
        };
        assert_eq!(request.data, b"hello");
        let to_client = server.accept(&request).unwrap();
        (to_server, to_client)
    }

    #[test]
    fn test_connect_accept_and_exchange() {
        let network = MemoryNetwork::new();
        let (mut server, mut client) = pair(&network);
        let (to_server, to_client) = connect(&mut server, &mut client);

        assert!(matches!(
            server.poll().as_slice(),
            [TransportEvent::Connected(h)] if *h == to_client
        ));
        assert!(matches!(
            client.poll().as_slice(),
            [TransportEvent::Connected(h)] if *h == to_server
        ));
        assert_eq!(server.connected_count(), 1);
        assert_eq!(client.connected_count(), 1);

        client
            .send(to_server, b"ping", DeliveryGuarantee::ReliableOrdered)
            .unwrap();
        match server.poll().as_slice() {
            [TransportEvent::Message { peer, data, .. }] => {
                assert_eq!(*peer, to_client);
                assert_eq!(data, b"ping");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_reject_carries_payload_to_the_client() {
        let network = MemoryNetwork::new();
        let (mut server, mut client) = pair(&network);
        client.connect(server.addr(), b"login").unwrap();
        let Some(TransportEvent::ConnectionRequest(request)) = server.poll().pop() else {
            panic!("no request");
        };
        server.reject(&request, b"denied").unwrap();

        match client.poll().as_slice() {
            [
                TransportEvent::Disconnected {
                    reason: DisconnectReason::ConnectionRejected { payload },
                    ..
                },
            ] => assert_eq!(payload, b"denied"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(server.connected_count(), 0);
        assert_eq!(client.connected_count(), 0);
        assert!(matches!(
            server.accept(&request),
            Err(TransportError::UnknownRequest(_))
        ));
    }

    #[test]
    fn test_ids_are_lowest_free_and_bounded() {
        let network = MemoryNetwork::new();
        let mut server = network.endpoint(addr(7777));
        server.start(7777).unwrap();

        let mut handles = Vec::new();
        for i in 0..=MAX_PEERS {
            let mut client = network.endpoint(addr(20000 + i as u16));
            client.start(0).unwrap();
            client.connect(server.addr(), &[]).unwrap();
            let Some(TransportEvent::ConnectionRequest(request)) = server.poll().pop() else {
                panic!("no request");
            };
            let accepted = server.accept(&request);
            if i < MAX_PEERS {
                let handle = accepted.unwrap();
                assert_eq!(handle.id.index(), i);
                handles.push(handle);
            } else {
                assert!(matches!(accepted, Err(TransportError::PeerIdsExhausted)));
            }
        }
        assert_eq!(server.connected_count(), MAX_PEERS);

        server.disconnect(handles[3]).unwrap();
        server.poll();

        let mut late = network.endpoint(addr(40000));
        late.start(0).unwrap();
        late.connect(server.addr(), &[]).unwrap();
        let request = server
            .poll()
            .into_iter()
            .find_map(|e| match e {
                TransportEvent::ConnectionRequest(r) => Some(r),
                _ => None,
            })
            .unwrap();
        assert_eq!(server.accept(&request).unwrap().id, PeerId(3));
    }

    #[test]
    fn test_loss_only_hits_unreliable_traffic() {
        let network = MemoryNetwork::new();
        let (mut server, mut client) = pair(&network);
        let (to_server, _) = connect(&mut server, &mut client);
        server.poll();
        client.poll();

        client.set_simulation(PacketLossSimulation {
            enabled: true,
            loss_percent: 100.0,
            ..Default::default()
        });
        client
            .send(to_server, b"sample", DeliveryGuarantee::Sequenced)
            .unwrap();
        client
            .send(to_server, b"event", DeliveryGuarantee::ReliableOrdered)
            .unwrap();

        let received: Vec<Vec<u8>> = server
            .poll()
            .into_iter()
            .filter_map(|e| match e {
                TransportEvent::Message { data, .. } => Some(data),
                _ => None,
            })
            .collect();
        assert_eq!(received, vec![b"event".to_vec()]);
        assert_eq!(client.stats().packets_lost, 1);
    }

    #[test]
    fn test_reliable_ordered_survives_jitter_in_order() {
        let network = MemoryNetwork::new();
        let (mut server, mut client) = pair(&network);
        let (to_server, _) = connect(&mut server, &mut client);
        server.poll();
        client.poll();

        client.set_simulation(PacketLossSimulation {
            enabled: true,
            loss_percent: 0.0,
            min_latency_ms: 1,
            max_latency_ms: 6,
            jitter_ms: 3,
        });
        for i in 0u8..20 {
            client
                .send(to_server, &[i], DeliveryGuarantee::ReliableOrdered)
                .unwrap();
        }
        settle(Duration::from_millis(10));

        let received: Vec<u8> = server
            .poll()
            .into_iter()
            .filter_map(|e| match e {
                TransportEvent::Message { data, .. } => data.first().copied(),
                _ => None,
            })
            .collect();
        assert_eq!(received, (0u8..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_sequenced_samples_never_arrive_out_of_order() {
        let network = MemoryNetwork::new();
        let (mut server, mut client) = pair(&network);
        let (to_server, _) = connect(&mut server, &mut client);
        server.poll();
        client.poll();

        client.set_simulation(PacketLossSimulation {
            enabled: true,
            loss_percent: 0.0,
            min_latency_ms: 0,
            max_latency_ms: 6,
            jitter_ms: 0,
        });
        for i in 0u8..50 {
            client
                .send(to_server, &[i], DeliveryGuarantee::Sequenced)
                .unwrap();
        }
        settle(Duration::from_millis(6));

        let received: Vec<u8> = server
            .poll()
            .into_iter()
            .filter_map(|e| match e {
                TransportEvent::Message { data, .. } => data.first().copied(),
                _ => None,
            })
            .collect();
        assert!(!received.is_empty());
        assert!(received.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(
            server.stats().packets_dropped_stale as usize + received.len(),
            50
        );
    }

    #[test]
    fn test_disconnect_reaches_both_sides_once() {
        let network = MemoryNetwork::new();
        let (mut server, mut client) = pair(&network);
        let (to_server, to_client) = connect(&mut server, &mut client);
        server.poll();
        client.poll();

        client.disconnect(to_server).unwrap();
        client.disconnect(to_server).unwrap();
        assert!(matches!(
            server.send(to_client, b"late", DeliveryGuarantee::ReliableOrdered),
            Err(TransportError::NotConnected(_))
        ));

        assert!(matches!(
            client.poll().as_slice(),
            [TransportEvent::Disconnected {
                reason: DisconnectReason::LocalClose,
                ..
            }]
        ));
        assert!(matches!(
            server.poll().as_slice(),
            [TransportEvent::Disconnected {
                reason: DisconnectReason::RemoteClose,
                ..
            }]
        ));
        assert_eq!(server.connected_count(), 0);
        assert!(matches!(
            server.send(to_client, b"late", DeliveryGuarantee::ReliableOrdered),
            Err(TransportError::UnknownPeer(_))
        ));
    }
}
