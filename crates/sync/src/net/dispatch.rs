use std::collections::HashMap;

use super::codec::CodecError;
use super::packets::{Packet, PacketBody, PacketKind};
use super::transport::{ConnectionRequest, PeerHandle};

/// Where a decoded packet came from.
#[derive(Debug, Clone)]
pub enum Origin {
    /// Payload of a pending connection request; no peer exists yet.
    Request(ConnectionRequest),
    Peer(PeerHandle),
}

impl Origin {
    pub fn peer(&self) -> Option<PeerHandle> {
        match self {
            Origin::Peer(handle) => Some(*handle),
            Origin::Request(_) => None,
        }
    }

    pub fn request(&self) -> Option<&ConnectionRequest> {
        match self {
            Origin::Request(request) => Some(request),
            Origin::Peer(_) => None,
        }
    }
}

type Handler<S> = Box<dyn Fn(&mut S, Packet, &Origin)>;

/// Typed subscription table: at most one handler per packet kind.
pub struct Dispatcher<S> {
    handlers: HashMap<PacketKind, Handler<S>>,
}

impl<S: 'static> Default for Dispatcher<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: 'static> Dispatcher<S> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn subscribe<P>(&mut self, handler: fn(&mut S, P, &Origin)) -> Result<(), CodecError>
    where
        P: PacketBody + 'static,
    {
        if self.handlers.contains_key(&P::KIND) {
            return Err(CodecError::DuplicateHandler(P::KIND));
        }

        self.handlers.insert(
            P::KIND,
            Box::new(move |state, packet, origin| {
                if let Ok(body) = P::try_from(packet) {
                    handler(state, body, origin);
                }
            }),
        );
        Ok(())
    }

    pub fn is_subscribed(&self, kind: PacketKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Returns false when nothing is subscribed to the packet's kind.
    pub fn route(&self, state: &mut S, packet: Packet, origin: &Origin) -> bool {
        match self.handlers.get(&packet.kind()) {
            Some(handler) => {
                handler(state, packet, origin);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::packets::{ClientReady, PlayerDisconnect};
    use crate::net::PeerId;

    #[derive(Default)]
    struct Recorder {
        ready_from: Vec<PeerId>,
        disconnects: Vec<PeerId>,
    }

    fn on_ready(state: &mut Recorder, _packet: ClientReady, origin: &Origin) {
        if let Some(peer) = origin.peer() {
            state.ready_from.push(peer.id);
        }
    }

    fn on_disconnect(state: &mut Recorder, packet: PlayerDisconnect, _origin: &Origin) {
        state.disconnects.push(packet.id);
    }

    fn peer(id: u8) -> Origin {
        Origin::Peer(PeerHandle::new(
            PeerId(id),
            "127.0.0.1:9000".parse().unwrap(),
        ))
    }

    #[test]
    fn test_routes_by_kind_with_context() {
        let mut dispatcher = Dispatcher::<Recorder>::new();
        dispatcher.subscribe(on_ready).unwrap();
        dispatcher.subscribe(on_disconnect).unwrap();

        let mut state = Recorder::default();
        assert!(dispatcher.route(&mut state, ClientReady.into(), &peer(3)));
        assert!(dispatcher.route(
            &mut state,
            PlayerDisconnect { id: PeerId(9) }.into(),
            &peer(1)
        ));

        assert_eq!(state.ready_from, vec![PeerId(3)]);
        assert_eq!(state.disconnects, vec![PeerId(9)]);
    }

    #[test]
    fn test_second_subscription_is_refused() {
        let mut dispatcher = Dispatcher::<Recorder>::new();
        dispatcher.subscribe(on_ready).unwrap();
        assert!(matches!(
            dispatcher.subscribe(on_ready),
            Err(CodecError::DuplicateHandler(PacketKind::ClientReady))
        ));
    }

    #[test]
    fn test_unsubscribed_kind_is_not_routed() {
        let dispatcher = Dispatcher::<Recorder>::new();
        let mut state = Recorder::default();
        assert!(!dispatcher.route(&mut state, ClientReady.into(), &peer(0)));
        assert!(!dispatcher.is_subscribed(PacketKind::ClientReady));
    }
}
