use std::fmt;
use std::io;
use std::net::SocketAddr;

use rkyv::rancor;

use super::protocol::{DeliveryGuarantee, PeerId};

/// A live connection as seen from the local endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerHandle {
    pub id: PeerId,
    pub remote: SocketAddr,
}

impl PeerHandle {
    pub fn new(id: PeerId, remote: SocketAddr) -> Self {
        Self { id, remote }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A pending incoming connection. It stays open until it is accepted or
/// rejected; `data` is the payload the remote attached to its connect call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequest {
    pub id: RequestId,
    pub remote: SocketAddr,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    RemoteClose,
    LocalClose,
    Timeout,
    /// The remote refused our connection request; `payload` is its answer.
    ConnectionRejected { payload: Vec<u8> },
}

#[derive(Debug)]
pub struct NetworkError {
    pub addr: Option<SocketAddr>,
    pub error: io::Error,
}

#[derive(Debug)]
pub enum TransportEvent {
    ConnectionRequest(ConnectionRequest),
    Connected(PeerHandle),
    Disconnected {
        peer: PeerHandle,
        reason: DisconnectReason,
    },
    Message {
        peer: PeerHandle,
        data: Vec<u8>,
        guarantee: DeliveryGuarantee,
    },
    Latency {
        peer: PeerHandle,
        latency_ms: u32,
    },
    Unconnected {
        addr: SocketAddr,
        data: Vec<u8>,
    },
    NetworkError(NetworkError),
}

/// Transport knobs that can be changed on a running transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    pub enable_nat_punch: bool,
    /// Hand received buffers back to the transport after dispatch.
    pub reuse_packet_readers: bool,
    /// Non-blocking socket reads instead of short blocking reads.
    pub use_native_sockets: bool,
    pub ping_interval_ms: u32,
    pub disconnect_timeout_ms: u32,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            enable_nat_punch: false,
            reuse_packet_readers: true,
            use_native_sockets: true,
            ping_interval_ms: 1000,
            disconnect_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("transport is not running")]
    NotRunning,
    #[error("nothing is listening at {0}")]
    Unreachable(SocketAddr),
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),
    #[error("peer {0} is not connected")]
    NotConnected(PeerId),
    #[error("unknown connection request {0}")]
    UnknownRequest(RequestId),
    #[error("peer id space exhausted")]
    PeerIdsExhausted,
    #[error("payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },
    #[error("frame error: {0}")]
    Frame(rancor::Error),
}

/// The connection layer underneath the packet codec. Implementations own
/// delivery semantics: retries, ordering and reassembly all happen here.
pub trait Transport {
    fn start(&mut self, port: u16) -> Result<(), TransportError>;

    fn connect(&mut self, addr: SocketAddr, payload: &[u8]) -> Result<PeerHandle, TransportError>;

    /// Drains every event that is due. Never blocks for long.
    fn poll(&mut self) -> Vec<TransportEvent>;

    fn accept(&mut self, request: &ConnectionRequest) -> Result<PeerHandle, TransportError>;

    fn reject(&mut self, request: &ConnectionRequest, payload: &[u8])
    -> Result<(), TransportError>;

    fn send(
        &mut self,
        peer: PeerHandle,
        data: &[u8],
        guarantee: DeliveryGuarantee,
    ) -> Result<(), TransportError>;

    fn disconnect(&mut self, peer: PeerHandle) -> Result<(), TransportError>;

    fn connected_count(&self) -> usize;

    fn apply_options(&mut self, options: &TransportOptions);

    /// Returns a received buffer for reuse.
    fn recycle(&mut self, _buffer: Vec<u8>) {}

    fn local_addr(&self) -> Option<SocketAddr>;

    fn is_running(&self) -> bool;

    fn stop(&mut self);
}
