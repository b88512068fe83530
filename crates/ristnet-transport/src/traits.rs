use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::PeerConfig;
use crate::error::Result;

/// Largest packet the transport puts on the wire.
pub const MAX_PACKET_SIZE: usize = 10_000;
/// Bytes of every packet reserved for transport headers.
pub const HEADER_RESERVE: usize = 32;
/// Largest payload accepted by a single write.
pub const DEFAULT_MAX_PAYLOAD: usize = MAX_PACKET_SIZE - HEADER_RESERVE;

/// Opaque transport-assigned identifier for one logical connection.
///
/// Equality is identity: a peer that reconnects gets a new handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PeerHandle(u64);

impl PeerHandle {
    /// Wrap a raw transport handle value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw transport handle value.
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Which side of a stream a context serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Receiver,
    Sender,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Receiver => f.write_str("receiver"),
            Role::Sender => f.write_str("sender"),
        }
    }
}

/// Protocol variant selected when a context is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Simple,
    #[default]
    Main,
    Advanced,
}

/// Addresses of a connecting peer, as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectInfo {
    /// Address the peer connects from.
    pub remote: SocketAddr,
    /// Local address the connection arrived on.
    pub local: SocketAddr,
}

/// Answer to a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accept,
    Reject,
}

/// What the transport should do with the logical connection after a data
/// callback returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Keep,
    Drop,
}

/// Destination of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// One connected or registered peer.
    Peer(PeerHandle),
    /// Every peer of the context.
    Broadcast,
}

impl From<Option<PeerHandle>> for Target {
    fn from(peer: Option<PeerHandle>) -> Self {
        match peer {
            Some(peer) => Target::Peer(peer),
            None => Target::Broadcast,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Peer(peer) => peer.fmt(f),
            Target::Broadcast => f.write_str("broadcast"),
        }
    }
}

/// One block of data delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Peer the data arrived from.
    pub peer: PeerHandle,
    /// Flow the data belongs to.
    pub flow_id: u32,
    /// Payload bytes.
    pub payload: Bytes,
}

/// Periodic read-only statistics snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub role: Role,
    pub flow_id: u32,
    /// Number of currently linked peers.
    pub peers: usize,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub packets_lost: u64,
    pub packets_recovered: u64,
    pub rtt_ms: u32,
    /// Link quality in percent.
    pub quality: f64,
}

/// Callbacks invoked by the transport on its own threads.
///
/// Implementations must not block beyond short critical sections and must
/// never unwind back into the transport.
pub trait TransportEvents: Send + Sync {
    /// A peer is connecting; decide whether to keep it.
    fn on_connect(&self, info: &ConnectInfo, peer: PeerHandle) -> Admission;

    /// A peer went away. May be signalled more than once for one handle.
    fn on_disconnect(&self, peer: PeerHandle);

    /// Data arrived on the reliable path.
    fn on_data(&self, packet: Packet) -> Disposition;

    /// Data arrived on the out-of-band path.
    fn on_oob_data(&self, packet: Packet);

    /// A statistics snapshot is available.
    fn on_statistics(&self, stats: Statistics);
}

/// One created transport context (a receiver or a sender).
pub trait TransportContext: Send + Sync {
    /// Apply the session-wide configuration.
    fn configure(&mut self, config: &PeerConfig) -> Result<()>;

    /// Register a listen or connect peer described by `config.address`.
    fn register_peer(&mut self, config: &PeerConfig) -> Result<PeerHandle>;

    /// Start the transport threads; `events` receives all callbacks.
    fn start(&mut self, events: Arc<dyn TransportEvents>) -> Result<()>;

    /// Write on the reliable path. Returns the number of bytes accepted.
    fn write(&self, target: Target, payload: &[u8]) -> Result<usize>;

    /// Write on the out-of-band path. Returns the number of bytes accepted.
    fn write_oob(&self, target: Target, payload: &[u8]) -> Result<usize>;

    /// Tear down one peer.
    fn disconnect_peer(&self, peer: PeerHandle) -> Result<()>;

    /// Stop all threads and release the context.
    fn destroy(&mut self) -> Result<()>;

    /// Largest payload a single write accepts.
    fn max_payload_size(&self) -> usize {
        DEFAULT_MAX_PAYLOAD
    }
}

/// Factory for transport contexts.
pub trait Transport: Send + Sync {
    type Context: TransportContext + 'static;

    /// Create a context for `role` using `profile`.
    fn create(&self, role: Role, profile: Profile) -> Result<Self::Context>;

    /// Turn a connection string into a per-peer configuration based on
    /// `base`.
    fn parse_address(&self, url: &str, base: &PeerConfig) -> Result<PeerConfig> {
        crate::config::parse_address(url, base)
    }

    /// Transport name for diagnostics.
    fn name(&self) -> &'static str;

    /// Transport library version for diagnostics.
    fn version(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_payload_reserves_header() {
        assert_eq!(DEFAULT_MAX_PAYLOAD, 9_968);
    }

    #[test]
    fn target_from_option() {
        let peer = PeerHandle::from_raw(7);
        assert_eq!(Target::from(Some(peer)), Target::Peer(peer));
        assert_eq!(Target::from(None), Target::Broadcast);
        assert_eq!(Target::Peer(peer).to_string(), "peer#7");
    }

    #[test]
    fn profile_serde_names() {
        let json = serde_json::to_string(&Profile::Simple).unwrap();
        assert_eq!(json, "\"simple\"");
        let profile: Profile = serde_json::from_str("\"advanced\"").unwrap();
        assert_eq!(profile, Profile::Advanced);
        assert_eq!(Profile::default(), Profile::Main);
    }
}
