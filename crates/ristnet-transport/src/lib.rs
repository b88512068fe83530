//! Reliable-UDP transport seam.
//!
//! The session layer drives a RIST-style transport through the traits in
//! [`traits`] and never touches sockets itself:
//! - [`Transport`] creates role-specific contexts and parses peer URLs
//! - [`TransportContext`] configures, registers peers, starts and writes
//! - [`TransportEvents`] is called back from transport threads
//!
//! [`memory::MemoryTransport`] is an in-process implementation used by the
//! tests and the demo harness.

pub mod config;
pub mod error;
pub mod memory;
pub mod traits;

pub use config::{parse_address, BufferbloatMode, CongestionControl, PeerConfig, RecoveryMode};
pub use error::{Result, TransportError};
pub use memory::{Call, MemoryTransport, RemotePeer, Stage};
pub use traits::{
    Admission, ConnectInfo, Disposition, Packet, PeerHandle, Profile, Role, Statistics, Target,
    Transport, TransportContext, TransportEvents, DEFAULT_MAX_PAYLOAD, HEADER_RESERVE,
    MAX_PACKET_SIZE,
};
