use ristnet_url::UrlError;

use crate::traits::{PeerHandle, Role};

/// Errors reported by a transport implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The transport refused to create a context.
    #[error("failed to create {role} context: {reason}")]
    CreateFailed { role: Role, reason: String },

    /// A configuration field was rejected.
    #[error("configuration rejected ({field}): {reason}")]
    ConfigRejected { field: &'static str, reason: String },

    /// The peer URL could not be parsed.
    #[error("invalid peer url: {0}")]
    InvalidUrl(#[from] UrlError),

    /// A URL query parameter is unknown or malformed.
    #[error("invalid url parameter '{key}' in {url}")]
    InvalidParameter { url: String, key: String },

    /// Another context already listens on the address.
    #[error("address already in use: {0}")]
    AddressInUse(String),

    /// The peer could not be registered.
    #[error("failed to register peer {url}: {reason}")]
    RegisterFailed { url: String, reason: String },

    /// The transport could not be started.
    #[error("failed to start transport: {0}")]
    StartFailed(String),

    /// The remote side refused or is not listening.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// The handle does not belong to this context.
    #[error("unknown peer {0}")]
    UnknownPeer(PeerHandle),

    /// The payload does not fit in one transport packet.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The write was refused by the transport.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// The context has not been started.
    #[error("transport not started")]
    NotStarted,

    /// The context has been destroyed.
    #[error("transport destroyed")]
    Destroyed,
}

pub type Result<T> = std::result::Result<T, TransportError>;
