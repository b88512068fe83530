use ristnet_transport::{PeerHandle, TransportError};
use ristnet_url::UrlError;

/// Broad category of a [`SessionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caller error; the session state is unchanged.
    Validation,
    /// The transport failed during init; the session was rolled back.
    Transport,
    /// Data-path or lifecycle failure; the session state is unchanged.
    Runtime,
}

/// Errors returned by session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// `init` was called without endpoints.
    #[error("endpoint list is empty")]
    EmptyEndpointList,

    /// An endpoint address or port was rejected by the builder.
    #[error("invalid endpoint {endpoint}: {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: UrlError,
    },

    /// The transport refused to create a context.
    #[error("transport context creation failed: {0}")]
    TransportCreateFailed(#[source] TransportError),

    /// The transport rejected the session configuration.
    #[error("configuration rejected: {0}")]
    ConfigRejected(#[source] TransportError),

    /// An endpoint could not be registered as a peer.
    #[error("failed to register peer {endpoint}: {source}")]
    PeerRegistrationFailed {
        endpoint: String,
        #[source]
        source: TransportError,
    },

    /// The transport could not be started.
    #[error("transport start failed: {0}")]
    StartFailed(#[source] TransportError),

    /// `init` was called on a running session.
    #[error("session already initialized")]
    AlreadyInitialized,

    /// The session has been destroyed and cannot be reused.
    #[error("session destroyed")]
    Destroyed,

    /// The operation needs a running session.
    #[error("session not running")]
    NotRunning,

    /// The payload does not fit in a single transport packet.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The transport accepted only part of the payload.
    #[error("short write: {sent} of {requested} bytes sent")]
    ShortWrite { sent: usize, requested: usize },

    /// The handle is not in the peer table.
    #[error("unknown peer {0}")]
    UnknownPeer(PeerHandle),

    /// A write was refused by the transport.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration document could not be parsed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration file could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Category used by callers to decide whether to retry or rebuild.
    pub fn class(&self) -> ErrorClass {
        match self {
            SessionError::EmptyEndpointList
            | SessionError::InvalidEndpoint { .. }
            | SessionError::UnknownPeer(_)
            | SessionError::Json(_) => ErrorClass::Validation,
            SessionError::TransportCreateFailed(_)
            | SessionError::ConfigRejected(_)
            | SessionError::PeerRegistrationFailed { .. }
            | SessionError::StartFailed(_) => ErrorClass::Transport,
            SessionError::AlreadyInitialized
            | SessionError::Destroyed
            | SessionError::NotRunning
            | SessionError::PayloadTooLarge { .. }
            | SessionError::ShortWrite { .. }
            | SessionError::Transport(_)
            | SessionError::Io(_) => ErrorClass::Runtime,
        }
    }
}

/// Errors returned by peer table mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerTableError {
    /// The handle already has a connection.
    #[error("peer {0} already admitted")]
    AlreadyAdmitted(PeerHandle),

    /// The table was re-entered from inside one of its own visitors.
    #[error("peer table re-entered from a visitor on the same thread")]
    Reentrant,
}

pub type Result<T> = std::result::Result<T, SessionError>;
