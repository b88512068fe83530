//! Peer session and callback dispatch for RIST transports.
//!
//! A [`Session`] owns one transport context as a receiver or a sender. The
//! transport calls back into a [`Dispatcher`], which keeps the
//! [`PeerTable`] of admitted peers and forwards every event to the
//! application's [`SessionHandler`].
//!
//! ```no_run
//! use ristnet_peer::{RejectAll, Session, SessionConfig};
//! use ristnet_transport::MemoryTransport;
//! use ristnet_url::Endpoint;
//!
//! let mut receiver = Session::receiver(MemoryTransport::new(), RejectAll);
//! receiver
//!     .init(&[Endpoint::listen("0.0.0.0", "8000")], SessionConfig::default())
//!     .expect("receiver should start");
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod session;
pub mod table;

pub use config::{SessionConfig, DEFAULT_KEY_SIZE};
pub use dispatch::{Dispatcher, UnboundData};
pub use error::{ErrorClass, PeerTableError, Result, SessionError};
pub use handler::{RejectAll, SessionHandler};
pub use session::{RegisteredPeer, Session, SessionState};
pub use table::{Connection, PeerTable};
