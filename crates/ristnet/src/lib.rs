//! RIST peer sessions with typed callbacks and connection tracking.
//!
//! ristnet wraps a reliable-UDP transport in receiver and sender sessions
//! that admit peers through an application callback, keep a table of live
//! connections and route data, out-of-band data and statistics to a typed
//! handler.
//!
//! # Crate Structure
//!
//! - [`url`]: Endpoint URL builder (`rist://`, `rist6://`)
//! - [`transport`]: Transport seam and the in-memory transport
//! - [`peer`]: Sessions, peer table and callback dispatch (behind `peer` feature)

/// Re-export endpoint URL types.
pub mod url {
    pub use ristnet_url::*;
}

/// Re-export transport types.
pub mod transport {
    pub use ristnet_transport::*;
}

/// Re-export session types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use ristnet_peer::*;
}
