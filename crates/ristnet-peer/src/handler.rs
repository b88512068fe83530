use std::sync::Arc;

use ristnet_transport::{ConnectInfo, Disposition, Packet, PeerHandle, Statistics};
use tracing::{debug, warn};

use crate::table::Connection;

/// Application callbacks for one session.
///
/// Every method is called from transport threads, possibly concurrently.
/// The provided bodies are the behaviour of a session that installs no
/// callback for that event: connections are rejected, data is dropped, OOB
/// data and statistics are discarded.
pub trait SessionHandler: Send + Sync + 'static {
    /// Per-connection state attached at admission.
    type Context: Send + Sync + 'static;

    /// Set to `false` when [`on_data`](Self::on_data) is not implemented;
    /// the dispatcher then drops data without consulting the peer table.
    const RECEIVES_DATA: bool = true;

    /// Decide whether to admit a connecting peer. `None` rejects it.
    fn on_admit(&self, info: &ConnectInfo, peer: PeerHandle) -> Option<Self::Context> {
        warn!(%peer, remote = %info.remote, "no admission handler, rejecting connection");
        None
    }

    /// Data arrived on the reliable path.
    ///
    /// `connection` is `None` when the handle is not in the peer table,
    /// which some transport profiles do for connectionless flows.
    fn on_data(
        &self,
        packet: &Packet,
        connection: Option<&Arc<Connection<Self::Context>>>,
    ) -> Disposition {
        let _ = connection;
        debug!(peer = %packet.peer, len = packet.payload.len(), "data discarded");
        Disposition::Drop
    }

    /// Data arrived on the out-of-band path.
    fn on_oob_data(&self, packet: &Packet, connection: Option<&Arc<Connection<Self::Context>>>) {
        let _ = (packet, connection);
    }

    /// An admitted peer is gone. Called exactly once per admitted peer.
    fn on_disconnect(&self, connection: Arc<Connection<Self::Context>>) {
        let _ = connection;
    }

    /// A statistics snapshot is available. The snapshot is released after
    /// this returns.
    fn on_statistics(&self, stats: &Statistics) {
        let _ = stats;
    }
}

/// Handler with no callbacks: rejects every peer and drops all data.
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectAll;

impl SessionHandler for RejectAll {
    type Context = ();
    const RECEIVES_DATA: bool = false;
}
