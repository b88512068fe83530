//! Transport callback dispatch.
//!
//! [`Dispatcher`] is the object handed to the transport at start. It owns the
//! peer table and routes every transport event to the [`SessionHandler`].
//! Handler panics are caught here and never unwind into the transport.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use ristnet_transport::{
    Admission, ConnectInfo, Disposition, Packet, PeerHandle, Statistics, TransportEvents,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::handler::SessionHandler;
use crate::table::{Connection, PeerTable};

/// What to do with data from a handle that is not in the peer table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnboundData {
    /// Hand it to the handler without a connection.
    #[default]
    Deliver,
    /// Drop it without calling the handler.
    Drop,
}

/// Run a handler callback, turning a panic into `on_panic`.
fn guarded<T>(callback: &'static str, on_panic: T, f: impl FnOnce() -> T) -> T {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            error!(callback, "session handler panicked");
            on_panic
        }
    }
}

/// Routes transport events to a [`SessionHandler`].
pub struct Dispatcher<H: SessionHandler> {
    handler: Arc<H>,
    peers: PeerTable<H::Context>,
    unbound: UnboundData,
}

impl<H: SessionHandler> Dispatcher<H> {
    pub fn new(handler: Arc<H>, unbound: UnboundData) -> Self {
        Self {
            handler,
            peers: PeerTable::new(),
            unbound,
        }
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    pub fn peers(&self) -> &PeerTable<H::Context> {
        &self.peers
    }

    pub fn unbound_data(&self) -> UnboundData {
        self.unbound
    }

    /// Notify the handler that `connection` was removed by the session.
    pub(crate) fn notify_disconnect(&self, connection: Arc<Connection<H::Context>>) {
        guarded("on_disconnect", (), || {
            self.handler.on_disconnect(connection)
        });
    }
}

impl<H: SessionHandler> TransportEvents for Dispatcher<H> {
    fn on_connect(&self, info: &ConnectInfo, peer: PeerHandle) -> Admission {
        let Some(context) = guarded("on_admit", None, || self.handler.on_admit(info, peer)) else {
            debug!(%peer, remote = %info.remote, "connection rejected");
            return Admission::Reject;
        };
        match self.peers.admit(peer, *info, context) {
            Ok(_) => {
                debug!(%peer, remote = %info.remote, "connection admitted");
                Admission::Accept
            }
            Err(err) => {
                error!(%peer, error = %err, "admission failed");
                Admission::Reject
            }
        }
    }

    fn on_disconnect(&self, peer: PeerHandle) {
        if let Some(connection) = self.peers.remove(peer) {
            debug!(%peer, "peer disconnected");
            self.notify_disconnect(connection);
        }
    }

    fn on_data(&self, packet: Packet) -> Disposition {
        if !H::RECEIVES_DATA {
            debug!(peer = %packet.peer, len = packet.payload.len(), "data discarded");
            return Disposition::Drop;
        }
        let connection = self.peers.lookup(packet.peer);
        if connection.is_none() && self.unbound == UnboundData::Drop {
            debug!(peer = %packet.peer, "data from unbound peer dropped");
            return Disposition::Drop;
        }
        guarded("on_data", Disposition::Drop, || {
            self.handler.on_data(&packet, connection.as_ref())
        })
    }

    fn on_oob_data(&self, packet: Packet) {
        let connection = self.peers.lookup(packet.peer);
        guarded("on_oob_data", (), || {
            self.handler.on_oob_data(&packet, connection.as_ref())
        });
    }

    fn on_statistics(&self, stats: Statistics) {
        guarded("on_statistics", (), || self.handler.on_statistics(&stats));
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use bytes::Bytes;
    use ristnet_transport::Role;

    use super::*;
    use crate::handler::RejectAll;

    #[derive(Default)]
    struct Camera {
        seen: Mutex<Vec<(Bytes, Option<Arc<Connection<String>>>)>>,
        gone: Mutex<Vec<PeerHandle>>,
        stats: AtomicUsize,
    }

    impl SessionHandler for Camera {
        type Context = String;

        fn on_admit(&self, info: &ConnectInfo, _peer: PeerHandle) -> Option<String> {
            (info.remote.port() != 666).then(|| format!("cam@{}", info.remote))
        }

        fn on_data(
            &self,
            packet: &Packet,
            connection: Option<&Arc<Connection<String>>>,
        ) -> Disposition {
            if packet.payload.as_ref() == b"boom" {
                panic!("handler failure");
            }
            self.seen
                .lock()
                .unwrap()
                .push((packet.payload.clone(), connection.cloned()));
            Disposition::Keep
        }

        fn on_disconnect(&self, connection: Arc<Connection<String>>) {
            self.gone.lock().unwrap().push(connection.peer());
        }

        fn on_statistics(&self, _stats: &Statistics) {
            self.stats.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn info(port: u16) -> ConnectInfo {
        ConnectInfo {
            remote: SocketAddr::from(([192, 168, 1, 10], port)),
            local: SocketAddr::from(([0, 0, 0, 0], 8000)),
        }
    }

    fn packet(raw: u64, payload: &'static [u8]) -> Packet {
        Packet {
            peer: PeerHandle::from_raw(raw),
            flow_id: 0,
            payload: Bytes::from_static(payload),
        }
    }

    fn stats() -> Statistics {
        Statistics {
            role: Role::Receiver,
            flow_id: 0,
            peers: 0,
            packets_sent: 0,
            bytes_sent: 0,
            packets_received: 0,
            bytes_received: 0,
            packets_lost: 0,
            packets_recovered: 0,
            rtt_ms: 0,
            quality: 100.0,
        }
    }

    #[test]
    fn reject_all_rejects_and_drops() {
        let dispatcher = Dispatcher::new(Arc::new(RejectAll), UnboundData::Deliver);
        let peer = PeerHandle::from_raw(1);
        assert_eq!(dispatcher.on_connect(&info(5000), peer), Admission::Reject);
        assert!(dispatcher.peers().is_empty());
        assert_eq!(dispatcher.on_data(packet(1, b"x")), Disposition::Drop);
        dispatcher.on_oob_data(packet(1, b"x"));
        dispatcher.on_statistics(stats());
        dispatcher.on_disconnect(peer);
        assert!(dispatcher.peers().is_empty());
    }

    #[test]
    fn data_sees_admitted_context() {
        let handler = Arc::new(Camera::default());
        let dispatcher = Dispatcher::new(Arc::clone(&handler), UnboundData::Deliver);
        let peer = PeerHandle::from_raw(7);
        assert_eq!(dispatcher.on_connect(&info(5000), peer), Admission::Accept);
        let admitted = dispatcher.peers().lookup(peer).unwrap();

        assert_eq!(dispatcher.on_data(packet(7, b"one")), Disposition::Keep);
        assert_eq!(dispatcher.on_data(packet(7, b"two")), Disposition::Keep);

        let seen = handler.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        for (_, connection) in seen.iter() {
            let connection = connection.as_ref().expect("context should be bound");
            assert!(Arc::ptr_eq(connection, &admitted));
            assert_eq!(connection.context(), "cam@192.168.1.10:5000");
        }
    }

    #[test]
    fn admission_callback_can_reject() {
        let dispatcher = Dispatcher::new(Arc::new(Camera::default()), UnboundData::Deliver);
        let peer = PeerHandle::from_raw(1);
        assert_eq!(dispatcher.on_connect(&info(666), peer), Admission::Reject);
        assert!(dispatcher.peers().is_empty());
    }

    #[test]
    fn unbound_data_policy() {
        let handler = Arc::new(Camera::default());
        let deliver = Dispatcher::new(Arc::clone(&handler), UnboundData::Deliver);
        assert_eq!(deliver.on_data(packet(3, b"loose")), Disposition::Keep);
        assert!(handler.seen.lock().unwrap()[0].1.is_none());

        let drop = Dispatcher::new(Arc::clone(&handler), UnboundData::Drop);
        assert_eq!(drop.on_data(packet(3, b"loose")), Disposition::Drop);
        assert_eq!(handler.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn disconnect_notifies_once() {
        let handler = Arc::new(Camera::default());
        let dispatcher = Dispatcher::new(Arc::clone(&handler), UnboundData::Deliver);
        let peer = PeerHandle::from_raw(4);
        dispatcher.on_connect(&info(1), peer);
        dispatcher.on_disconnect(peer);
        dispatcher.on_disconnect(peer);
        dispatcher.on_disconnect(PeerHandle::from_raw(99));
        assert_eq!(*handler.gone.lock().unwrap(), vec![peer]);
        assert!(dispatcher.peers().is_empty());
    }

    #[test]
    fn handler_panic_becomes_drop() {
        let dispatcher = Dispatcher::new(Arc::new(Camera::default()), UnboundData::Deliver);
        dispatcher.on_connect(&info(1), PeerHandle::from_raw(1));
        assert_eq!(dispatcher.on_data(packet(1, b"boom")), Disposition::Drop);
        assert_eq!(dispatcher.on_data(packet(1, b"fine")), Disposition::Keep);
    }

    /// Admits every peer except port 13, where admission panics; every other
    /// callback panics.
    struct Faulty;

    impl SessionHandler for Faulty {
        type Context = ();

        fn on_admit(&self, info: &ConnectInfo, _peer: PeerHandle) -> Option<()> {
            if info.remote.port() == 13 {
                panic!("admission failure");
            }
            Some(())
        }

        fn on_oob_data(&self, _packet: &Packet, _connection: Option<&Arc<Connection<()>>>) {
            panic!("oob failure");
        }

        fn on_disconnect(&self, _connection: Arc<Connection<()>>) {
            panic!("disconnect failure");
        }

        fn on_statistics(&self, _stats: &Statistics) {
            panic!("statistics failure");
        }
    }

    #[test]
    fn admission_panic_becomes_reject() {
        let dispatcher = Dispatcher::new(Arc::new(Faulty), UnboundData::Deliver);
        let peer = PeerHandle::from_raw(1);
        assert_eq!(dispatcher.on_connect(&info(13), peer), Admission::Reject);
        assert!(dispatcher.peers().is_empty());
        assert_eq!(
            dispatcher.on_connect(&info(14), PeerHandle::from_raw(2)),
            Admission::Accept
        );
    }

    #[test]
    fn panicking_callbacks_do_not_unwind() {
        let dispatcher = Dispatcher::new(Arc::new(Faulty), UnboundData::Deliver);
        let peer = PeerHandle::from_raw(5);
        assert_eq!(dispatcher.on_connect(&info(14), peer), Admission::Accept);

        dispatcher.on_oob_data(packet(5, b"oob"));
        dispatcher.on_statistics(stats());
        dispatcher.on_disconnect(peer);
        assert!(dispatcher.peers().is_empty());

        // A later event on the same dispatcher still works.
        assert_eq!(
            dispatcher.on_connect(&info(15), PeerHandle::from_raw(6)),
            Admission::Accept
        );
        assert_eq!(dispatcher.peers().len(), 1);
    }

    #[test]
    fn statistics_are_forwarded() {
        let handler = Arc::new(Camera::default());
        let dispatcher = Dispatcher::new(Arc::clone(&handler), UnboundData::Deliver);
        dispatcher.on_statistics(stats());
        dispatcher.on_statistics(stats());
        assert_eq!(handler.stats.load(Ordering::SeqCst), 2);
    }
}
