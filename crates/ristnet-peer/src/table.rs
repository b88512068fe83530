//! Handle-to-connection map shared by the dispatcher and the session.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ristnet_transport::{ConnectInfo, PeerHandle};
use tracing::{debug, error, warn};

use crate::error::PeerTableError;

static NEXT_TABLE_ID: AtomicU64 = AtomicU64::new(1);

/// Closed handles remembered while waiting for their disconnect echo.
const MAX_PENDING_ECHOES: usize = 4096;

thread_local! {
    // Ids of the tables whose visitor is running on this thread.
    static VISITING: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// One admitted peer and the application context attached to it.
///
/// Shared through `Arc` by the table and every callback that sees the peer,
/// so the context stays valid after its entry is removed.
#[derive(Debug)]
pub struct Connection<C> {
    peer: PeerHandle,
    info: ConnectInfo,
    context: C,
}

impl<C> Connection<C> {
    /// Handle this connection is keyed by.
    pub fn peer(&self) -> PeerHandle {
        self.peer
    }

    /// Address the peer connected from.
    pub fn remote(&self) -> SocketAddr {
        self.info.remote
    }

    /// Local address the peer connected to.
    pub fn local(&self) -> SocketAddr {
        self.info.local
    }

    /// Application context returned at admission.
    pub fn context(&self) -> &C {
        &self.context
    }
}

struct Entries<C> {
    live: HashMap<PeerHandle, Arc<Connection<C>>>,
    // Handles removed by an explicit close whose transport disconnect
    // signal has not arrived yet.
    closed: HashSet<PeerHandle>,
}

impl<C> Entries<C> {
    fn remember_closed(&mut self, peer: PeerHandle) {
        if self.closed.len() >= MAX_PENDING_ECHOES {
            debug!(
                dropped = self.closed.len(),
                "too many unanswered closes, forgetting them"
            );
            self.closed.clear();
        }
        self.closed.insert(peer);
    }
}

/// Thread-safe map from transport handles to admitted connections.
///
/// The lock is not reentrant. Calling back into the same table from a
/// [`for_each`](Self::for_each) visitor is refused and logged.
pub struct PeerTable<C> {
    id: u64,
    entries: Mutex<Entries<C>>,
}

struct VisitGuard(u64);

impl VisitGuard {
    fn enter(id: u64) -> Self {
        VISITING.with(|visiting| visiting.borrow_mut().push(id));
        Self(id)
    }
}

impl Drop for VisitGuard {
    fn drop(&mut self) {
        VISITING.with(|visiting| {
            let mut visiting = visiting.borrow_mut();
            if let Some(pos) = visiting.iter().rposition(|id| *id == self.0) {
                visiting.remove(pos);
            }
        });
    }
}

impl<C> Default for PeerTable<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> PeerTable<C> {
    pub fn new() -> Self {
        Self {
            id: NEXT_TABLE_ID.fetch_add(1, Ordering::Relaxed),
            entries: Mutex::new(Entries {
                live: HashMap::new(),
                closed: HashSet::new(),
            }),
        }
    }

    fn lock(&self, op: &'static str) -> Result<MutexGuard<'_, Entries<C>>, PeerTableError> {
        let reentrant = VISITING.with(|visiting| visiting.borrow().contains(&self.id));
        if reentrant {
            error!(op, "peer table re-entered from visitor, refusing");
            return Err(PeerTableError::Reentrant);
        }
        Ok(self.entries.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Insert a connection for `peer`. Existing entries are never replaced.
    pub fn admit(
        &self,
        peer: PeerHandle,
        info: ConnectInfo,
        context: C,
    ) -> Result<Arc<Connection<C>>, PeerTableError> {
        let mut entries = self.lock("admit")?;
        if entries.live.contains_key(&peer) {
            return Err(PeerTableError::AlreadyAdmitted(peer));
        }
        entries.closed.remove(&peer);
        let connection = Arc::new(Connection {
            peer,
            info,
            context,
        });
        entries.live.insert(peer, Arc::clone(&connection));
        Ok(connection)
    }

    /// Connection for `peer`, if admitted.
    pub fn lookup(&self, peer: PeerHandle) -> Option<Arc<Connection<C>>> {
        self.lock("lookup").ok()?.live.get(&peer).cloned()
    }

    /// Remove `peer` on a transport disconnect signal.
    ///
    /// Unknown handles are a logged no-op; a repeat signal for a handle that
    /// was closed explicitly is expected and only logged at debug level.
    pub fn remove(&self, peer: PeerHandle) -> Option<Arc<Connection<C>>> {
        let mut entries = self.lock("remove").ok()?;
        if let Some(connection) = entries.live.remove(&peer) {
            return Some(connection);
        }
        if entries.closed.remove(&peer) {
            debug!(%peer, "disconnect for already closed peer");
        } else {
            warn!(%peer, "disconnect for unknown peer ignored");
        }
        None
    }

    /// Remove `peer` ahead of an explicit transport teardown.
    pub fn close(&self, peer: PeerHandle) -> Option<Arc<Connection<C>>> {
        let mut entries = self.lock("close").ok()?;
        let connection = entries.live.remove(&peer)?;
        entries.remember_closed(peer);
        Some(connection)
    }

    /// Stop waiting for the disconnect echo of `peer`, e.g. when the
    /// transport refused to tear it down.
    pub fn forget_closed(&self, peer: PeerHandle) {
        if let Ok(mut entries) = self.lock("forget_closed") {
            entries.closed.remove(&peer);
        }
    }

    /// Closed handles whose transport disconnect signal has not arrived.
    pub fn pending_echoes(&self) -> usize {
        self.lock("pending_echoes")
            .map_or(0, |entries| entries.closed.len())
    }

    /// Remove and return every connection in one critical section.
    pub fn drain(&self) -> Vec<Arc<Connection<C>>> {
        let Ok(mut entries) = self.lock("drain") else {
            return Vec::new();
        };
        let drained: Vec<_> = entries.live.drain().map(|(_, conn)| conn).collect();
        for connection in &drained {
            entries.remember_closed(connection.peer);
        }
        drained
    }

    /// Forget every connection and all close bookkeeping.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.lock("clear") {
            entries.live.clear();
            entries.closed.clear();
        }
    }

    /// Call `visitor` for every connection while holding the lock.
    ///
    /// Returns the number of connections visited.
    pub fn for_each(&self, mut visitor: impl FnMut(&Arc<Connection<C>>)) -> usize {
        let Ok(entries) = self.lock("for_each") else {
            return 0;
        };
        let _visit = VisitGuard::enter(self.id);
        for connection in entries.live.values() {
            visitor(connection);
        }
        entries.live.len()
    }

    pub fn len(&self) -> usize {
        self.lock("len").map_or(0, |entries| entries.live.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, peer: PeerHandle) -> bool {
        self.lock("contains")
            .is_ok_and(|entries| entries.live.contains_key(&peer))
    }

    /// Admitted handles in ascending order.
    pub fn handles(&self) -> Vec<PeerHandle> {
        let Ok(entries) = self.lock("handles") else {
            return Vec::new();
        };
        let mut handles: Vec<_> = entries.live.keys().copied().collect();
        handles.sort_unstable();
        handles
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn info(port: u16) -> ConnectInfo {
        ConnectInfo {
            remote: SocketAddr::from(([127, 0, 0, 1], port)),
            local: SocketAddr::from(([0, 0, 0, 0], 8000)),
        }
    }

    fn handle(raw: u64) -> PeerHandle {
        PeerHandle::from_raw(raw)
    }

    #[test]
    fn admit_then_lookup_returns_same_instance() {
        let table = PeerTable::new();
        let admitted = table
            .admit(handle(1), info(5000), "cam-1")
            .expect("admit should succeed");
        let found = table.lookup(handle(1)).expect("peer should be present");
        assert!(Arc::ptr_eq(&admitted, &found));
        assert_eq!(found.peer(), handle(1));
        assert_eq!(*found.context(), "cam-1");
        assert_eq!(found.remote().port(), 5000);
    }

    #[test]
    fn duplicate_admit_keeps_first_entry() {
        let table = PeerTable::new();
        table.admit(handle(1), info(1), 1).expect("first admit");
        let err = table.admit(handle(1), info(2), 2).unwrap_err();
        assert_eq!(err, PeerTableError::AlreadyAdmitted(handle(1)));
        assert_eq!(*table.lookup(handle(1)).unwrap().context(), 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn size_tracks_admits_minus_removes() {
        let table = PeerTable::new();
        for raw in 1..=5 {
            table.admit(handle(raw), info(raw as u16), raw).unwrap();
        }
        assert!(table.remove(handle(2)).is_some());
        assert!(table.remove(handle(2)).is_none());
        assert!(table.remove(handle(99)).is_none());
        assert_eq!(table.len(), 4);
        assert_eq!(
            table.handles(),
            vec![handle(1), handle(3), handle(4), handle(5)]
        );
    }

    #[test]
    fn drain_empties_table_once() {
        let table = PeerTable::new();
        for raw in 1..=3 {
            table.admit(handle(raw), info(1), ()).unwrap();
        }
        let drained = table.drain();
        assert_eq!(drained.len(), 3);
        assert!(table.is_empty());
        assert!(table.drain().is_empty());
        // Late transport signals for drained peers are tolerated.
        assert!(table.remove(handle(1)).is_none());
    }

    #[test]
    fn readmit_after_close_is_allowed() {
        let table = PeerTable::new();
        table.admit(handle(1), info(1), 'a').unwrap();
        assert!(table.close(handle(1)).is_some());
        assert!(table.close(handle(1)).is_none());
        table.admit(handle(1), info(1), 'b').unwrap();
        assert_eq!(*table.lookup(handle(1)).unwrap().context(), 'b');
    }

    #[test]
    fn echo_bookkeeping_is_bounded() {
        let table = PeerTable::new();
        table.admit(handle(1), info(1), ()).unwrap();
        table.admit(handle(2), info(2), ()).unwrap();
        table.close(handle(1)).unwrap();
        assert_eq!(table.pending_echoes(), 1);
        table.forget_closed(handle(1));
        assert_eq!(table.pending_echoes(), 0);

        table.close(handle(2)).unwrap();
        assert!(table.remove(handle(2)).is_none());
        assert_eq!(table.pending_echoes(), 0);

        for raw in 0..(MAX_PENDING_ECHOES as u64 + 10) {
            table.admit(handle(100 + raw), info(1), ()).unwrap();
            table.close(handle(100 + raw)).unwrap();
        }
        assert!(table.pending_echoes() <= MAX_PENDING_ECHOES);
        assert!(table.is_empty());
    }

    #[test]
    fn visitor_reentry_is_refused() {
        let table = PeerTable::new();
        table.admit(handle(1), info(1), ()).unwrap();
        table.admit(handle(2), info(2), ()).unwrap();

        let mut refused = 0;
        let visited = table.for_each(|conn| {
            if table.remove(conn.peer()).is_none() {
                refused += 1;
            }
            assert!(table.admit(handle(9), info(9), ()).is_err());
        });
        assert_eq!(visited, 2);
        assert_eq!(refused, 2);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn other_tables_stay_usable_inside_visitor() {
        let outer = PeerTable::new();
        let inner = PeerTable::new();
        outer.admit(handle(1), info(1), ()).unwrap();
        outer.for_each(|conn| {
            inner
                .admit(conn.peer(), info(1), ())
                .expect("a different table should accept");
        });
        assert_eq!(inner.len(), 1);
    }

    #[test]
    fn concurrent_admit_and_remove() {
        let table = Arc::new(PeerTable::new());
        let workers: Vec<_> = (0..4u64)
            .map(|worker| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    for i in 0..250u64 {
                        let peer = handle(worker * 1_000 + i);
                        table.admit(peer, info(1), i).expect("unique handle");
                        if i % 2 == 0 {
                            assert!(table.remove(peer).is_some());
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker thread should finish");
        }
        assert_eq!(table.len(), 4 * 125);
    }
}
