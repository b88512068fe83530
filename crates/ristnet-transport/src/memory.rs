//! In-process transport fabric.
//!
//! Every context created by one [`MemoryTransport`] shares a fabric. A
//! connect-mode peer links to a started listen-mode context on the same
//! port; writes on one end are delivered to the other end's
//! [`TransportEvents`] on the writer's thread. [`RemotePeer`] simulates a
//! foreign peer dialling a listener.
//!
//! Test hooks: failure injection per [`Stage`], short writes, a call
//! [`journal`](MemoryTransport::journal) and on-demand statistics.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use ristnet_url::EndpointUrl;
use tracing::{debug, info, warn};

use crate::config::PeerConfig;
use crate::error::{Result, TransportError};
use crate::traits::{
    Admission, ConnectInfo, Disposition, Packet, PeerHandle, Profile, Role, Statistics, Target,
    Transport, TransportContext, TransportEvents, DEFAULT_MAX_PAYLOAD,
};

const FIRST_EPHEMERAL_PORT: u16 = 40_000;

/// Transport operation that can be forced to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Create,
    Configure,
    Register,
    Start,
    Write,
    Disconnect,
}

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create { role: Role, profile: Profile },
    Configure,
    RegisterPeer { url: String },
    Start,
    Write { target: Target, len: usize },
    WriteOob { target: Target, len: usize },
    DisconnectPeer { peer: PeerHandle },
    Destroy,
}

/// Transport factory backed by an in-process fabric.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    fabric: Arc<Mutex<Fabric>>,
}

/// A context created by [`MemoryTransport`].
pub struct MemoryContext {
    id: u64,
    fabric: Arc<Mutex<Fabric>>,
    destroyed: bool,
}

/// A simulated foreign peer connected to a listening context.
pub struct RemotePeer {
    fabric: Arc<Mutex<Fabric>>,
    handle: PeerHandle,
    inbox: Arc<Mutex<Inbox>>,
}

#[derive(Default)]
struct Fabric {
    next_context: u64,
    next_peer: u64,
    next_ephemeral: u16,
    contexts: HashMap<u64, ContextEntry>,
    links: HashMap<PeerHandle, Link>,
    listeners: HashMap<u16, u64>,
    failures: Vec<Stage>,
    short_write: Option<usize>,
    max_payload: Option<usize>,
    journal: Vec<Call>,
}

struct ContextEntry {
    role: Role,
    config: PeerConfig,
    events: Option<Arc<dyn TransportEvents>>,
    pending: Vec<Outbound>,
    counters: Counters,
}

#[derive(Default, Clone, Copy)]
struct Counters {
    packets_sent: u64,
    bytes_sent: u64,
    packets_received: u64,
    bytes_received: u64,
}

struct Outbound {
    handle: PeerHandle,
    url: EndpointUrl,
}

struct Link {
    owner: u64,
    remote: Remote,
}

#[derive(Clone)]
enum Remote {
    Peer(PeerHandle),
    External(Arc<Mutex<Inbox>>),
}

#[derive(Default)]
struct Inbox {
    data: Vec<Bytes>,
    oob: Vec<Bytes>,
    open: bool,
}

/// A callback to run once the fabric lock is released.
enum Notice {
    Data(Arc<dyn TransportEvents>, Packet),
    Oob(Arc<dyn TransportEvents>, Packet),
    Disconnect(Arc<dyn TransportEvents>, PeerHandle),
}

impl Notice {
    fn deliver(self) {
        match self {
            Notice::Data(events, packet) => {
                let _ = events.on_data(packet);
            }
            Notice::Oob(events, packet) => events.on_oob_data(packet),
            Notice::Disconnect(events, peer) => events.on_disconnect(peer),
        }
    }
}

fn lock(fabric: &Mutex<Fabric>) -> MutexGuard<'_, Fabric> {
    fabric.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Fabric {
    fn fails(&self, stage: Stage) -> bool {
        self.failures.contains(&stage)
    }

    fn allocate_peer(&mut self) -> PeerHandle {
        self.next_peer += 1;
        PeerHandle::from_raw(self.next_peer)
    }

    fn ephemeral_port(&mut self) -> u16 {
        let port = FIRST_EPHEMERAL_PORT.wrapping_add(self.next_ephemeral);
        self.next_ephemeral = self.next_ephemeral.wrapping_add(1);
        port
    }

    fn events_of(&self, context: u64) -> Option<Arc<dyn TransportEvents>> {
        self.contexts.get(&context).and_then(|c| c.events.clone())
    }

    fn owner_of(&self, peer: PeerHandle) -> Option<u64> {
        self.links.get(&peer).map(|link| link.owner)
    }

    /// Started listener for `url`'s port, other than `exclude`.
    fn listener_for(&self, url: &EndpointUrl, exclude: u64) -> Option<u64> {
        self.listeners
            .get(&url.port())
            .copied()
            .filter(|id| *id != exclude)
            .filter(|id| self.events_of(*id).is_some())
    }

    /// Unlink `peer` and its counterpart, returning disconnect notices for
    /// both ends.
    fn unlink(&mut self, peer: PeerHandle) -> Vec<Notice> {
        let mut notices = Vec::new();
        let Some(link) = self.links.remove(&peer) else {
            return notices;
        };
        if let Some(events) = self.events_of(link.owner) {
            notices.push(Notice::Disconnect(events, peer));
        }
        match link.remote {
            Remote::Peer(remote) => {
                if let Some(remote_link) = self.links.remove(&remote) {
                    if let Some(events) = self.events_of(remote_link.owner) {
                        notices.push(Notice::Disconnect(events, remote));
                    }
                }
            }
            Remote::External(inbox) => {
                lock_inbox(&inbox).open = false;
            }
        }
        notices
    }

    fn stats_for(&self, id: u64) -> Option<(Arc<dyn TransportEvents>, Statistics)> {
        let entry = self.contexts.get(&id)?;
        let events = entry.events.clone()?;
        let peers = self.links.values().filter(|link| link.owner == id).count();
        let counters = entry.counters;
        let stats = Statistics {
            role: entry.role,
            flow_id: entry.config.flow_id,
            peers,
            packets_sent: counters.packets_sent,
            bytes_sent: counters.bytes_sent,
            packets_received: counters.packets_received,
            bytes_received: counters.bytes_received,
            packets_lost: 0,
            packets_recovered: 0,
            rtt_ms: 0,
            quality: 100.0,
        };
        Some((events, stats))
    }
}

fn lock_inbox(inbox: &Mutex<Inbox>) -> MutexGuard<'_, Inbox> {
    inbox.lock().unwrap_or_else(PoisonError::into_inner)
}

fn loopback_for(url: &EndpointUrl) -> IpAddr {
    match url.ip() {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
    }
}

impl MemoryTransport {
    /// Create an empty fabric.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future call of `stage` fail.
    pub fn inject_failure(&self, stage: Stage) {
        let mut fabric = lock(&self.fabric);
        if !fabric.fails(stage) {
            fabric.failures.push(stage);
        }
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        lock(&self.fabric).failures.clear();
    }

    /// Accept at most `limit` bytes per write (`None` restores full writes).
    pub fn set_short_write(&self, limit: Option<usize>) {
        lock(&self.fabric).short_write = limit;
    }

    /// Override the maximum payload size reported by contexts.
    pub fn set_max_payload(&self, max: usize) {
        lock(&self.fabric).max_payload = Some(max);
    }

    /// Every transport call made so far, in order.
    pub fn journal(&self) -> Vec<Call> {
        lock(&self.fabric).journal.clone()
    }

    /// Handles passed to `disconnect_peer`, in order.
    pub fn disconnected_peers(&self) -> Vec<PeerHandle> {
        lock(&self.fabric)
            .journal
            .iter()
            .filter_map(|call| match call {
                Call::DisconnectPeer { peer } => Some(*peer),
                _ => None,
            })
            .collect()
    }

    /// Number of contexts that exist and have not been destroyed.
    pub fn live_contexts(&self) -> usize {
        lock(&self.fabric).contexts.len()
    }

    /// Deliver a statistics snapshot to every started context.
    pub fn emit_statistics(&self) -> usize {
        let snapshots: Vec<_> = {
            let fabric = lock(&self.fabric);
            let mut ids: Vec<u64> = fabric.contexts.keys().copied().collect();
            ids.sort_unstable();
            ids.into_iter().filter_map(|id| fabric.stats_for(id)).collect()
        };
        let count = snapshots.len();
        for (events, stats) in snapshots {
            events.on_statistics(stats);
        }
        count
    }

    /// Signal a disconnect for `peer` to its owner without unlinking it.
    ///
    /// Simulates the duplicate disconnect signals real transports emit.
    pub fn signal_disconnect(&self, peer: PeerHandle) -> bool {
        let events = {
            let fabric = lock(&self.fabric);
            fabric
                .owner_of(peer)
                .and_then(|owner| fabric.events_of(owner))
        };
        match events {
            Some(events) => {
                events.on_disconnect(peer);
                true
            }
            None => false,
        }
    }

    /// Dial the listener on `port` from `from`, as a foreign peer would.
    pub fn dial(&self, port: u16, from: SocketAddr) -> Result<RemotePeer> {
        let (listener, events, handle) = {
            let mut fabric = lock(&self.fabric);
            let listener = fabric
                .listeners
                .get(&port)
                .copied()
                .ok_or_else(|| TransportError::ConnectionRefused(format!("no listener on {port}")))?;
            let events = fabric.events_of(listener).ok_or_else(|| {
                TransportError::ConnectionRefused(format!("listener on {port} not started"))
            })?;
            (listener, events, fabric.allocate_peer())
        };

        let unspecified = match from.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let info = ConnectInfo {
            remote: from,
            local: SocketAddr::new(unspecified, port),
        };
        if events.on_connect(&info, handle) == Admission::Reject {
            return Err(TransportError::ConnectionRefused(format!(
                "{from} rejected by listener on {port}"
            )));
        }

        let inbox = Arc::new(Mutex::new(Inbox {
            open: true,
            ..Inbox::default()
        }));
        lock(&self.fabric).links.insert(
            handle,
            Link {
                owner: listener,
                remote: Remote::External(Arc::clone(&inbox)),
            },
        );
        debug!(%handle, %from, port, "remote peer connected");

        Ok(RemotePeer {
            fabric: Arc::clone(&self.fabric),
            handle,
            inbox,
        })
    }

    /// Link every pending outbound peer that now has a started listener.
    fn connect_pending(&self) {
        loop {
            let attempt = {
                let mut fabric = lock(&self.fabric);
                let mut found = None;
                'search: for (id, entry) in &fabric.contexts {
                    if entry.events.is_none() {
                        continue;
                    }
                    for (index, outbound) in entry.pending.iter().enumerate() {
                        if let Some(listener) = fabric.listener_for(&outbound.url, *id) {
                            found = Some((*id, index, listener));
                            break 'search;
                        }
                    }
                }
                let Some((connector, index, listener)) = found else {
                    return;
                };
                let outbound = match fabric.contexts.get_mut(&connector) {
                    Some(entry) => entry.pending.remove(index),
                    None => return,
                };
                let remote_handle = fabric.allocate_peer();
                let port = fabric.ephemeral_port();
                let Some(events) = fabric.events_of(listener) else {
                    return;
                };
                let info = ConnectInfo {
                    remote: SocketAddr::new(loopback_for(&outbound.url), port),
                    local: SocketAddr::new(outbound.url.ip(), outbound.url.port()),
                };
                (connector, outbound, listener, remote_handle, events, info)
            };

            let (connector, outbound, listener, remote_handle, events, info) = attempt;
            match events.on_connect(&info, remote_handle) {
                Admission::Accept => {
                    let mut fabric = lock(&self.fabric);
                    fabric.links.insert(
                        outbound.handle,
                        Link {
                            owner: connector,
                            remote: Remote::Peer(remote_handle),
                        },
                    );
                    fabric.links.insert(
                        remote_handle,
                        Link {
                            owner: listener,
                            remote: Remote::Peer(outbound.handle),
                        },
                    );
                    debug!(
                        local = %outbound.handle,
                        remote = %remote_handle,
                        url = %outbound.url,
                        "memory link established"
                    );
                }
                Admission::Reject => {
                    debug!(url = %outbound.url, "memory link rejected by listener");
                }
            }
        }
    }
}

impl Transport for MemoryTransport {
    type Context = MemoryContext;

    fn create(&self, role: Role, profile: Profile) -> Result<MemoryContext> {
        let mut fabric = lock(&self.fabric);
        fabric.journal.push(Call::Create { role, profile });
        if fabric.fails(Stage::Create) {
            return Err(TransportError::CreateFailed {
                role,
                reason: "injected failure".to_string(),
            });
        }
        fabric.next_context += 1;
        let id = fabric.next_context;
        fabric.contexts.insert(
            id,
            ContextEntry {
                role,
                config: PeerConfig::default(),
                events: None,
                pending: Vec::new(),
                counters: Counters::default(),
            },
        );
        debug!(id, %role, ?profile, "memory context created");
        Ok(MemoryContext {
            id,
            fabric: Arc::clone(&self.fabric),
            destroyed: false,
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }

    fn version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }
}

impl MemoryContext {
    fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            fabric: Arc::clone(&self.fabric),
        }
    }

    fn live<'a>(&self, fabric: &'a mut Fabric) -> Result<&'a mut ContextEntry> {
        if self.destroyed {
            return Err(TransportError::Destroyed);
        }
        fabric
            .contexts
            .get_mut(&self.id)
            .ok_or(TransportError::Destroyed)
    }

    fn send(&self, target: Target, payload: &[u8], oob: bool) -> Result<usize> {
        let notices = {
            let mut guard = lock(&self.fabric);
            let fabric = &mut *guard;
            fabric.journal.push(if oob {
                Call::WriteOob {
                    target,
                    len: payload.len(),
                }
            } else {
                Call::Write {
                    target,
                    len: payload.len(),
                }
            });

            let max = fabric.max_payload.unwrap_or(DEFAULT_MAX_PAYLOAD);
            let fails = fabric.fails(Stage::Write);
            let short_write = fabric.short_write;
            let entry = self.live(fabric)?;
            if entry.events.is_none() {
                return Err(TransportError::NotStarted);
            }
            if payload.len() > max {
                return Err(TransportError::PayloadTooLarge {
                    size: payload.len(),
                    max,
                });
            }
            if fails {
                return Err(TransportError::WriteFailed("injected failure".to_string()));
            }

            let accepted = short_write.map_or(payload.len(), |limit| limit.min(payload.len()));
            let flow_id = entry.config.flow_id;
            entry.counters.packets_sent += 1;
            entry.counters.bytes_sent += accepted as u64;

            let peers: Vec<PeerHandle> = match target {
                Target::Peer(peer) => match fabric.links.get(&peer) {
                    Some(link) if link.owner == self.id => vec![peer],
                    _ => {
                        let pending = fabric
                            .contexts
                            .get(&self.id)
                            .is_some_and(|c| c.pending.iter().any(|o| o.handle == peer));
                        if !pending {
                            return Err(TransportError::UnknownPeer(peer));
                        }
                        Vec::new()
                    }
                },
                Target::Broadcast => fabric
                    .links
                    .iter()
                    .filter(|(_, link)| link.owner == self.id)
                    .map(|(peer, _)| *peer)
                    .collect(),
            };

            let bytes = Bytes::copy_from_slice(&payload[..accepted]);
            let mut notices = Vec::new();
            for peer in peers {
                let Some(remote) = fabric.links.get(&peer).map(|link| link.remote.clone()) else {
                    continue;
                };
                match remote {
                    Remote::Peer(remote) => {
                        let Some(owner) = fabric.owner_of(remote) else {
                            continue;
                        };
                        if let Some(entry) = fabric.contexts.get_mut(&owner) {
                            entry.counters.packets_received += 1;
                            entry.counters.bytes_received += accepted as u64;
                        }
                        if let Some(events) = fabric.events_of(owner) {
                            let packet = Packet {
                                peer: remote,
                                flow_id,
                                payload: bytes.clone(),
                            };
                            notices.push(if oob {
                                Notice::Oob(events, packet)
                            } else {
                                Notice::Data(events, packet)
                            });
                        }
                    }
                    Remote::External(inbox) => {
                        let mut inbox = lock_inbox(&inbox);
                        if oob {
                            inbox.oob.push(bytes.clone());
                        } else {
                            inbox.data.push(bytes.clone());
                        }
                    }
                }
            }
            (notices, accepted)
        };

        let (notices, accepted) = notices;
        for notice in notices {
            notice.deliver();
        }
        Ok(accepted)
    }
}

impl TransportContext for MemoryContext {
    fn configure(&mut self, config: &PeerConfig) -> Result<()> {
        let mut fabric = lock(&self.fabric);
        fabric.journal.push(Call::Configure);
        if fabric.fails(Stage::Configure) {
            return Err(TransportError::ConfigRejected {
                field: "profile",
                reason: "injected failure".to_string(),
            });
        }
        config.validate()?;
        let entry = self.live(&mut fabric)?;
        entry.config = config.clone();
        Ok(())
    }

    fn register_peer(&mut self, config: &PeerConfig) -> Result<PeerHandle> {
        let mut fabric = lock(&self.fabric);
        fabric.journal.push(Call::RegisterPeer {
            url: config.address.clone(),
        });
        if fabric.fails(Stage::Register) {
            return Err(TransportError::RegisterFailed {
                url: config.address.clone(),
                reason: "injected failure".to_string(),
            });
        }
        config.validate()?;
        let url = EndpointUrl::parse(&config.address)?;
        self.live(&mut fabric)?;

        let handle = fabric.allocate_peer();
        if url.is_listen() {
            if let Some(owner) = fabric.listeners.get(&url.port()) {
                if *owner != self.id {
                    return Err(TransportError::AddressInUse(url.to_string()));
                }
            }
            fabric.listeners.insert(url.port(), self.id);
            info!(%url, %handle, "memory listener registered");
        } else {
            if let Some(entry) = fabric.contexts.get_mut(&self.id) {
                entry.pending.push(Outbound { handle, url });
            }
            debug!(%handle, url = %config.address, "memory connector registered");
        }
        Ok(handle)
    }

    fn start(&mut self, events: Arc<dyn TransportEvents>) -> Result<()> {
        {
            let mut fabric = lock(&self.fabric);
            fabric.journal.push(Call::Start);
            if fabric.fails(Stage::Start) {
                return Err(TransportError::StartFailed("injected failure".to_string()));
            }
            let entry = self.live(&mut fabric)?;
            if entry.events.is_some() {
                return Err(TransportError::StartFailed("already started".to_string()));
            }
            entry.events = Some(events);
        }
        self.transport().connect_pending();
        Ok(())
    }

    fn write(&self, target: Target, payload: &[u8]) -> Result<usize> {
        self.send(target, payload, false)
    }

    fn write_oob(&self, target: Target, payload: &[u8]) -> Result<usize> {
        self.send(target, payload, true)
    }

    fn disconnect_peer(&self, peer: PeerHandle) -> Result<()> {
        let notices = {
            let mut guard = lock(&self.fabric);
            let fabric = &mut *guard;
            fabric.journal.push(Call::DisconnectPeer { peer });
            if fabric.fails(Stage::Disconnect) {
                return Err(TransportError::WriteFailed("injected failure".to_string()));
            }
            let entry = self.live(fabric)?;
            if let Some(index) = entry.pending.iter().position(|o| o.handle == peer) {
                entry.pending.remove(index);
                return Ok(());
            }
            if fabric.owner_of(peer) != Some(self.id) {
                return Err(TransportError::UnknownPeer(peer));
            }
            fabric.unlink(peer)
        };
        for notice in notices {
            notice.deliver();
        }
        Ok(())
    }

    fn destroy(&mut self) -> Result<()> {
        if self.destroyed {
            return Err(TransportError::Destroyed);
        }
        let notices = {
            let mut guard = lock(&self.fabric);
            let fabric = &mut *guard;
            fabric.journal.push(Call::Destroy);
            let id = self.id;
            // Stop our own callbacks before unlinking so only remotes hear about it.
            if let Some(entry) = fabric.contexts.get_mut(&id) {
                entry.events = None;
            }
            fabric.listeners.retain(|_, owner| *owner != id);
            let owned: Vec<PeerHandle> = fabric
                .links
                .iter()
                .filter(|(_, link)| link.owner == id)
                .map(|(peer, _)| *peer)
                .collect();
            let notices: Vec<Notice> = owned
                .into_iter()
                .flat_map(|peer| fabric.unlink(peer))
                .collect();
            fabric.contexts.remove(&id);
            notices
        };
        self.destroyed = true;
        debug!(id = self.id, "memory context destroyed");
        for notice in notices {
            notice.deliver();
        }
        Ok(())
    }

    fn max_payload_size(&self) -> usize {
        lock(&self.fabric).max_payload.unwrap_or(DEFAULT_MAX_PAYLOAD)
    }
}

impl Drop for MemoryContext {
    fn drop(&mut self) {
        if !self.destroyed {
            warn!(id = self.id, "memory context dropped without destroy");
            let _ = self.destroy();
        }
    }
}

impl RemotePeer {
    /// Handle the listening context knows this peer by.
    pub fn handle(&self) -> PeerHandle {
        self.handle
    }

    /// Whether the listener still holds the link.
    pub fn is_connected(&self) -> bool {
        lock_inbox(&self.inbox).open
    }

    /// Send on the reliable path. Returns the listener's disposition, or
    /// `None` if the link is gone.
    pub fn send(&self, payload: &[u8]) -> Option<Disposition> {
        let (events, flow_id) = self.route()?;
        Some(events.on_data(Packet {
            peer: self.handle,
            flow_id,
            payload: Bytes::copy_from_slice(payload),
        }))
    }

    /// Send on the out-of-band path. Returns false if the link is gone.
    pub fn send_oob(&self, payload: &[u8]) -> bool {
        let Some((events, flow_id)) = self.route() else {
            return false;
        };
        events.on_oob_data(Packet {
            peer: self.handle,
            flow_id,
            payload: Bytes::copy_from_slice(payload),
        });
        true
    }

    /// Payloads received on the reliable path.
    pub fn received(&self) -> Vec<Bytes> {
        lock_inbox(&self.inbox).data.clone()
    }

    /// Payloads received on the out-of-band path.
    pub fn received_oob(&self) -> Vec<Bytes> {
        lock_inbox(&self.inbox).oob.clone()
    }

    /// Close the link; the listener sees a disconnect.
    pub fn hang_up(&self) {
        let notices = lock(&self.fabric).unlink(self.handle);
        for notice in notices {
            notice.deliver();
        }
    }

    fn route(&self) -> Option<(Arc<dyn TransportEvents>, u32)> {
        let mut fabric = lock(&self.fabric);
        let owner = fabric.owner_of(self.handle)?;
        let events = fabric.events_of(owner)?;
        let entry = fabric.contexts.get_mut(&owner)?;
        entry.counters.packets_received += 1;
        Some((events, entry.config.flow_id))
    }
}
