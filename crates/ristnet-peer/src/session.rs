use std::fmt;
use std::sync::Arc;

use ristnet_transport::{
    PeerHandle, Role, Target, Transport, TransportContext, TransportError, TransportEvents,
};
use ristnet_url::Endpoint;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::dispatch::Dispatcher;
use crate::error::{Result, SessionError};
use crate::handler::SessionHandler;
use crate::table::Connection;

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Uninitialized,
    /// Only observable while `init` runs.
    Configuring,
    Running,
    Destroyed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Configuring => "configuring",
            SessionState::Running => "running",
            SessionState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// A peer the session registered itself at init.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisteredPeer {
    pub url: String,
    pub handle: PeerHandle,
}

#[derive(Clone, Copy)]
enum Channel {
    Data,
    Oob,
}

/// One transport context in the receiver or sender role.
///
/// `init` and `destroy` need exclusive access; the data path and the close
/// operations work through `&self` and may run concurrently with transport
/// callbacks. Dropping a session destroys it.
pub struct Session<T: Transport, H: SessionHandler> {
    role: Role,
    transport: T,
    handler: Arc<H>,
    state: SessionState,
    dispatcher: Option<Arc<Dispatcher<H>>>,
    context: Option<T::Context>,
    config: Option<SessionConfig>,
    registered: Vec<RegisteredPeer>,
}

impl<T: Transport, H: SessionHandler> Session<T, H> {
    /// Session that receives streams, typically on listen endpoints.
    pub fn receiver(transport: T, handler: H) -> Self {
        Self::new(Role::Receiver, transport, handler)
    }

    /// Session that sends streams, typically to connect endpoints.
    pub fn sender(transport: T, handler: H) -> Self {
        Self::new(Role::Sender, transport, handler)
    }

    pub fn new(role: Role, transport: T, handler: H) -> Self {
        Self {
            role,
            transport,
            handler: Arc::new(handler),
            state: SessionState::Uninitialized,
            dispatcher: None,
            context: None,
            config: None,
            registered: Vec::new(),
        }
    }

    /// Create, configure, register and start the transport.
    ///
    /// Endpoint addresses are checked before the transport is touched. Any
    /// transport failure after the context exists destroys it again and
    /// leaves the session [`Destroyed`](SessionState::Destroyed).
    pub fn init(&mut self, endpoints: &[Endpoint], config: SessionConfig) -> Result<()> {
        match self.state {
            SessionState::Uninitialized => {}
            SessionState::Running | SessionState::Configuring => {
                return Err(SessionError::AlreadyInitialized)
            }
            SessionState::Destroyed => return Err(SessionError::Destroyed),
        }
        if endpoints.is_empty() {
            error!(role = %self.role, "endpoint list is empty");
            return Err(SessionError::EmptyEndpointList);
        }

        let urls = endpoints
            .iter()
            .map(|endpoint| {
                endpoint
                    .to_url()
                    .map_err(|source| SessionError::InvalidEndpoint {
                        endpoint: endpoint.to_string(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut context = self
            .transport
            .create(self.role, config.profile)
            .map_err(|err| {
                error!(role = %self.role, error = %err, "transport context creation failed");
                SessionError::TransportCreateFailed(err)
            })?;
        self.state = SessionState::Configuring;

        let base = config.to_peer_config(self.role);
        if let Err(err) = context.configure(&base) {
            self.roll_back(context, "configure", &err);
            return Err(SessionError::ConfigRejected(err));
        }

        for (endpoint, url) in endpoints.iter().zip(urls) {
            let registered = self
                .transport
                .parse_address(&url, &base)
                .and_then(|mut peer| {
                    if let Some(weight) = endpoint.weight() {
                        peer.weight = weight;
                    }
                    context.register_peer(&peer)
                });
            match registered {
                Ok(handle) => {
                    debug!(role = %self.role, endpoint = %url, %handle, "peer registered");
                    self.registered.push(RegisteredPeer { url, handle });
                }
                Err(err) => {
                    self.roll_back(context, "register", &err);
                    return Err(SessionError::PeerRegistrationFailed {
                        endpoint: url,
                        source: err,
                    });
                }
            }
        }

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&self.handler),
            config.unbound_data,
        ));
        self.dispatcher = Some(Arc::clone(&dispatcher));
        let events: Arc<dyn TransportEvents> = dispatcher;
        if let Err(err) = context.start(events) {
            self.roll_back(context, "start", &err);
            return Err(SessionError::StartFailed(err));
        }

        info!(
            role = %self.role,
            transport = self.transport.name(),
            peers = self.registered.len(),
            "session running"
        );
        self.context = Some(context);
        self.config = Some(config);
        self.state = SessionState::Running;
        Ok(())
    }

    fn roll_back(&mut self, mut context: T::Context, stage: &'static str, err: &TransportError) {
        error!(role = %self.role, stage, error = %err, "session init failed, rolling back");
        if let Err(err) = context.destroy() {
            warn!(role = %self.role, error = %err, "transport destroy failed during rollback");
        }
        self.release_peers();
        self.registered.clear();
        self.state = SessionState::Destroyed;
    }

    fn release_peers(&self) -> usize {
        let Some(dispatcher) = &self.dispatcher else {
            return 0;
        };
        let drained = dispatcher.peers().drain();
        let count = drained.len();
        for connection in drained {
            dispatcher.notify_disconnect(connection);
        }
        dispatcher.peers().clear();
        count
    }

    /// Send on the reliable path to `target`, or to every peer when `None`.
    ///
    /// Returns the number of bytes sent, which always equals
    /// `payload.len()`; a partial write is reported as
    /// [`SessionError::ShortWrite`].
    pub fn send(&self, payload: &[u8], target: Option<PeerHandle>) -> Result<usize> {
        self.write(Channel::Data, payload, target)
    }

    /// Send on the out-of-band path. Delivery is best effort and unordered;
    /// lost OOB payloads are never retransmitted.
    pub fn send_oob(&self, payload: &[u8], target: Option<PeerHandle>) -> Result<usize> {
        self.write(Channel::Oob, payload, target)
    }

    fn write(&self, channel: Channel, payload: &[u8], target: Option<PeerHandle>) -> Result<usize> {
        let context = self.running_context()?;
        let max = context.max_payload_size();
        if payload.len() > max {
            return Err(SessionError::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }

        let target = Target::from(target);
        let sent = match channel {
            Channel::Data => context.write(target, payload),
            Channel::Oob => context.write_oob(target, payload),
        }?;
        if sent < payload.len() {
            warn!(%target, sent, requested = payload.len(), "short write");
            return Err(SessionError::ShortWrite {
                sent,
                requested: payload.len(),
            });
        }
        Ok(sent)
    }

    fn running_context(&self) -> Result<&T::Context> {
        match (&self.state, &self.context) {
            (SessionState::Running, Some(context)) => Ok(context),
            _ => Err(SessionError::NotRunning),
        }
    }

    /// Disconnect one admitted peer.
    pub fn close_client(&self, peer: PeerHandle) -> Result<()> {
        let dispatcher = self
            .dispatcher
            .as_ref()
            .ok_or(SessionError::UnknownPeer(peer))?;
        let connection = dispatcher
            .peers()
            .close(peer)
            .ok_or(SessionError::UnknownPeer(peer))?;
        if !self.tear_down(peer) {
            dispatcher.peers().forget_closed(peer);
        }
        dispatcher.notify_disconnect(connection);
        debug!(role = %self.role, %peer, "client closed");
        Ok(())
    }

    /// Disconnect every admitted peer. Returns how many were closed.
    ///
    /// The table is emptied in one step before any peer is torn down, so
    /// disconnect signals raised by the teardown find nothing to remove.
    pub fn close_all(&self) -> usize {
        let Some(dispatcher) = &self.dispatcher else {
            return 0;
        };
        let drained = dispatcher.peers().drain();
        let count = drained.len();
        for connection in drained {
            if !self.tear_down(connection.peer()) {
                dispatcher.peers().forget_closed(connection.peer());
            }
            dispatcher.notify_disconnect(connection);
        }
        if count > 0 {
            info!(role = %self.role, count, "all clients closed");
        }
        count
    }

    /// Returns false when the transport refused, so no disconnect echo will
    /// follow.
    fn tear_down(&self, peer: PeerHandle) -> bool {
        let Some(context) = &self.context else {
            return false;
        };
        match context.disconnect_peer(peer) {
            Ok(()) => true,
            Err(err) => {
                warn!(%peer, error = %err, "transport peer teardown failed");
                false
            }
        }
    }

    /// Stop the transport and release every peer.
    ///
    /// Safe to call more than once; later calls only log a warning.
    pub fn destroy(&mut self) {
        if self.state == SessionState::Destroyed {
            warn!(role = %self.role, "session already destroyed");
            return;
        }
        if let Some(mut context) = self.context.take() {
            if let Err(err) = context.destroy() {
                warn!(role = %self.role, error = %err, "transport destroy failed");
            }
        }
        let released = self.release_peers();
        self.registered.clear();
        self.state = SessionState::Destroyed;
        info!(role = %self.role, released, "session destroyed");
    }

    /// Visit every admitted connection under the peer table lock.
    ///
    /// The visitor must not call back into this session's peer operations;
    /// such calls are refused.
    pub fn list_active_clients(&self, visitor: impl FnMut(&Arc<Connection<H::Context>>)) -> usize {
        match &self.dispatcher {
            Some(dispatcher) => dispatcher.peers().for_each(visitor),
            None => 0,
        }
    }

    /// Handles of the currently admitted peers.
    pub fn active_clients(&self) -> Vec<PeerHandle> {
        self.dispatcher
            .as_ref()
            .map(|dispatcher| dispatcher.peers().handles())
            .unwrap_or_default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Configuration applied at init, while the session is running.
    pub fn config(&self) -> Option<&SessionConfig> {
        self.config.as_ref().filter(|_| self.state == SessionState::Running)
    }

    /// Peers registered from the endpoint list at init.
    pub fn registered_peers(&self) -> &[RegisteredPeer] {
        &self.registered
    }

    /// Largest payload `send` accepts, while running.
    pub fn max_payload_size(&self) -> Option<usize> {
        self.running_context()
            .ok()
            .map(TransportContext::max_payload_size)
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: Transport, H: SessionHandler> Drop for Session<T, H> {
    fn drop(&mut self) {
        if self.state != SessionState::Destroyed {
            self.destroy();
        }
    }
}
