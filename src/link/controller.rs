//! Link controller.
//!
//! The [`LinkController`] owns the link state, the mode, the last connected
//! peer and the handle of whichever role is running. Every transition happens
//! under one `parking_lot::Mutex`; roles call back into the controller with
//! their [`RoleId`] and never touch its fields.
//!
//! # Transitions
//!
//! | Trigger | Next state |
//! |---------|------------|
//! | `start_server()` | `Listening` |
//! | `connect(peer)` | `Connecting` |
//! | accept or dial succeeded | `Connected` |
//! | session lost, server mode | `Listening` |
//! | session lost, client mode, known peer | `Connecting` |
//! | session lost, otherwise | `None` |
//! | `stop()` | `None` |
//!
//! # Example
//!
//! ```no_run
//! use peerlink::{LinkController, LinkEvent, PeerId};
//! use peerlink::transport::TcpTransport;
//!
//! # async fn example() -> peerlink::Result<()> {
//! let (link, mut events) = LinkController::builder()
//!     .transport(TcpTransport::with_default_port()?)
//!     .build()?;
//!
//! link.connect(&PeerId::new("192.168.1.20:4747"));
//!
//! while let Some(event) = events.recv().await {
//!     if let LinkEvent::DataReceived(data) = event {
//!         link.write(&data).await;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::config::{LinkBuilder, LinkOptions};
use crate::event::{self, EventSink, LinkEvent, LinkEvents, LinkMode, LinkState};
use crate::identifiers::{PeerId, RoleId};
use crate::transport::{Connection, Transport};

use super::initiator::InitiatorRole;
use super::listener::ListenerRole;
use super::session::SessionRole;

// ============================================================================
// WriteOutcome
// ============================================================================

/// What happened to a [`LinkController::write`].
///
/// Write failures are logged and never trigger a reconnect; this value only
/// lets the caller notice them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Bytes were handed to the transport.
    Sent,
    /// The link was not connected; nothing was written.
    Dropped,
    /// The transport rejected the write.
    Failed,
}

// ============================================================================
// ActiveRoles
// ============================================================================

/// Snapshot of the installed role handles.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActiveRoles {
    /// A listener is accepting.
    pub listening: bool,
    /// Peer an initiator is dialing.
    pub dialing: Option<PeerId>,
    /// Peer of the established session.
    pub session: Option<PeerId>,
}

impl ActiveRoles {
    /// Number of installed roles.
    #[must_use]
    pub fn count(&self) -> usize {
        usize::from(self.listening)
            + usize::from(self.dialing.is_some())
            + usize::from(self.session.is_some())
    }
}

// ============================================================================
// Types
// ============================================================================

/// State guarded by the controller lock.
#[derive(Default)]
struct LinkInner {
    state: LinkState,
    mode: LinkMode,
    last_peer: Option<PeerId>,
    listener: Option<ListenerRole>,
    initiator: Option<InitiatorRole>,
    session: Option<Arc<SessionRole>>,
}

/// Controller state shared with the role tasks.
pub(crate) struct LinkShared {
    /// Socket factory.
    pub(super) transport: Arc<dyn Transport>,
    /// Tunables.
    pub(super) options: LinkOptions,
    /// Runtime role tasks are spawned on.
    pub(super) runtime: Handle,
    /// Notification sink.
    pub(super) events: EventSink,
    /// Everything that changes.
    inner: Mutex<LinkInner>,
}

// ============================================================================
// LinkController
// ============================================================================

/// Controller of the single peer link.
///
/// Operations are synchronous (except [`write`](Self::write)) and may be
/// called from any thread, including threads outside the Tokio runtime.
/// Dropping the controller stops every role and closes all sockets.
pub struct LinkController {
    shared: Arc<LinkShared>,
}

impl fmt::Debug for LinkController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkController")
            .field("state", &self.current_state())
            .field("mode", &self.current_mode())
            .field("last_peer", &self.last_connected_peer())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// LinkController - Constructor
// ============================================================================

impl LinkController {
    /// Creates a configuration builder for the controller.
    #[inline]
    #[must_use]
    pub fn builder() -> LinkBuilder {
        LinkBuilder::new()
    }

    /// Creates an idle controller and its event stream.
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        options: LinkOptions,
        runtime: Handle,
    ) -> (Self, LinkEvents) {
        let (sink, events) = event::channel();

        let shared = Arc::new(LinkShared {
            transport,
            options,
            runtime,
            events: sink,
            inner: Mutex::new(LinkInner::default()),
        });

        debug!(service = %shared.options.service.id, "Link controller created");

        (Self { shared }, events)
    }
}

// ============================================================================
// LinkController - Public API
// ============================================================================

impl LinkController {
    /// Switches to server mode and listens for an inbound connection.
    ///
    /// Cancels any initiator and session and forgets the last peer. Calling
    /// it while already listening only updates the mode.
    pub fn start_server(&self) {
        self.shared.start_server();
    }

    /// Switches to client mode and dials `peer`.
    ///
    /// An empty `peer` only switches the mode. Otherwise any initiator,
    /// session and listener are cancelled before the new initiator starts.
    pub fn connect(&self, peer: &PeerId) {
        self.shared.connect(peer);
    }

    /// Cancels every role and returns to `None` / `Undefined`.
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Writes `data` to the connected peer.
    ///
    /// Only the session handle is read under the lock; the transfer itself
    /// runs unsynchronised, so it never waits on the session's read loop.
    pub async fn write(&self, data: &[u8]) -> WriteOutcome {
        self.shared.write(data).await
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn current_state(&self) -> LinkState {
        self.shared.current_state()
    }

    /// Returns the current mode.
    #[inline]
    #[must_use]
    pub fn current_mode(&self) -> LinkMode {
        self.shared.inner.lock().mode
    }

    /// Returns the peer of the last established connection.
    #[inline]
    #[must_use]
    pub fn last_connected_peer(&self) -> Option<PeerId> {
        self.shared.inner.lock().last_peer.clone()
    }

    /// Returns which roles are installed.
    #[must_use]
    pub fn roles(&self) -> ActiveRoles {
        let inner = self.shared.inner.lock();
        ActiveRoles {
            listening: inner.listener.is_some(),
            dialing: inner.initiator.as_ref().map(|i| i.peer().clone()),
            session: inner.session.as_ref().map(|s| s.peer().clone()),
        }
    }

    /// Returns the options the link runs with.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &LinkOptions {
        &self.shared.options
    }
}

impl Drop for LinkController {
    fn drop(&mut self) {
        self.shared.stop();
        debug!("Link controller dropped");
    }
}

// ============================================================================
// LinkShared - Operations
// ============================================================================

impl LinkShared {
    pub(crate) fn current_state(&self) -> LinkState {
        self.inner.lock().state
    }

    fn start_server(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        self.start_server_locked(&mut inner);
    }

    fn connect(self: &Arc<Self>, peer: &PeerId) {
        let mut inner = self.inner.lock();
        self.connect_locked(&mut inner, peer);
    }

    fn stop(&self) {
        let mut inner = self.inner.lock();
        debug!("Stopping link");

        self.set_mode(&mut inner, LinkMode::Undefined);

        if let Some(listener) = inner.listener.take() {
            listener.cancel();
        }
        if let Some(initiator) = inner.initiator.take() {
            initiator.cancel();
        }
        if let Some(session) = inner.session.take() {
            session.cancel();
        }

        self.set_state(&mut inner, LinkState::None);
    }

    async fn write(&self, data: &[u8]) -> WriteOutcome {
        let session = {
            let inner = self.inner.lock();
            if inner.state != LinkState::Connected {
                return WriteOutcome::Dropped;
            }
            match inner.session.as_ref() {
                Some(session) => Arc::clone(session),
                None => return WriteOutcome::Dropped,
            }
        };

        match session.write(data).await {
            Ok(()) => {
                self.events.post(LinkEvent::WriteCompleted { bytes: data.len() });
                WriteOutcome::Sent
            }
            Err(e) => {
                warn!(role = %session.id(), peer = %session.peer(), error = %e, "Write failed");
                WriteOutcome::Failed
            }
        }
    }
}

// ============================================================================
// LinkShared - Role Callbacks
// ============================================================================

impl LinkShared {
    /// A listener or initiator produced a connection.
    ///
    /// Installs a session only if `role` is still installed and the link is
    /// `Listening` or `Connecting`; otherwise the connection is superfluous
    /// and gets closed.
    pub(crate) fn connection_established(
        self: &Arc<Self>,
        role: RoleId,
        connection: Arc<dyn Connection>,
        peer: PeerId,
    ) {
        let mut inner = self.inner.lock();

        let from_listener = inner.listener.as_ref().is_some_and(|l| l.id() == role);
        let from_initiator = inner.initiator.as_ref().is_some_and(|i| i.id() == role);
        let awaiting = matches!(inner.state, LinkState::Listening | LinkState::Connecting);

        if !(from_listener || from_initiator) || !awaiting {
            debug!(%role, %peer, state = %inner.state, "Closing superfluous connection");
            connection.close();
            return;
        }

        // Closing the listening endpoint leaves accepted connections open.
        if let Some(listener) = inner.listener.take() {
            listener.cancel();
        }
        // The winning initiator's socket now backs the session.
        if let Some(initiator) = inner.initiator.take()
            && !from_initiator
        {
            initiator.cancel();
        }
        if let Some(session) = inner.session.take() {
            session.cancel();
        }

        let session = SessionRole::spawn(self, connection, peer.clone());
        info!(session = %session.id(), %peer, mode = %inner.mode, "Link established");

        inner.session = Some(session);
        inner.last_peer = Some(peer);
        self.set_state(&mut inner, LinkState::Connected);
    }

    /// The session's read loop ended.
    ///
    /// Reconnects according to the mode. Reports from sessions that were
    /// already replaced or cancelled are ignored.
    pub(crate) fn session_lost(self: &Arc<Self>, role: RoleId) {
        let mut inner = self.inner.lock();

        if !inner.session.as_ref().is_some_and(|s| s.id() == role) {
            debug!(%role, "Ignoring loss of stale session");
            return;
        }

        if let Some(session) = inner.session.take() {
            session.cancel();
        }

        info!(%role, mode = %inner.mode, "Session lost");

        match inner.mode {
            LinkMode::ServerRole => self.start_server_locked(&mut inner),
            LinkMode::ClientRole => match inner.last_peer.clone() {
                Some(peer) => self.connect_locked(&mut inner, &peer),
                None => self.set_state(&mut inner, LinkState::None),
            },
            LinkMode::Undefined => self.set_state(&mut inner, LinkState::None),
        }
    }

    /// A listener's accept loop ended on its own.
    ///
    /// Clears the handle without changing state; listening resumes only on
    /// the next `start_server`.
    pub(crate) fn listener_finished(&self, role: RoleId) {
        let mut inner = self.inner.lock();

        if inner.listener.as_ref().is_some_and(|l| l.id() == role) {
            inner.listener = None;
            debug!(%role, "Listener handle released");
        }
    }
}

// ============================================================================
// LinkShared - Locked Transitions
// ============================================================================

impl LinkShared {
    fn start_server_locked(self: &Arc<Self>, inner: &mut LinkInner) {
        self.set_mode(inner, LinkMode::ServerRole);

        if let Some(initiator) = inner.initiator.take() {
            initiator.cancel();
        }
        if let Some(session) = inner.session.take() {
            session.cancel();
        }

        if inner.listener.is_some() {
            debug!("Listener already running");
            return;
        }

        inner.last_peer = None;
        self.set_state(inner, LinkState::Listening);

        match ListenerRole::spawn(self) {
            Ok(listener) => inner.listener = Some(listener),
            Err(e) => {
                error!(service = %self.options.service.id, error = %e, "Failed to bind listening endpoint");
            }
        }
    }

    fn connect_locked(self: &Arc<Self>, inner: &mut LinkInner, peer: &PeerId) {
        self.set_mode(inner, LinkMode::ClientRole);

        if peer.is_empty() {
            debug!("Connect ignored, no peer given");
            return;
        }

        // Only ever installed while `Connecting`.
        if let Some(initiator) = inner.initiator.take() {
            initiator.cancel();
        }
        if let Some(session) = inner.session.take() {
            session.cancel();
        }
        if let Some(listener) = inner.listener.take() {
            listener.cancel();
        }

        match InitiatorRole::spawn(self, peer.clone()) {
            Ok(initiator) => {
                inner.initiator = Some(initiator);
                self.set_state(inner, LinkState::Connecting);
            }
            Err(e) => {
                error!(%peer, error = %e, "Failed to open dial socket");
                self.set_state(inner, LinkState::None);
            }
        }
    }

    fn set_state(&self, inner: &mut LinkInner, state: LinkState) {
        info!(from = %inner.state, to = %state, "Link state changed");
        inner.state = state;
        self.events.post(LinkEvent::StateChanged(state));
    }

    fn set_mode(&self, inner: &mut LinkInner, mode: LinkMode) {
        if inner.mode == mode {
            return;
        }
        info!(from = %inner.mode, to = %mode, "Link mode changed");
        inner.mode = mode;
        self.events.post(LinkEvent::ModeChanged(mode));
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::{Duration, Instant};

    use proptest::prelude::*;
    use tokio::time::{sleep, timeout};
    use tracing_subscriber::EnvFilter;

    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use crate::config::ServiceRecord;
    use crate::transport::{ListenHandle, MemoryNetwork, TcpTransport, Transport};

    const BACKOFF: Duration = Duration::from_millis(20);
    const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn link_on(network: &MemoryNetwork, device: &str) -> (LinkController, LinkEvents) {
        init_tracing();
        LinkController::builder()
            .transport(network.transport(device))
            .retry_backoff(BACKOFF)
            .build()
            .expect("link should build")
    }

    fn peer(address: &str) -> PeerId {
        PeerId::new(address)
    }

    async fn next_state(events: &mut LinkEvents) -> LinkState {
        loop {
            let event = timeout(EVENT_TIMEOUT, events.recv())
                .await
                .expect("timed out waiting for a state change")
                .expect("event channel closed");
            if let Some(state) = event.state() {
                return state;
            }
        }
    }

    async fn next_data(events: &mut LinkEvents) -> Vec<u8> {
        loop {
            let event = timeout(EVENT_TIMEOUT, events.recv())
                .await
                .expect("timed out waiting for data")
                .expect("event channel closed");
            if let LinkEvent::DataReceived(data) = event {
                return data;
            }
        }
    }

    /// Dials `target` from `device` outside of any link.
    async fn remote_dial(
        network: &MemoryNetwork,
        device: &str,
        target: &str,
    ) -> anyhow::Result<Arc<dyn Connection>> {
        let socket = network
            .transport(device)
            .dial_socket(&peer(target), &ServiceRecord::default())?;
        Ok(socket.connect().await?)
    }

    /// Brings `link` on device "A" into `Connected` with remote "B" dialing in.
    async fn accept_from_b(
        network: &MemoryNetwork,
        link: &LinkController,
        events: &mut LinkEvents,
    ) -> anyhow::Result<Arc<dyn Connection>> {
        link.start_server();
        assert_eq!(next_state(events).await, LinkState::Listening);

        let remote = remote_dial(network, "B", "A").await?;
        assert_eq!(next_state(events).await, LinkState::Connected);
        Ok(remote)
    }

    #[tokio::test]
    async fn test_start_server_then_inbound_accept() -> anyhow::Result<()> {
        let network = MemoryNetwork::new();
        let (link, mut events) = link_on(&network, "A");
        assert_eq!(link.current_state(), LinkState::None);
        assert_eq!(link.current_mode(), LinkMode::Undefined);

        link.start_server();
        assert_eq!(
            events.drain(),
            vec![
                LinkEvent::ModeChanged(LinkMode::ServerRole),
                LinkEvent::StateChanged(LinkState::Listening),
            ]
        );
        assert!(network.is_listening(&peer("A"), ServiceRecord::default().id));

        let _remote = remote_dial(&network, "B", "A").await?;
        assert_eq!(next_state(&mut events).await, LinkState::Connected);

        assert_eq!(link.current_state(), LinkState::Connected);
        assert_eq!(link.last_connected_peer(), Some(peer("B")));
        assert_eq!(
            link.roles(),
            ActiveRoles {
                listening: false,
                dialing: None,
                session: Some(peer("B")),
            }
        );
        assert!(!network.is_listening(&peer("A"), ServiceRecord::default().id));
        Ok(())
    }

    #[tokio::test]
    async fn test_connect_while_connected_switches_peer() -> anyhow::Result<()> {
        let network = MemoryNetwork::new();
        let (link, mut events) = link_on(&network, "A");
        let c_endpoint = network.transport("C").listen(&ServiceRecord::default())?;
        let remote_b = accept_from_b(&network, &link, &mut events).await?;

        link.connect(&peer("C"));
        assert_eq!(link.roles().session, None);
        assert_eq!(next_state(&mut events).await, LinkState::Connecting);

        let mut buffer = [0u8; 8];
        let n = timeout(EVENT_TIMEOUT, remote_b.read(&mut buffer)).await??;
        assert_eq!(n, 0, "previous session should be closed");

        let (_inbound, from) = timeout(EVENT_TIMEOUT, c_endpoint.accept()).await??;
        assert_eq!(from, peer("A"));
        assert_eq!(next_state(&mut events).await, LinkState::Connected);
        assert_eq!(link.last_connected_peer(), Some(peer("C")));
        assert_eq!(link.current_mode(), LinkMode::ClientRole);
        Ok(())
    }

    #[tokio::test]
    async fn test_dial_retries_with_fixed_backoff() -> anyhow::Result<()> {
        let network = MemoryNetwork::new();
        let (link, mut events) = link_on(&network, "A");
        let _c_endpoint = network.transport("C").listen(&ServiceRecord::default())?;
        network.fail_next_dials("C", 2);

        let started = Instant::now();
        link.connect(&peer("C"));
        assert_eq!(next_state(&mut events).await, LinkState::Connecting);
        assert_eq!(next_state(&mut events).await, LinkState::Connected);

        assert_eq!(network.dial_attempts(&peer("C")), 3);
        assert!(started.elapsed() >= BACKOFF * 2);
        assert_eq!(link.roles().count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_server_mode_session_loss_relistens() -> anyhow::Result<()> {
        let network = MemoryNetwork::new();
        let (link, mut events) = link_on(&network, "A");
        let remote = accept_from_b(&network, &link, &mut events).await?;

        remote.close();
        assert_eq!(next_state(&mut events).await, LinkState::Listening);
        assert_eq!(link.current_mode(), LinkMode::ServerRole);
        assert_eq!(link.last_connected_peer(), None);
        assert!(link.roles().listening);

        let _again = remote_dial(&network, "B", "A").await?;
        assert_eq!(next_state(&mut events).await, LinkState::Connected);
        Ok(())
    }

    #[tokio::test]
    async fn test_client_mode_session_loss_redials_last_peer() -> anyhow::Result<()> {
        let network = MemoryNetwork::new();
        let (link, mut events) = link_on(&network, "A");
        let c_endpoint = network.transport("C").listen(&ServiceRecord::default())?;

        link.connect(&peer("C"));
        assert_eq!(next_state(&mut events).await, LinkState::Connecting);
        assert_eq!(next_state(&mut events).await, LinkState::Connected);
        let (inbound, _) = timeout(EVENT_TIMEOUT, c_endpoint.accept()).await??;

        inbound.close();
        assert_eq!(next_state(&mut events).await, LinkState::Connecting);
        assert_eq!(link.current_mode(), LinkMode::ClientRole);

        let (_inbound, _) = timeout(EVENT_TIMEOUT, c_endpoint.accept()).await??;
        assert_eq!(next_state(&mut events).await, LinkState::Connected);
        assert_eq!(link.last_connected_peer(), Some(peer("C")));
        assert_eq!(network.dial_attempts(&peer("C")), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_client_mode_session_loss_without_peer_goes_idle() -> anyhow::Result<()> {
        let network = MemoryNetwork::new();
        let (link, mut events) = link_on(&network, "A");
        let c_endpoint = network.transport("C").listen(&ServiceRecord::default())?;

        link.connect(&peer("C"));
        assert_eq!(next_state(&mut events).await, LinkState::Connecting);
        assert_eq!(next_state(&mut events).await, LinkState::Connected);
        let (inbound, _) = timeout(EVENT_TIMEOUT, c_endpoint.accept()).await??;

        link.shared.inner.lock().last_peer = None;
        inbound.close();

        assert_eq!(next_state(&mut events).await, LinkState::None);
        assert_eq!(link.current_mode(), LinkMode::ClientRole);
        assert_eq!(link.roles().count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_write_when_not_connected_is_dropped() {
        let network = MemoryNetwork::new();
        let (link, mut events) = link_on(&network, "A");

        assert_eq!(link.write(b"early").await, WriteOutcome::Dropped);
        assert!(events.try_recv().is_none());

        link.start_server();
        let _ = events.drain();
        assert_eq!(link.write(b"early").await, WriteOutcome::Dropped);
        assert!(events.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_duplex_transfer() -> anyhow::Result<()> {
        let network = MemoryNetwork::new();
        let (link, mut events) = link_on(&network, "A");
        let remote = accept_from_b(&network, &link, &mut events).await?;

        assert_eq!(link.write(b"hello").await, WriteOutcome::Sent);
        let mut buffer = [0u8; 16];
        let n = remote.read(&mut buffer).await?;
        assert_eq!(&buffer[..n], b"hello");
        assert_eq!(
            events.recv().await,
            Some(LinkEvent::WriteCompleted { bytes: 5 })
        );

        remote.write(b"world").await?;
        assert_eq!(next_data(&mut events).await, b"world");
        Ok(())
    }

    #[tokio::test]
    async fn test_reads_split_at_buffer_size() -> anyhow::Result<()> {
        let network = MemoryNetwork::new();
        init_tracing();
        let (link, mut events) = LinkController::builder()
            .transport(network.transport("A"))
            .read_buffer_size(4)
            .build()?;
        let remote = accept_from_b(&network, &link, &mut events).await?;

        remote.write(b"abcdef").await?;
        let mut received = next_data(&mut events).await;
        assert!(received.len() <= 4);
        while received.len() < 6 {
            received.extend(next_data(&mut events).await);
        }
        assert_eq!(received, b"abcdef");
        Ok(())
    }

    #[tokio::test]
    async fn test_write_on_closed_connection_fails() -> anyhow::Result<()> {
        let network = MemoryNetwork::new();
        let (link, mut events) = link_on(&network, "A");
        let _remote = accept_from_b(&network, &link, &mut events).await?;

        let session = link.shared.inner.lock().session.clone().expect("session");
        session.connection().close();

        assert_eq!(link.write(b"lost").await, WriteOutcome::Failed);
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_unblocks_pending_write() -> anyhow::Result<()> {
        let network = MemoryNetwork::new();
        let (link, mut events) = link_on(&network, "A");
        let _remote = accept_from_b(&network, &link, &mut events).await?;
        let link = Arc::new(link);

        let writer = {
            let link = Arc::clone(&link);
            tokio::spawn(async move { link.write(&vec![0u8; 1 << 20]).await })
        };

        sleep(BACKOFF).await;
        assert!(!writer.is_finished(), "remote is not reading, write should stall");
        link.stop();

        let outcome = timeout(EVENT_TIMEOUT, writer)
            .await
            .expect("stop should unblock the write")?;
        assert_eq!(outcome, WriteOutcome::Failed);
        assert_eq!(link.current_state(), LinkState::None);
        Ok(())
    }

    #[tokio::test]
    async fn test_tcp_restart_on_fixed_port() -> anyhow::Result<()> {
        init_tracing();
        let loopback = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let port = {
            let scout = TcpTransport::new(loopback, 0)?.bind(&ServiceRecord::default())?;
            let port = scout.local_addr().port();
            scout.close();
            port
        };

        let (link, mut events) = LinkController::builder()
            .transport(TcpTransport::new(loopback, port)?)
            .build()?;

        link.start_server();
        assert!(link.roles().listening);
        link.stop();
        link.start_server();
        assert!(link.roles().listening, "port should be free right after stop");
        let _ = events.drain();

        let socket = TcpTransport::new(loopback, 0)?.dial_socket(
            &PeerId::from(SocketAddr::new(loopback, port)),
            &ServiceRecord::default(),
        )?;
        let remote = timeout(EVENT_TIMEOUT, socket.connect()).await??;
        assert_eq!(next_state(&mut events).await, LinkState::Connected);

        remote.write(b"over tcp").await?;
        assert_eq!(next_data(&mut events).await, b"over tcp");

        link.stop();
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_twice_is_idempotent() {
        let network = MemoryNetwork::new();
        let (link, mut events) = link_on(&network, "A");
        link.start_server();
        let _ = events.drain();

        link.stop();
        assert_eq!(link.current_state(), LinkState::None);
        assert_eq!(
            events.drain(),
            vec![
                LinkEvent::ModeChanged(LinkMode::Undefined),
                LinkEvent::StateChanged(LinkState::None),
            ]
        );

        link.stop();
        assert_eq!(link.current_state(), LinkState::None);
        assert_eq!(events.drain(), vec![LinkEvent::StateChanged(LinkState::None)]);
        assert_eq!(link.roles().count(), 0);
        assert!(!network.is_listening(&peer("A"), ServiceRecord::default().id));
    }

    #[tokio::test]
    async fn test_start_server_is_idempotent() {
        let network = MemoryNetwork::new();
        let (link, mut events) = link_on(&network, "A");

        link.start_server();
        let _ = events.drain();
        link.start_server();

        assert!(events.drain().is_empty());
        assert!(link.roles().listening);
        assert_eq!(link.current_state(), LinkState::Listening);
    }

    #[tokio::test]
    async fn test_connect_to_empty_peer_only_sets_mode() {
        let network = MemoryNetwork::new();
        let (link, mut events) = link_on(&network, "A");

        link.connect(&peer(""));

        assert_eq!(
            events.drain(),
            vec![LinkEvent::ModeChanged(LinkMode::ClientRole)]
        );
        assert_eq!(link.current_state(), LinkState::None);
        assert_eq!(link.roles().count(), 0);
    }

    #[tokio::test]
    async fn test_connect_cancels_listener() {
        let network = MemoryNetwork::new();
        let (link, mut events) = link_on(&network, "A");

        link.start_server();
        link.connect(&peer("C"));
        let _ = events.drain();

        assert!(!network.is_listening(&peer("A"), ServiceRecord::default().id));
        assert_eq!(
            link.roles(),
            ActiveRoles {
                listening: false,
                dialing: Some(peer("C")),
                session: None,
            }
        );
        link.stop();
    }

    #[tokio::test]
    async fn test_bind_failure_leaves_no_listener() -> anyhow::Result<()> {
        let network = MemoryNetwork::new();
        let (link, mut events) = link_on(&network, "A");
        let squatter = network.transport("A").listen(&ServiceRecord::default())?;

        link.start_server();
        assert_eq!(next_state(&mut events).await, LinkState::Listening);
        assert!(!link.roles().listening);

        squatter.close();
        link.start_server();
        assert_eq!(next_state(&mut events).await, LinkState::Listening);
        assert!(link.roles().listening);
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_cancels_retry_loop() {
        let network = MemoryNetwork::new();
        let (link, mut events) = link_on(&network, "A");

        link.connect(&peer("nobody"));
        assert_eq!(next_state(&mut events).await, LinkState::Connecting);
        sleep(BACKOFF * 3).await;
        assert!(network.dial_attempts(&peer("nobody")) >= 2);

        link.stop();
        sleep(BACKOFF).await;
        let attempts = network.dial_attempts(&peer("nobody"));
        sleep(BACKOFF * 4).await;

        assert_eq!(network.dial_attempts(&peer("nobody")), attempts);
        assert_eq!(link.current_state(), LinkState::None);
    }

    #[tokio::test]
    async fn test_superfluous_connection_is_closed() -> anyhow::Result<()> {
        let network = MemoryNetwork::new();
        let (link, mut events) = link_on(&network, "A");
        let remote = accept_from_b(&network, &link, &mut events).await?;

        let endpoint = network.transport("D").listen(&ServiceRecord::default())?;
        let stale = remote_dial(&network, "A", "D").await?;
        let (far_end, _) = endpoint.accept().await?;

        link.shared
            .connection_established(RoleId::next(), stale, peer("D"));

        let mut buffer = [0u8; 8];
        let n = timeout(EVENT_TIMEOUT, far_end.read(&mut buffer)).await??;
        assert_eq!(n, 0);
        assert_eq!(link.current_state(), LinkState::Connected);
        assert_eq!(link.last_connected_peer(), Some(peer("B")));

        remote.write(b"still here").await?;
        assert_eq!(next_data(&mut events).await, b"still here");
        Ok(())
    }

    #[tokio::test]
    async fn test_stale_session_loss_is_ignored() -> anyhow::Result<()> {
        let network = MemoryNetwork::new();
        let (link, mut events) = link_on(&network, "A");
        let _remote = accept_from_b(&network, &link, &mut events).await?;

        link.shared.session_lost(RoleId::next());

        assert_eq!(link.current_state(), LinkState::Connected);
        assert!(events.try_recv().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_drop_tears_down_roles() {
        let network = MemoryNetwork::new();
        let (link, _events) = link_on(&network, "A");

        link.start_server();
        assert!(network.is_listening(&peer("A"), ServiceRecord::default().id));

        drop(link);
        assert!(!network.is_listening(&peer("A"), ServiceRecord::default().id));
    }

    // ------------------------------------------------------------------------
    // At most one role after any sequence of operations
    // ------------------------------------------------------------------------

    #[derive(Debug, Clone)]
    enum Op {
        StartServer,
        Connect(&'static str),
        Stop,
        InboundDial,
        DropRemotes,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::StartServer),
            Just(Op::Connect("C")),
            Just(Op::Connect("nobody")),
            Just(Op::Connect("")),
            Just(Op::Stop),
            Just(Op::InboundDial),
            Just(Op::DropRemotes),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_at_most_one_role(ops in prop::collection::vec(op(), 1..12)) {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .expect("runtime");

            runtime.block_on(async {
                let network = MemoryNetwork::new();
                let (link, _events) = link_on(&network, "A");
                let c_endpoint = network.transport("C").listen(&ServiceRecord::default())
                    .expect("C listens");
                let mut remotes = Vec::new();

                for op in ops {
                    match op {
                        Op::StartServer => link.start_server(),
                        Op::Connect(target) => link.connect(&peer(target)),
                        Op::Stop => link.stop(),
                        Op::InboundDial => {
                            if let Ok(remote) = remote_dial(&network, "B", "A").await {
                                remotes.push(remote);
                            }
                        }
                        Op::DropRemotes => {
                            for remote in remotes.drain(..) {
                                remote.close();
                            }
                        }
                    }
                    assert!(link.roles().count() <= 1, "roles after {op:?}: {:?}", link.roles());

                    sleep(Duration::from_millis(2)).await;
                    assert!(link.roles().count() <= 1);
                }

                link.stop();
                c_endpoint.close();
            });
        }
    }
}
