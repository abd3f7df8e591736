//! In-process transport.
//!
//! A [`MemoryNetwork`] is a registry of named devices. Each device gets a
//! [`MemoryTransport`]; listening registers `(device, service)` in the
//! network and dialing connects to that registration through a
//! `tokio::io::duplex` pipe.
//!
//! The network can fail dials on purpose ([`MemoryNetwork::fail_next_dials`])
//! and counts them ([`MemoryNetwork::dial_attempts`]), which is how the link's
//! retry and reconnect behaviour is exercised without radios.
//!
//! # Example
//!
//! ```
//! use peerlink::{PeerId, ServiceRecord};
//! use peerlink::transport::{MemoryNetwork, Transport};
//!
//! # async fn example() -> peerlink::Result<()> {
//! let network = MemoryNetwork::new();
//! let server = network.transport("A");
//! let client = network.transport("B");
//!
//! let service = ServiceRecord::default();
//! let endpoint = server.listen(&service)?;
//! let socket = client.dial_socket(&PeerId::new("A"), &service)?;
//!
//! let outbound = socket.connect().await?;
//! let (inbound, from) = endpoint.accept().await?;
//! assert_eq!(from, PeerId::new("B"));
//! # let _ = (outbound, inbound);
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf, duplex, split};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::config::ServiceRecord;
use crate::error::{Error, Result};
use crate::identifiers::{PeerId, ServiceId};

use super::{CloseSignal, Connection, DialSocket, ListenHandle, StreamConnection, Transport};

// ============================================================================
// Constants
// ============================================================================

/// Capacity of each in-memory pipe direction.
const PIPE_CAPACITY: usize = 64 * 1024;

// ============================================================================
// Types
// ============================================================================

/// Connection type produced by the memory network.
pub type MemoryConnection = StreamConnection<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

/// An accepted connection waiting in a listener's queue.
type Incoming = (Arc<dyn Connection>, PeerId);

/// Key of a listening registration.
type ServiceKey = (PeerId, ServiceId);

/// A listening registration.
struct Registration {
    /// Id of the endpoint that owns it.
    endpoint_id: u64,
    /// Queue feeding the endpoint's `accept`.
    incoming: mpsc::UnboundedSender<Incoming>,
}

/// Shared network state.
#[derive(Default)]
struct NetworkState {
    /// Listening endpoints by device and service.
    listeners: FxHashMap<ServiceKey, Registration>,
    /// Dials still to be failed, by target device.
    pending_failures: FxHashMap<PeerId, u32>,
    /// Dial attempts made, by target device.
    attempts: FxHashMap<PeerId, u32>,
}

// ============================================================================
// MemoryNetwork
// ============================================================================

/// Registry of in-process devices.
///
/// Cheap to clone; clones share the same network.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
    next_endpoint: Arc<AtomicU64>,
}

impl MemoryNetwork {
    /// Creates an empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the transport of device `address`.
    #[must_use]
    pub fn transport(&self, address: impl Into<PeerId>) -> MemoryTransport {
        MemoryTransport {
            local: address.into(),
            network: self.clone(),
        }
    }

    /// Makes the next `count` dials to `peer` fail as refused.
    pub fn fail_next_dials(&self, peer: impl Into<PeerId>, count: u32) {
        self.state
            .lock()
            .pending_failures
            .insert(peer.into(), count);
    }

    /// Returns how many dials to `peer` were attempted.
    #[must_use]
    pub fn dial_attempts(&self, peer: &PeerId) -> u32 {
        self.state.lock().attempts.get(peer).copied().unwrap_or(0)
    }

    /// Returns `true` if `peer` has a listening endpoint for `service`.
    #[must_use]
    pub fn is_listening(&self, peer: &PeerId, service: ServiceId) -> bool {
        self.state
            .lock()
            .listeners
            .contains_key(&(peer.clone(), service))
    }

    /// Removes a registration if it still belongs to `endpoint_id`.
    fn unregister(&self, key: &ServiceKey, endpoint_id: u64) {
        let mut state = self.state.lock();
        if state
            .listeners
            .get(key)
            .is_some_and(|registration| registration.endpoint_id == endpoint_id)
        {
            state.listeners.remove(key);
        }
    }

    /// Performs one dial from `local` to `key`.
    fn dial(&self, local: &PeerId, key: &ServiceKey) -> Result<Arc<dyn Connection>> {
        let (peer, _) = key;
        let mut state = self.state.lock();

        *state.attempts.entry(peer.clone()).or_default() += 1;

        if let Some(remaining) = state.pending_failures.get_mut(peer)
            && *remaining > 0
        {
            *remaining -= 1;
            trace!(%peer, remaining = *remaining, "Injected dial failure");
            return Err(Error::connection_refused(peer.clone()));
        }

        let registration = state
            .listeners
            .get(key)
            .ok_or_else(|| Error::connection_refused(peer.clone()))?;

        let (near, far) = duplex(PIPE_CAPACITY);
        let (near_read, near_write) = split(near);
        let (far_read, far_write) = split(far);

        let inbound: Arc<dyn Connection> =
            Arc::new(MemoryConnection::new(local.clone(), far_read, far_write));
        let outbound: Arc<dyn Connection> =
            Arc::new(MemoryConnection::new(peer.clone(), near_read, near_write));

        registration
            .incoming
            .send((inbound, local.clone()))
            .map_err(|_| Error::connection_refused(peer.clone()))?;

        Ok(outbound)
    }
}

// ============================================================================
// MemoryTransport
// ============================================================================

/// Transport of one device on a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryTransport {
    /// Address of this device.
    local: PeerId,
    /// Network the device lives on.
    network: MemoryNetwork,
}

impl MemoryTransport {
    /// Address of this device.
    #[inline]
    #[must_use]
    pub fn local(&self) -> &PeerId {
        &self.local
    }
}

impl Transport for MemoryTransport {
    fn listen(&self, service: &ServiceRecord) -> Result<Arc<dyn ListenHandle>> {
        let key = (self.local.clone(), service.id);
        let endpoint_id = self.network.next_endpoint.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut state = self.network.state.lock();
            if state.listeners.contains_key(&key) {
                return Err(Error::bind(service.id, "service already registered"));
            }
            state.listeners.insert(
                key.clone(),
                Registration {
                    endpoint_id,
                    incoming: tx,
                },
            );
        }

        debug!(device = %self.local, service = %service.name, "Memory endpoint listening");

        Ok(Arc::new(MemoryListenHandle {
            key,
            endpoint_id,
            network: self.network.clone(),
            incoming: tokio::sync::Mutex::new(rx),
            signal: CloseSignal::new(),
        }))
    }

    fn dial_socket(&self, peer: &PeerId, service: &ServiceRecord) -> Result<Arc<dyn DialSocket>> {
        if peer.is_empty() {
            return Err(Error::invalid_peer(peer.clone()));
        }

        Ok(Arc::new(MemoryDialSocket {
            local: self.local.clone(),
            key: (peer.clone(), service.id),
            network: self.network.clone(),
            signal: CloseSignal::new(),
        }))
    }
}

// ============================================================================
// MemoryListenHandle
// ============================================================================

/// Listening endpoint on a memory network.
struct MemoryListenHandle {
    key: ServiceKey,
    endpoint_id: u64,
    network: MemoryNetwork,
    incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<Incoming>>,
    signal: CloseSignal,
}

#[async_trait]
impl ListenHandle for MemoryListenHandle {
    async fn accept(&self) -> Result<(Arc<dyn Connection>, PeerId)> {
        let mut incoming = self.incoming.lock().await;

        tokio::select! {
            biased;
            () = self.signal.closed() => Err(Error::ConnectionClosed),
            next = incoming.recv() => next.ok_or(Error::ConnectionClosed),
        }
    }

    fn close(&self) {
        if self.signal.close() {
            self.network.unregister(&self.key, self.endpoint_id);
            trace!(device = %self.key.0, "Memory endpoint closed");
        }
    }
}

impl Drop for MemoryListenHandle {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// MemoryDialSocket
// ============================================================================

/// Dial socket on a memory network.
struct MemoryDialSocket {
    local: PeerId,
    key: ServiceKey,
    network: MemoryNetwork,
    signal: CloseSignal,
}

#[async_trait]
impl DialSocket for MemoryDialSocket {
    fn peer(&self) -> &PeerId {
        &self.key.0
    }

    async fn connect(&self) -> Result<Arc<dyn Connection>> {
        if self.signal.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        // Let a concurrent close win before the attempt is counted.
        tokio::task::yield_now().await;
        if self.signal.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        self.network.dial(&self.local, &self.key)
    }

    fn close(&self) {
        self.signal.close();
    }

    fn is_closed(&self) -> bool {
        self.signal.is_closed()
    }

    async fn closed(&self) {
        self.signal.closed().await;
    }
}

// ============================================================================
// Tests
// ============================================================================
