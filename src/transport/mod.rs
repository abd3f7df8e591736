//! Stream-socket transport layer.
//!
//! The link consumes a connection-oriented, stream-style transport addressed
//! by a [`PeerId`] and a [`ServiceId`]. This module defines that seam and
//! ships two implementations.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Device A       │                              │  Device B       │
//! │                 │      stream socket           │                 │
//! │  ListenHandle   │◄────────────────────────────►│  DialSocket     │
//! │  → Connection   │    (peer, service id)        │  → Connection   │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Cancellation
//!
//! Every handle owns a [`CloseSignal`]. `close()` is synchronous and
//! idempotent and makes any pending `accept`, `connect` or `read` return
//! [`Error::ConnectionClosed`](crate::Error::ConnectionClosed). It is the only
//! way the link cancels a role.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `memory` | In-process network with fault injection |
//! | `stream` | [`Connection`] over any `AsyncRead`/`AsyncWrite` pair |
//! | `tcp` | TCP transport with a service-id handshake |
//!
//! [`PeerId`]: crate::PeerId
//! [`ServiceId`]: crate::ServiceId

// ============================================================================
// Submodules
// ============================================================================

/// In-process transport for tests and demos.
pub mod memory;

/// Generic stream-backed connection.
pub mod stream;

/// TCP transport.
pub mod tcp;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::config::ServiceRecord;
use crate::error::Result;
use crate::identifiers::PeerId;

// ============================================================================
// Re-exports
// ============================================================================

pub use memory::{MemoryNetwork, MemoryTransport};
pub use stream::StreamConnection;
pub use tcp::TcpTransport;

// ============================================================================
// Transport
// ============================================================================

/// Factory for listening endpoints and dial sockets.
///
/// Both factory methods are synchronous: the controller creates role handles
/// while holding its lock, and only the blocking operations on the returned
/// handles are awaited by the role tasks.
pub trait Transport: Send + Sync + 'static {
    /// Binds a listening endpoint for `service`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`](crate::Error::Bind) if the endpoint cannot be
    /// created.
    fn listen(&self, service: &ServiceRecord) -> Result<Arc<dyn ListenHandle>>;

    /// Opens a dial socket targeting `service` on `peer`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPeer`](crate::Error::InvalidPeer) if the peer
    /// cannot be addressed.
    fn dial_socket(&self, peer: &PeerId, service: &ServiceRecord) -> Result<Arc<dyn DialSocket>>;

    /// Stops any device discovery in progress.
    ///
    /// Called before dialing; discovery slows connection setup on wireless
    /// stacks.
    fn cancel_discovery(&self) {}
}

// ============================================================================
// ListenHandle
// ============================================================================

/// A bound listening endpoint.
#[async_trait]
pub trait ListenHandle: Send + Sync {
    /// Waits for the next inbound connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`](crate::Error::ConnectionClosed)
    /// once the endpoint is closed.
    async fn accept(&self) -> Result<(Arc<dyn Connection>, PeerId)>;

    /// Closes the endpoint. Idempotent; accepted connections stay open.
    fn close(&self);
}

// ============================================================================
// DialSocket
// ============================================================================

/// An outbound socket that can be connected, retried, and closed.
#[async_trait]
pub trait DialSocket: Send + Sync {
    /// Peer this socket targets.
    fn peer(&self) -> &PeerId;

    /// Attempts to connect. May be called again after a failure.
    ///
    /// # Errors
    ///
    /// Returns the dial failure, or
    /// [`Error::ConnectionClosed`](crate::Error::ConnectionClosed) if the
    /// socket was closed.
    async fn connect(&self) -> Result<Arc<dyn Connection>>;

    /// Closes the socket, failing any pending or future `connect`.
    ///
    /// Does not affect a connection already returned by `connect`.
    fn close(&self);

    /// Returns `true` once [`close`](Self::close) was called.
    fn is_closed(&self) -> bool;

    /// Resolves once the socket is closed.
    async fn closed(&self);
}

// ============================================================================
// Connection
// ============================================================================

/// An open duplex byte stream to a peer.
///
/// Reads and writes may run concurrently from different tasks.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Peer on the other end.
    fn peer(&self) -> &PeerId;

    /// Reads into `buffer`. `Ok(0)` means the peer closed the stream.
    async fn read(&self, buffer: &mut [u8]) -> Result<usize>;

    /// Writes all of `data`.
    async fn write(&self, data: &[u8]) -> Result<()>;

    /// Closes the connection. Idempotent; unblocks a pending read.
    fn close(&self);
}

// ============================================================================
// CloseSignal
// ============================================================================

/// Shared "closed" flag that pending operations can wait on.
#[derive(Debug)]
pub struct CloseSignal {
    tx: watch::Sender<bool>,
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CloseSignal {
    /// Creates an open signal.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Marks the signal closed. Returns `true` on the first call only.
    pub fn close(&self) -> bool {
        !self.tx.send_replace(true)
    }

    /// Returns `true` once closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once closed.
    pub async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot be dropped here.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

// ============================================================================
// Tests
// ============================================================================
