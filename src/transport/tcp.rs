//! TCP transport.
//!
//! Stands in for the wireless stack on hosts without one. A [`PeerId`] is a
//! socket address string (`"192.168.1.20:4747"`).
//!
//! # Service Handshake
//!
//! TCP has no service discovery, so the service id travels in-band:
//!
//! 1. Dialer connects and sends the 16-byte [`ServiceId`]
//! 2. Acceptor reads it (with timeout) and compares with its own
//! 3. Mismatching or silent connections are closed; the acceptor keeps waiting
//!
//! Handshakes run in their own tasks, so a dialer that never sends its id
//! does not hold up the ones behind it.
//!
//! After the handshake the stream carries opaque application bytes only.

// ============================================================================
// Imports
// ============================================================================

use std::future::poll_fn;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::{ServiceRecord, duration_millis};
use crate::error::{Error, Result};
use crate::identifiers::{PeerId, ServiceId};

use super::{CloseSignal, Connection, DialSocket, ListenHandle, StreamConnection, Transport};

// ============================================================================
// Constants
// ============================================================================

/// Default listening port.
pub const DEFAULT_PORT: u16 = 4747;

/// Time an accepted connection has to announce its service.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Types
// ============================================================================

/// Connection type produced by the TCP transport.
pub type TcpConnection = StreamConnection<OwnedReadHalf, OwnedWriteHalf>;

// ============================================================================
// TcpTransport
// ============================================================================

/// TCP implementation of [`Transport`].
#[derive(Debug, Clone)]
pub struct TcpTransport {
    /// Address listening endpoints bind to.
    bind_addr: SocketAddr,
    /// Runtime the listening sockets are registered with.
    runtime: Handle,
}

impl TcpTransport {
    /// Creates a transport listening on `ip:port`.
    ///
    /// Use port 0 to let the OS assign a port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if called outside a Tokio runtime.
    pub fn new(ip: IpAddr, port: u16) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|_| Error::config("TcpTransport must be created inside a Tokio runtime"))?;

        Ok(Self {
            bind_addr: SocketAddr::new(ip, port),
            runtime,
        })
    }

    /// Creates a transport listening on all interfaces at [`DEFAULT_PORT`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if called outside a Tokio runtime.
    pub fn with_default_port() -> Result<Self> {
        Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT)
    }

    /// Returns the configured bind address.
    #[inline]
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// Binds a listening endpoint and returns it with its concrete type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`] if the address cannot be bound.
    pub fn bind(&self, service: &ServiceRecord) -> Result<TcpListenHandle> {
        let _guard = self.runtime.enter();

        let listener = std::net::TcpListener::bind(self.bind_addr)
            .and_then(|listener| {
                listener.set_nonblocking(true)?;
                TcpListener::from_std(listener)
            })
            .map_err(|e| Error::bind(service.id, e.to_string()))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::bind(service.id, e.to_string()))?;

        info!(%local_addr, service = %service.name, "TCP endpoint listening");

        Ok(TcpListenHandle::new(listener, local_addr, service.id))
    }
}

impl Transport for TcpTransport {
    fn listen(&self, service: &ServiceRecord) -> Result<Arc<dyn ListenHandle>> {
        Ok(Arc::new(self.bind(service)?))
    }

    fn dial_socket(&self, peer: &PeerId, service: &ServiceRecord) -> Result<Arc<dyn DialSocket>> {
        let addr: SocketAddr = peer
            .as_str()
            .parse()
            .map_err(|_| Error::invalid_peer(peer.clone()))?;

        Ok(Arc::new(TcpDialSocket {
            peer: peer.clone(),
            addr,
            service: service.id,
            signal: CloseSignal::new(),
        }))
    }
}

// ============================================================================
// TcpListenHandle
// ============================================================================

/// Bound TCP listening endpoint.
///
/// Each accepted socket gets its own handshake task, so a silent dialer only
/// delays itself. Closing drops the OS listener immediately and frees the
/// port for the next bind.
pub struct TcpListenHandle {
    /// Taken on close.
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    service: ServiceId,
    signal: CloseSignal,
    /// Handshake tasks push verified streams here.
    verified_tx: mpsc::UnboundedSender<(TcpStream, SocketAddr)>,
    verified_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(TcpStream, SocketAddr)>>,
}

impl TcpListenHandle {
    fn new(listener: TcpListener, local_addr: SocketAddr, service: ServiceId) -> Self {
        let (verified_tx, verified_rx) = mpsc::unbounded_channel();
        Self {
            listener: Mutex::new(Some(listener)),
            local_addr,
            service,
            signal: CloseSignal::new(),
            verified_tx,
            verified_rx: tokio::sync::Mutex::new(verified_rx),
        }
    }

    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the address peers should dial, as a [`PeerId`].
    ///
    /// Unspecified bind addresses are reported as loopback.
    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        let mut addr = self.local_addr;
        if addr.ip().is_unspecified() {
            addr.set_ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
        }
        PeerId::from(addr)
    }

    /// Returns `true` while the OS listener is still held.
    #[inline]
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.listener.lock().is_some()
    }

    fn poll_accept(&self, cx: &mut Context<'_>) -> Poll<Result<(TcpStream, SocketAddr)>> {
        match self.listener.lock().as_ref() {
            Some(listener) => listener.poll_accept(cx).map_err(Error::from),
            None => Poll::Ready(Err(Error::ConnectionClosed)),
        }
    }

    /// Checks the dialer's service id off the accept path.
    fn spawn_handshake(&self, mut stream: TcpStream, addr: SocketAddr) {
        let expected = self.service;
        let verified = self.verified_tx.clone();

        tokio::spawn(async move {
            match read_service(&mut stream, expected).await {
                Ok(()) => {
                    // Fails only once the endpoint is gone; the stream drops with it.
                    let _ = verified.send((stream, addr));
                }
                Err(e) if e.is_timeout() => {
                    debug!(%addr, "Inbound connection never announced a service");
                }
                Err(e) => warn!(%addr, error = %e, "Rejected inbound connection"),
            }
        });
    }
}

/// Reads the dialer's service id and compares it with `expected`.
async fn read_service(stream: &mut TcpStream, expected: ServiceId) -> Result<()> {
    let mut announced = [0u8; 16];

    timeout(HANDSHAKE_TIMEOUT, stream.read_exact(&mut announced))
        .await
        .map_err(|_| Error::timeout("service handshake", duration_millis(HANDSHAKE_TIMEOUT)))??;

    let actual = ServiceId::from_bytes(announced);
    if actual != expected {
        return Err(Error::service_mismatch(expected, actual));
    }

    Ok(())
}

#[async_trait]
impl ListenHandle for TcpListenHandle {
    async fn accept(&self) -> Result<(Arc<dyn Connection>, PeerId)> {
        let mut verified = self.verified_rx.lock().await;

        loop {
            tokio::select! {
                biased;
                () = self.signal.closed() => return Err(Error::ConnectionClosed),
                Some((stream, addr)) = verified.recv() => {
                    let peer = PeerId::from(addr);
                    let (reader, writer) = stream.into_split();
                    let connection: Arc<dyn Connection> =
                        Arc::new(TcpConnection::new(peer.clone(), reader, writer));
                    return Ok((connection, peer));
                }
                accepted = poll_fn(|cx| self.poll_accept(cx)) => {
                    let (stream, addr) = accepted?;
                    debug!(?addr, "TCP connection accepted");
                    self.spawn_handshake(stream, addr);
                }
            }
        }
    }

    fn close(&self) {
        if self.signal.close() {
            drop(self.listener.lock().take());
            debug!(local_addr = %self.local_addr, "TCP endpoint closed");
        }
    }
}

// ============================================================================
// TcpDialSocket
// ============================================================================

/// Outbound TCP socket.
struct TcpDialSocket {
    peer: PeerId,
    addr: SocketAddr,
    service: ServiceId,
    signal: CloseSignal,
}

impl TcpDialSocket {
    /// Connects and announces the service id.
    async fn dial(&self) -> Result<TcpStream> {
        let mut stream = TcpStream::connect(self.addr)
            .await
            .map_err(|e| Error::dial(self.peer.clone(), e.to_string()))?;

        stream.set_nodelay(true)?;
        stream
            .write_all(&self.service.to_bytes())
            .await
            .map_err(|e| Error::dial(self.peer.clone(), e.to_string()))?;

        Ok(stream)
    }
}

#[async_trait]
impl DialSocket for TcpDialSocket {
    fn peer(&self) -> &PeerId {
        &self.peer
    }

    async fn connect(&self) -> Result<Arc<dyn Connection>> {
        let stream = tokio::select! {
            biased;
            () = self.signal.closed() => return Err(Error::ConnectionClosed),
            stream = self.dial() => stream?,
        };

        let (reader, writer) = stream.into_split();
        Ok(Arc::new(TcpConnection::new(self.peer.clone(), reader, writer)))
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
