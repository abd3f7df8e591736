//! PeerLink - Single duplex peer link with automatic reconnect.
//!
//! This library maintains one point-to-point byte link between two devices
//! over a connection-oriented stream transport (a Bluetooth-style service
//! socket, TCP, or an in-process network for tests).
//!
//! # Architecture
//!
//! A [`LinkController`] arbitrates between three roles, each a Tokio task:
//!
//! - **Listener**: waits for an inbound connection (server mode)
//! - **Initiator**: dials a peer with fixed-backoff retries (client mode)
//! - **Session**: owns the established connection and reads from it
//!
//! Key design principles:
//!
//! - At most one role runs at a time
//! - All transitions happen under a single lock, never held across `.await`
//! - Roles are cancelled only by closing their socket handle
//! - A lost session reconnects according to the mode
//! - Everything observable is posted to [`LinkEvents`] (no polling)
//!
//! # Quick Start
//!
//! ```no_run
//! use peerlink::{LinkController, LinkEvent, LinkState, Result};
//! use peerlink::transport::TcpTransport;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let (link, mut events) = LinkController::builder()
//!         .transport(TcpTransport::with_default_port()?)
//!         .build()?;
//!
//!     // Wait for a peer to dial in
//!     link.start_server();
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             LinkEvent::StateChanged(LinkState::Connected) => {
//!                 link.write(b"hello").await;
//!             }
//!             LinkEvent::DataReceived(data) => {
//!                 println!("received {} bytes", data.len());
//!             }
//!             _ => {}
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | [`LinkBuilder`] and [`LinkOptions`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`event`] | [`LinkState`], [`LinkMode`] and the event stream |
//! | [`identifiers`] | Peer, service and role ids |
//! | [`link`] | The controller and its roles |
//! | [`transport`] | Socket traits plus TCP and in-memory transports |

// ============================================================================
// Modules
// ============================================================================

/// Link configuration.
///
/// Use [`LinkController::builder()`] to create a configured controller.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Link states, modes and notifications.
pub mod event;

/// Type-safe identifiers.
pub mod identifiers;

/// Link controller.
pub mod link;

/// Stream-socket transport layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Config types
pub use config::{LinkBuilder, LinkOptions, ServiceRecord};

// Error types
pub use error::{Error, Result};

// Event types
pub use event::{LinkEvent, LinkEvents, LinkMode, LinkState};

// Identifier types
pub use identifiers::{PeerId, RoleId, ServiceId};

// Link types
pub use link::{ActiveRoles, LinkController, WriteOutcome};
