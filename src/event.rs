//! Link state, mode and notification events.
//!
//! The controller and its roles post [`LinkEvent`]s into an [`EventSink`].
//! Exactly one subscriber (the UI or application layer) drains them through
//! [`LinkEvents`].
//!
//! # Event Types
//!
//! | Event | Posted when |
//! |-------|-------------|
//! | `StateChanged` | every [`LinkState`] transition |
//! | `ModeChanged` | the [`LinkMode`] actually changes |
//! | `DataReceived` | the session completes a read |
//! | `WriteCompleted` | a write reaches the transport |
//!
//! The sink is an unbounded channel, so posting never blocks and never
//! re-enters the controller. Events may therefore be posted while the
//! controller lock is held.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::trace;

// ============================================================================
// LinkState
// ============================================================================

/// Connection state of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LinkState {
    /// No role is running.
    #[default]
    None,
    /// Waiting for an inbound connection.
    Listening,
    /// Dialing a peer.
    Connecting,
    /// A session is established.
    Connected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Listening => "listening",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(name)
    }
}

// ============================================================================
// LinkMode
// ============================================================================

/// Which side's reconnection policy applies when a session is lost.
///
/// - `ServerRole`: return to listening
/// - `ClientRole`: dial the last connected peer again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LinkMode {
    /// No policy; a lost session leaves the link idle.
    #[default]
    Undefined,
    /// Listening side.
    ServerRole,
    /// Dialing side.
    ClientRole,
}

impl fmt::Display for LinkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Undefined => "undefined",
            Self::ServerRole => "server",
            Self::ClientRole => "client",
        };
        f.write_str(name)
    }
}

// ============================================================================
// LinkEvent
// ============================================================================

/// A notification posted by the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The link entered a new state.
    StateChanged(LinkState),
    /// The link switched reconnection policy.
    ModeChanged(LinkMode),
    /// Bytes read from the peer. Each read is posted as its own event.
    DataReceived(Vec<u8>),
    /// A write was handed to the transport.
    WriteCompleted {
        /// Number of bytes written.
        bytes: usize,
    },
}

impl LinkEvent {
    /// Returns the state if this is a `StateChanged` event.
    #[inline]
    #[must_use]
    pub fn state(&self) -> Option<LinkState> {
        match self {
            Self::StateChanged(state) => Some(*state),
            _ => None,
        }
    }

    /// Returns the payload if this is a `DataReceived` event.
    #[inline]
    #[must_use]
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Self::DataReceived(data) => Some(data),
            _ => None,
        }
    }
}

// ============================================================================
// EventSink
// ============================================================================

/// Producer side of the notification channel.
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: mpsc::UnboundedSender<LinkEvent>,
}

impl EventSink {
    /// Posts an event. A dropped subscriber is not an error.
    pub(crate) fn post(&self, event: LinkEvent) {
        if self.tx.send(event).is_err() {
            trace!("Event dropped, no subscriber");
        }
    }
}

/// Creates a connected sink/subscriber pair.
pub(crate) fn channel() -> (EventSink, LinkEvents) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, LinkEvents { rx })
}

// ============================================================================
// LinkEvents
// ============================================================================

/// Ordered stream of link notifications.
///
/// Returned once by [`LinkBuilder::build`](crate::LinkBuilder::build); the
/// link has a single subscriber.
#[derive(Debug)]
pub struct LinkEvents {
    rx: mpsc::UnboundedReceiver<LinkEvent>,
}

impl LinkEvents {
    /// Waits for the next event.
    ///
    /// Returns `None` once the controller is dropped and all events drained.
    pub async fn recv(&mut self) -> Option<LinkEvent> {
        self.rx.recv().await
    }

    /// Returns the next event if one is already queued.
    #[must_use]
    pub fn try_recv(&mut self) -> Option<LinkEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Blocks the current thread until the next event.
    ///
    /// For subscribers living on a plain thread (a UI loop). Panics if called
    /// from inside an async context.
    pub fn blocking_recv(&mut self) -> Option<LinkEvent> {
        self.rx.blocking_recv()
    }

    /// Drains all queued events.
    #[must_use]
    pub fn drain(&mut self) -> Vec<LinkEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }
}

// ============================================================================
// Tests
// ============================================================================
