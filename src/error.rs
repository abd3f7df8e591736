//! Error types for the peer link.
//!
//! This module defines all error types used throughout the crate.
//!
//! Errors are only returned from construction ([`LinkBuilder::build`],
//! [`LinkOptions::from_json`]) and from the [`transport`] layer. The link
//! roles never propagate them across the controller boundary: they are logged
//! and turned into state transitions.
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Endpoint | [`Error::Bind`], [`Error::InvalidPeer`], [`Error::ServiceMismatch`] |
//! | Connection | [`Error::Dial`], [`Error::ConnectionRefused`], [`Error::ConnectionClosed`], [`Error::Timeout`] |
//! | External | [`Error::Io`], [`Error::Json`] |
//!
//! [`LinkBuilder::build`]: crate::LinkBuilder::build
//! [`LinkOptions::from_json`]: crate::LinkOptions::from_json
//! [`transport`]: crate::transport

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;

use crate::identifiers::{PeerId, ServiceId};

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when link options or builder settings are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Endpoint Errors
    // ========================================================================
    /// Listening endpoint could not be created.
    #[error("Failed to bind service {service}: {message}")]
    Bind {
        /// Service the endpoint was bound for.
        service: ServiceId,
        /// Description of the bind failure.
        message: String,
    },

    /// Peer identifier cannot be used by the transport.
    #[error("Invalid peer: {peer}")]
    InvalidPeer {
        /// The rejected peer identifier.
        peer: PeerId,
    },

    /// Remote end announced a different service.
    #[error("Service mismatch: expected {expected}, got {actual}")]
    ServiceMismatch {
        /// Service this endpoint serves.
        expected: ServiceId,
        /// Service announced by the remote end.
        actual: ServiceId,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Outbound connection attempt failed.
    #[error("Dial to {peer} failed: {message}")]
    Dial {
        /// Target of the failed attempt.
        peer: PeerId,
        /// Description of the dial failure.
        message: String,
    },

    /// No endpoint is listening for the service on the peer.
    #[error("Connection refused by {peer}")]
    ConnectionRefused {
        /// Peer that refused the connection.
        peer: PeerId,
    },

    /// Handle was closed, locally or by the remote end.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Operation timeout.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a bind error.
    #[inline]
    pub fn bind(service: ServiceId, message: impl Into<String>) -> Self {
        Self::Bind {
            service,
            message: message.into(),
        }
    }

    /// Creates an invalid peer error.
    #[inline]
    pub fn invalid_peer(peer: PeerId) -> Self {
        Self::InvalidPeer { peer }
    }

    /// Creates a service mismatch error.
    #[inline]
    pub fn service_mismatch(expected: ServiceId, actual: ServiceId) -> Self {
        Self::ServiceMismatch { expected, actual }
    }

    /// Creates a dial error.
    #[inline]
    pub fn dial(peer: PeerId, message: impl Into<String>) -> Self {
        Self::Dial {
            peer,
            message: message.into(),
        }
    }

    /// Creates a connection refused error.
    #[inline]
    pub fn connection_refused(peer: PeerId) -> Self {
        Self::ConnectionRefused { peer }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Dial { .. }
                | Self::ConnectionRefused { .. }
                | Self::ConnectionClosed
                | Self::Timeout { .. }
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry; the initiator keeps dialing
    /// through them.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Dial { .. } | Self::ConnectionRefused { .. } | Self::Timeout { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
