//! Type-safe identifiers for link entities.
//!
//! Newtype wrappers prevent mixing peer addresses, service identifiers and
//! role identifiers at compile time.
//!
//! | Type | Wraps | Meaning |
//! |------|-------|---------|
//! | [`PeerId`] | `String` | Address of a remote device |
//! | [`ServiceId`] | `Uuid` | Rendezvous value both peers agree on |
//! | [`RoleId`] | `u64` | One running role instance (listener, initiator, session) |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// PeerId
// ============================================================================

/// Opaque identifier of a remote device.
///
/// For a wireless transport this is the device address
/// (`"00:11:22:33:44:55"`), for TCP a socket address. The link never
/// interprets it; an empty id means "unknown peer".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Creates a peer id from an address string.
    #[inline]
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Returns the address as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the id carries no address.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<String> for PeerId {
    fn from(address: String) -> Self {
        Self(address)
    }
}

impl From<SocketAddr> for PeerId {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

// ============================================================================
// ServiceId
// ============================================================================

/// Fixed service identifier used both when listening and when dialing.
///
/// Must match on both peers for a connection to succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(Uuid);

impl ServiceId {
    /// Service identifier of this application.
    pub const DEFAULT: Self = Self(Uuid::from_u128(0x016b3cd0_38c7_11e4_916c_0800200c9a66));

    /// Wraps an existing UUID.
    #[inline]
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Generates a random service id.
    #[inline]
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID.
    #[inline]
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Returns the 16-byte big-endian encoding.
    #[inline]
    #[must_use]
    pub const fn to_bytes(self) -> [u8; 16] {
        *self.0.as_bytes()
    }

    /// Decodes the 16-byte big-endian encoding.
    #[inline]
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for ServiceId {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// RoleId
// ============================================================================

/// Global counter for role ids.
static NEXT_ROLE_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of one running role instance.
///
/// Roles report back to the controller with their id so that reports from
/// roles which have since been replaced can be recognised and discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoleId(u64);

impl RoleId {
    /// Allocates the next role id.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_ROLE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
