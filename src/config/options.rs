//! Link options.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use peerlink::LinkOptions;
//!
//! let options = LinkOptions::new()
//!     .with_retry_backoff(Duration::from_millis(500))
//!     .with_read_buffer_size(4096);
//!
//! assert_eq!(options.retry_backoff(), Duration::from_millis(500));
//! ```
//!
//! Options can also be loaded from JSON; missing fields take their defaults:
//!
//! ```
//! use peerlink::LinkOptions;
//!
//! let options = LinkOptions::from_json(r#"{ "retry_backoff_ms": 250 }"#).unwrap();
//! assert_eq!(options.read_buffer_size, 1024);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identifiers::ServiceId;

// ============================================================================
// Constants
// ============================================================================

/// Default fixed backoff between dial attempts.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Default session read buffer size.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

/// Default service record name.
pub const DEFAULT_SERVICE_NAME: &str = "PeerLink";

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
#[must_use]
pub fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// ServiceRecord
// ============================================================================

/// Service advertised when listening and looked up when dialing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceRecord {
    /// Rendezvous identifier; must match on both peers.
    pub id: ServiceId,
    /// Human-readable record name.
    pub name: String,
}

impl Default for ServiceRecord {
    fn default() -> Self {
        Self {
            id: ServiceId::DEFAULT,
            name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

impl ServiceRecord {
    /// Creates a service record.
    #[inline]
    #[must_use]
    pub fn new(id: ServiceId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

// ============================================================================
// LinkOptions
// ============================================================================

/// Tunables of a link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkOptions {
    /// Service both peers rendezvous on.
    pub service: ServiceRecord,

    /// Fixed wait between failed dial attempts, in milliseconds.
    pub retry_backoff_ms: u64,

    /// Size of the session read buffer in bytes.
    pub read_buffer_size: usize,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl LinkOptions {
    /// Creates options with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            service: ServiceRecord::default(),
            retry_backoff_ms: duration_millis(DEFAULT_RETRY_BACKOFF),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    /// Parses options from JSON and validates them.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the document is malformed
    /// - [`Error::Config`] if a value is out of range
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl LinkOptions {
    /// Sets the service record.
    #[inline]
    #[must_use]
    pub fn with_service(mut self, service: ServiceRecord) -> Self {
        self.service = service;
        self
    }

    /// Sets the dial retry backoff.
    #[inline]
    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff_ms = duration_millis(backoff);
        self
    }

    /// Sets the session read buffer size.
    #[inline]
    #[must_use]
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }
}

// ============================================================================
// Accessors & Validation
// ============================================================================

impl LinkOptions {
    /// Returns the dial retry backoff.
    #[inline]
    #[must_use]
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the read buffer size is zero or the
    /// service name is empty.
    pub fn validate(&self) -> Result<()> {
        if self.read_buffer_size == 0 {
            return Err(Error::config("read_buffer_size must be greater than zero"));
        }

        if self.service.name.trim().is_empty() {
            return Err(Error::config("service name must not be empty"));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = LinkOptions::default();
        assert_eq!(options.service.id, ServiceId::DEFAULT);
        assert_eq!(options.service.name, "PeerLink");
        assert_eq!(options.retry_backoff(), Duration::from_secs(2));
        assert_eq!(options.read_buffer_size, 1024);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let service = ServiceRecord::new(ServiceId::random(), "Telemetry");
        let options = LinkOptions::new()
            .with_service(service.clone())
            .with_retry_backoff(Duration::from_millis(50))
            .with_read_buffer_size(64);

        assert_eq!(options.service, service);
        assert_eq!(options.retry_backoff_ms, 50);
        assert_eq!(options.read_buffer_size, 64);
    }

    #[test]
    fn test_huge_backoff_saturates() {
        assert_eq!(duration_millis(Duration::from_millis(1500)), 1500);
        assert_eq!(duration_millis(Duration::MAX), u64::MAX);

        let options = LinkOptions::new().with_retry_backoff(Duration::MAX);
        assert_eq!(options.retry_backoff_ms, u64::MAX);
    }

    #[test]
    fn test_from_json_partial() {
        let options = LinkOptions::from_json(
            r#"{ "service": { "name": "Streamer" }, "read_buffer_size": 2048 }"#,
        )
        .unwrap();

        assert_eq!(options.service.id, ServiceId::DEFAULT);
        assert_eq!(options.service.name, "Streamer");
        assert_eq!(options.read_buffer_size, 2048);
        assert_eq!(options.retry_backoff(), DEFAULT_RETRY_BACKOFF);
    }

    #[test]
    fn test_from_json_rejects_zero_buffer() {
        let err = LinkOptions::from_json(r#"{ "read_buffer_size": 0 }"#).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_from_json_malformed() {
        let err = LinkOptions::from_json("{ not json").unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_validate_rejects_blank_service_name() {
        let options =
            LinkOptions::new().with_service(ServiceRecord::new(ServiceId::DEFAULT, " "));
        assert!(options.validate().is_err());
    }
}
