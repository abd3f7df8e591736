//! Link configuration.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`LinkBuilder`] | Fluent builder producing a controller and its events |
//! | [`LinkOptions`] | Service record, retry backoff, read buffer size |
//! | [`ServiceRecord`] | Service id and name both peers agree on |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder for the link controller.
pub mod builder;

/// Serializable link tunables.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::LinkBuilder;
pub use options::{
    DEFAULT_READ_BUFFER_SIZE, DEFAULT_RETRY_BACKOFF, DEFAULT_SERVICE_NAME, LinkOptions,
    ServiceRecord, duration_millis,
};
