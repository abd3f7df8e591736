//! Builder pattern for link configuration.
//!
//! Provides a fluent API for configuring and creating a [`LinkController`].
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use peerlink::LinkController;
//! use peerlink::transport::MemoryNetwork;
//!
//! # async fn example() -> peerlink::Result<()> {
//! let network = MemoryNetwork::new();
//! let (link, events) = LinkController::builder()
//!     .transport(network.transport("device-a"))
//!     .retry_backoff(Duration::from_millis(500))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use crate::error::{Error, Result};
use crate::event::LinkEvents;
use crate::link::LinkController;
use crate::transport::Transport;

use super::options::{LinkOptions, ServiceRecord};

// ============================================================================
// LinkBuilder
// ============================================================================

/// Builder for configuring a [`LinkController`].
///
/// Use [`LinkController::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct LinkBuilder {
    /// Socket factory.
    transport: Option<Arc<dyn Transport>>,
    /// Tunables.
    options: LinkOptions,
    /// Runtime for role tasks; defaults to the current one.
    runtime: Option<Handle>,
}

impl fmt::Debug for LinkBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkBuilder")
            .field("transport", &self.transport.is_some())
            .field("options", &self.options)
            .field("runtime", &self.runtime.is_some())
            .finish()
    }
}

// ============================================================================
// LinkBuilder Implementation
// ============================================================================

impl LinkBuilder {
    /// Creates a new builder with default options and no transport.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the transport.
    #[inline]
    #[must_use]
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Sets an already shared transport.
    #[inline]
    #[must_use]
    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replaces all options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: LinkOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the advertised service.
    #[inline]
    #[must_use]
    pub fn service(mut self, service: ServiceRecord) -> Self {
        self.options.service = service;
        self
    }

    /// Sets the delay between failed dial attempts.
    #[inline]
    #[must_use]
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.options = self.options.with_retry_backoff(backoff);
        self
    }

    /// Sets the session read buffer size.
    #[inline]
    #[must_use]
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.options.read_buffer_size = size;
        self
    }

    /// Spawns role tasks on `runtime` instead of the current runtime.
    ///
    /// Required when building from a thread outside any runtime.
    #[inline]
    #[must_use]
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Builds an idle controller and its event stream.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no transport was set
    /// - [`Error::Config`] if the options are invalid
    /// - [`Error::Config`] if no runtime was set and none is current
    pub fn build(self) -> Result<(LinkController, LinkEvents)> {
        let transport = self.validate_transport()?;
        self.options.validate()?;
        let runtime = self.resolve_runtime()?;

        Ok(LinkController::new(transport, self.options, runtime))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl LinkBuilder {
    fn validate_transport(&self) -> Result<Arc<dyn Transport>> {
        self.transport.clone().ok_or_else(|| {
            Error::config(
                "Transport is required. Use .transport() to set it.\n\
                 Example: LinkController::builder().transport(TcpTransport::with_default_port()?)",
            )
        })
    }

    fn resolve_runtime(&self) -> Result<Handle> {
        match &self.runtime {
            Some(runtime) => Ok(runtime.clone()),
            None => Handle::try_current().map_err(|_| {
                Error::config(
                    "No Tokio runtime. Build inside a runtime or use .runtime(handle).",
                )
            }),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
