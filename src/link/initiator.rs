//! Initiator role: dials one peer until it answers or the role is cancelled.
//!
//! Failed attempts are retried on the same socket after a fixed backoff.
//! There is no attempt cap; only closing the socket ends the loop.

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::duration_millis;
use crate::error::Result;
use crate::identifiers::{PeerId, RoleId};
use crate::transport::DialSocket;

use super::controller::LinkShared;

// ============================================================================
// InitiatorRole
// ============================================================================

/// Handle of a running initiator.
pub(crate) struct InitiatorRole {
    id: RoleId,
    socket: Arc<dyn DialSocket>,
}

impl InitiatorRole {
    /// Opens a dial socket to `peer` and starts the retry loop.
    pub(crate) fn spawn(link: &Arc<LinkShared>, peer: PeerId) -> Result<Self> {
        let socket = link.transport.dial_socket(&peer, &link.options.service)?;
        let id = RoleId::next();

        link.transport.cancel_discovery();
        link.runtime.spawn(run(
            id,
            Arc::clone(&socket),
            link.options.retry_backoff(),
            Arc::downgrade(link),
        ));

        Ok(Self { id, socket })
    }

    #[inline]
    pub(crate) fn id(&self) -> RoleId {
        self.id
    }

    /// Peer being dialed.
    #[inline]
    pub(crate) fn peer(&self) -> &PeerId {
        self.socket.peer()
    }

    /// Closes the socket, ending an attempt or a backoff wait.
    pub(crate) fn cancel(&self) {
        debug!(role = %self.id, peer = %self.peer(), "Cancelling initiator");
        self.socket.close();
    }
}

// ============================================================================
// Task
// ============================================================================

async fn run(id: RoleId, socket: Arc<dyn DialSocket>, backoff: Duration, link: Weak<LinkShared>) {
    let peer = socket.peer().clone();
    debug!(role = %id, %peer, "Initiator started");

    let mut failures: u32 = 0;

    loop {
        match socket.connect().await {
            Ok(connection) => {
                info!(role = %id, %peer, attempts = failures + 1, "Outbound connection established");
                match link.upgrade() {
                    Some(shared) => shared.connection_established(id, connection, peer),
                    None => connection.close(),
                }
                return;
            }
            Err(e) => {
                if socket.is_closed() {
                    debug!(role = %id, %peer, "Initiator cancelled");
                    return;
                }

                failures += 1;
                if e.is_recoverable() {
                    warn!(
                        role = %id,
                        %peer,
                        attempt = failures,
                        backoff_ms = duration_millis(backoff),
                        error = %e,
                        "Dial failed, retrying"
                    );
                } else {
                    error!(
                        role = %id,
                        %peer,
                        attempt = failures,
                        backoff_ms = duration_millis(backoff),
                        error = %e,
                        "Dial failed unexpectedly, retrying"
                    );
                }

                tokio::select! {
                    biased;
                    () = socket.closed() => {
                        debug!(role = %id, %peer, "Initiator cancelled during backoff");
                        return;
                    }
                    () = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }
}
