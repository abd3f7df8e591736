//! Session role: owns the established connection.
//!
//! The read loop posts every chunk as a [`LinkEvent::DataReceived`] and
//! reports the loss to the controller when the stream ends. Writes bypass the
//! loop and go straight to the connection.

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};

use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::event::{EventSink, LinkEvent};
use crate::identifiers::{PeerId, RoleId};
use crate::transport::Connection;

use super::controller::LinkShared;

// ============================================================================
// SessionRole
// ============================================================================

/// Handle of the running session.
pub(crate) struct SessionRole {
    id: RoleId,
    peer: PeerId,
    connection: Arc<dyn Connection>,
}

impl SessionRole {
    /// Takes ownership of `connection` and starts the read loop.
    pub(crate) fn spawn(
        link: &Arc<LinkShared>,
        connection: Arc<dyn Connection>,
        peer: PeerId,
    ) -> Arc<Self> {
        let role = Arc::new(Self {
            id: RoleId::next(),
            peer,
            connection,
        });

        link.runtime.spawn(run(
            Arc::clone(&role),
            link.options.read_buffer_size,
            link.events.clone(),
            Arc::downgrade(link),
        ));

        role
    }

    #[inline]
    pub(crate) fn id(&self) -> RoleId {
        self.id
    }

    #[inline]
    pub(crate) fn peer(&self) -> &PeerId {
        &self.peer
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub(crate) async fn write(&self, data: &[u8]) -> Result<()> {
        self.connection.write(data).await
    }

    /// Closes the connection; the read loop ends and its loss report is
    /// ignored as stale.
    pub(crate) fn cancel(&self) {
        debug!(role = %self.id, peer = %self.peer, "Cancelling session");
        self.connection.close();
    }
}

// ============================================================================
// Task
// ============================================================================

async fn run(role: Arc<SessionRole>, buffer_size: usize, events: EventSink, link: Weak<LinkShared>) {
    debug!(role = %role.id, peer = %role.peer, "Session started");

    let mut buffer = vec![0u8; buffer_size];

    loop {
        match role.connection.read(&mut buffer).await {
            Ok(0) => {
                debug!(role = %role.id, peer = %role.peer, "Peer closed the stream");
                break;
            }
            Ok(n) => {
                trace!(role = %role.id, bytes = n, "Data received");
                events.post(LinkEvent::DataReceived(buffer[..n].to_vec()));
            }
            Err(e) if e.is_connection_error() => {
                debug!(role = %role.id, peer = %role.peer, error = %e, "Session connection ended");
                break;
            }
            Err(e) => {
                warn!(role = %role.id, peer = %role.peer, error = %e, "Session read failed");
                break;
            }
        }
    }

    role.connection.close();

    if let Some(shared) = link.upgrade() {
        shared.session_lost(role.id);
    }
}
