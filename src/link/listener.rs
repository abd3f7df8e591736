//! Listener role: accepts one inbound connection.

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};

use tracing::debug;

use crate::error::Result;
use crate::event::LinkState;
use crate::identifiers::RoleId;
use crate::transport::ListenHandle;

use super::controller::LinkShared;

// ============================================================================
// ListenerRole
// ============================================================================

/// Handle of a running listener.
pub(crate) struct ListenerRole {
    id: RoleId,
    endpoint: Arc<dyn ListenHandle>,
}

impl ListenerRole {
    /// Binds the service endpoint and starts accepting.
    pub(crate) fn spawn(link: &Arc<LinkShared>) -> Result<Self> {
        let endpoint = link.transport.listen(&link.options.service)?;
        let id = RoleId::next();

        link.runtime
            .spawn(run(id, Arc::clone(&endpoint), Arc::downgrade(link)));

        Ok(Self { id, endpoint })
    }

    #[inline]
    pub(crate) fn id(&self) -> RoleId {
        self.id
    }

    /// Closes the endpoint; a pending accept fails and the task exits.
    pub(crate) fn cancel(&self) {
        debug!(role = %self.id, "Cancelling listener");
        self.endpoint.close();
    }
}

// ============================================================================
// Task
// ============================================================================

async fn run(id: RoleId, endpoint: Arc<dyn ListenHandle>, link: Weak<LinkShared>) {
    debug!(role = %id, "Listener started");

    loop {
        match link.upgrade() {
            Some(shared) if shared.current_state() != LinkState::Connected => {}
            _ => break,
        }

        match endpoint.accept().await {
            Ok((connection, peer)) => {
                debug!(role = %id, %peer, "Inbound connection accepted");
                match link.upgrade() {
                    Some(shared) => shared.connection_established(id, connection, peer),
                    None => {
                        connection.close();
                        break;
                    }
                }
            }
            Err(e) => {
                debug!(role = %id, error = %e, "Accept ended");
                break;
            }
        }
    }

    endpoint.close();
    if let Some(shared) = link.upgrade() {
        shared.listener_finished(id);
    }

    debug!(role = %id, "Listener finished");
}
