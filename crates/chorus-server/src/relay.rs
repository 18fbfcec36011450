//! Frame fan-out to eligible relay connections.

use std::sync::Arc;

use axum::extract::ws::Message as WsMessage;
use tracing::debug;

use crate::registry::{ConnectionId, ConnectionRegistry};

/// Recipient selection for dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayMode {
    /// Every other open connection receives the frame.
    Broadcast,
    /// Only connections sharing the sender's identity label receive it.
    SameIdentity,
}

/// Routes inbound frames to the other connections that should see them.
pub struct RelayEngine {
    registry: Arc<ConnectionRegistry>,
    mode: RelayMode,
}

impl RelayEngine {
    pub fn new(registry: Arc<ConnectionRegistry>, mode: RelayMode) -> Self {
        Self { registry, mode }
    }

    pub fn mode(&self) -> RelayMode {
        self.mode
    }

    /// Fan a frame out to every eligible recipient.
    ///
    /// Best-effort: a recipient whose queue is full or gone is skipped, its
    /// drop counter bumped, and the loop carries on. The sender never hears
    /// about delivery, and never receives its own frame back.
    pub async fn dispatch(
        &self,
        sender_id: &ConnectionId,
        sender_identity: Option<&str>,
        frame: WsMessage,
    ) {
        let recipients = self.registry.snapshot().await;
        let mut delivered = 0u32;

        for conn in &recipients {
            if conn.id == *sender_id || !conn.is_open() {
                continue;
            }
            if self.mode == RelayMode::SameIdentity
                && conn.identity.as_deref() != sender_identity
            {
                continue;
            }
            if conn.enqueue(frame.clone()) {
                delivered += 1;
            }
        }

        debug!(sender = %sender_id, delivered, "relayed frame");
    }
}
