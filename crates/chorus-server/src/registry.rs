//! The set of live relay connections.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message as WsMessage;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Unique connection identifier.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }

    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ConnectionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lifecycle states of a relay connection.
///
/// A connection is in the registry iff it is `Open` or `Closing`; rejected
/// attempts never get past `Connecting`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// One live duplex channel to a client.
///
/// Owned by the registry; dispatch borrows snapshot references only. The
/// outbound queue sender lives here, so evicting the connection from the
/// registry is what ends its writer loop.
pub struct RelayConnection {
    pub id: ConnectionId,
    /// Identity label from the verified token; `None` when auth is off.
    pub identity: Option<String>,
    tx: mpsc::Sender<WsMessage>,
    state: AtomicU8,
    drops: AtomicU64,
    last_pong: AtomicU64,
}

impl RelayConnection {
    pub(crate) fn new(identity: Option<String>, tx: mpsc::Sender<WsMessage>) -> Self {
        Self {
            id: ConnectionId::new(),
            identity,
            tx,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            drops: AtomicU64::new(0),
            last_pong: AtomicU64::new(now_millis()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Queue a frame for delivery. `false` means the frame was dropped
    /// (queue full or receiver gone) and the drop counter was bumped.
    pub fn enqueue(&self, frame: WsMessage) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let drops = self.drops.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    conn_id = %self.id,
                    total_drops = drops,
                    "send queue full, dropping frame"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                let _ = self.drops.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn drop_count(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_millis(), Ordering::Relaxed);
    }

    /// Whether a pong has been seen within `timeout`.
    pub fn is_alive(&self, timeout: Duration) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_millis().saturating_sub(last) < timeout.as_millis() as u64
    }
}

/// Millisecond resolution so short timeouts stay meaningful.
fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Registry of all live relay connections.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<RelayConnection>>>,
    /// Atomic counter so count queries never take the lock.
    active_count: AtomicUsize,
    max_send_queue: usize,
}

impl ConnectionRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            active_count: AtomicUsize::new(0),
            max_send_queue,
        }
    }

    /// Admit a new connection: create it, mark it `Open`, insert it.
    /// Returns the connection id and the receiving end of its outbound queue.
    pub async fn add(&self, identity: Option<String>) -> (ConnectionId, mpsc::Receiver<WsMessage>) {
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let connection = Arc::new(RelayConnection::new(identity, tx));
        connection.set_state(ConnectionState::Open);
        let id = connection.id.clone();

        let mut conns = self.connections.write().await;
        if conns.insert(id.clone(), connection).is_none() {
            let _ = self.active_count.fetch_add(1, Ordering::Relaxed);
        }
        (id, rx)
    }

    /// Evict a connection: mark it `Closed` and drop it from the set.
    /// Idempotent; callers racing over the same id are fine.
    pub async fn remove(&self, id: &ConnectionId) {
        let mut conns = self.connections.write().await;
        if let Some(conn) = conns.remove(id) {
            conn.set_state(ConnectionState::Closed);
            let _ = self.active_count.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Copied view of the current connections, safe to iterate while the
    /// set changes underneath.
    pub async fn snapshot(&self) -> Vec<Arc<RelayConnection>> {
        let conns = self.connections.read().await;
        conns.values().cloned().collect()
    }

    /// Number of live connections.
    pub fn count(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }

    pub async fn record_pong(&self, id: &ConnectionId) {
        let conns = self.connections.read().await;
        if let Some(conn) = conns.get(id) {
            conn.record_pong();
        }
    }

    /// Flag a connection as shutting down so dispatch stops targeting it.
    pub async fn mark_closing(&self, id: &ConnectionId) {
        let conns = self.connections.read().await;
        if let Some(conn) = conns.get(id) {
            conn.set_state(ConnectionState::Closing);
        }
    }

    /// Connections that have not answered a ping within `timeout`.
    pub async fn stale_connections(&self, timeout: Duration) -> Vec<ConnectionId> {
        let conns = self.connections.read().await;
        conns
            .values()
            .filter(|c| !c.is_alive(timeout))
            .map(|c| c.id.clone())
            .collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_has_prefix() {
        let id = ConnectionId::new();
        assert!(id.as_str().starts_with("conn_"), "got: {id}");
    }

    #[test]
    fn connection_ids_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn from_raw_preserves_value() {
        let id = ConnectionId::from_raw("conn_fixed");
        assert_eq!(id.as_str(), "conn_fixed");
    }

    #[test]
    fn new_connection_starts_connecting() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = RelayConnection::new(None, tx);
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn add_marks_open_and_counts() {
        let registry = ConnectionRegistry::new(32);
        assert_eq!(registry.count(), 0);

        let (_id, _rx) = registry.add(Some("user-a".into())).await;
        assert_eq!(registry.count(), 1);

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].state(), ConnectionState::Open);
        assert_eq!(snapshot[0].identity.as_deref(), Some("user-a"));
    }

    #[tokio::test]
    async fn remove_marks_closed_and_decrements() {
        let registry = ConnectionRegistry::new(32);
        let (id, _rx) = registry.add(None).await;
        let snapshot = registry.snapshot().await;

        registry.remove(&id).await;
        assert_eq!(registry.count(), 0);
        assert_eq!(snapshot[0].state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = ConnectionRegistry::new(32);
        let (id, _rx) = registry.add(None).await;

        registry.remove(&id).await;
        registry.remove(&id).await;
        registry.remove(&id).await;
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn remove_nonexistent_is_noop() {
        let registry = ConnectionRegistry::new(32);
        registry.remove(&ConnectionId::new()).await;
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn snapshot_survives_concurrent_removal() {
        let registry = ConnectionRegistry::new(32);
        let (id1, _rx1) = registry.add(None).await;
        let (_id2, _rx2) = registry.add(None).await;

        let snapshot = registry.snapshot().await;
        registry.remove(&id1).await;

        // The copied view still holds both; the removed one is just Closed.
        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.count(), 1);
    }

    #[tokio::test]
    async fn enqueue_full_queue_counts_drop() {
        let registry = ConnectionRegistry::new(1);
        let (_id, _rx) = registry.add(None).await;
        let conn = registry.snapshot().await.remove(0);

        assert!(conn.enqueue(WsMessage::Text("one".into())));
        assert!(!conn.enqueue(WsMessage::Text("two".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn enqueue_closed_receiver_counts_drop() {
        let registry = ConnectionRegistry::new(4);
        let (_id, rx) = registry.add(None).await;
        let conn = registry.snapshot().await.remove(0);
        drop(rx);

        assert!(!conn.enqueue(WsMessage::Text("lost".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn dropping_registry_entry_closes_outbound_queue() {
        let registry = ConnectionRegistry::new(4);
        let (id, mut rx) = registry.add(None).await;

        registry.remove(&id).await;
        // The registry held the only sender; the queue ends.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn mark_closing_takes_connection_out_of_open() {
        let registry = ConnectionRegistry::new(4);
        let (id, _rx) = registry.add(None).await;

        registry.mark_closing(&id).await;
        let conn = registry.snapshot().await.remove(0);
        assert_eq!(conn.state(), ConnectionState::Closing);
        assert!(!conn.is_open());
        // Still registered until removed.
        assert_eq!(registry.count(), 1);
    }

    #[tokio::test]
    async fn pong_tracking_and_staleness() {
        let registry = ConnectionRegistry::new(4);
        let (id, _rx) = registry.add(None).await;

        registry.record_pong(&id).await;
        assert!(registry
            .stale_connections(Duration::from_secs(90))
            .await
            .is_empty());

        // Force the last pong far into the past.
        let conn = registry.snapshot().await.remove(0);
        conn.last_pong.store(0, Ordering::Relaxed);

        let stale = registry.stale_connections(Duration::from_secs(90)).await;
        assert_eq!(stale, vec![id]);
    }

    #[tokio::test]
    async fn staleness_has_subsecond_resolution() {
        let registry = ConnectionRegistry::new(4);
        let (id, _rx) = registry.add(None).await;

        assert!(registry
            .stale_connections(Duration::from_millis(200))
            .await
            .is_empty());

        tokio::time::sleep(Duration::from_millis(250)).await;
        let stale = registry.stale_connections(Duration::from_millis(200)).await;
        assert_eq!(stale, vec![id]);
    }
}
