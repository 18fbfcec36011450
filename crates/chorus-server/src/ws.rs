//! Per-connection lifecycle: admission, pump loops, eviction.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use chorus_auth::{AuthError, IdentityClaims, TokenVerifier};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, trace, warn};

use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::relay::RelayEngine;
use crate::server::AppState;

const AUTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Drive one connection attempt end to end: verify the token when auth is
/// enabled, admit, pump frames, evict exactly once on termination.
pub(crate) async fn handle_connection(
    socket: WebSocket,
    token: Option<String>,
    state: AppState,
) {
    let identity = match &state.verifier {
        Some(verifier) => match admit(verifier, token.as_deref(), AUTH_TIMEOUT).await {
            Ok(claims) => Some(claims.sub),
            Err(err) => {
                warn!(kind = err.kind(), error = %err, "connection rejected");
                reject(socket, &err).await;
                return;
            }
        },
        None => None,
    };

    let (conn_id, rx) = state.registry.add(identity.clone()).await;
    match &identity {
        Some(user) => info!(
            conn_id = %conn_id,
            user = %user,
            total = state.registry.count(),
            "client connected"
        ),
        None => info!(
            conn_id = %conn_id,
            total = state.registry.count(),
            "client connected"
        ),
    }

    pump(
        socket,
        conn_id.clone(),
        identity,
        rx,
        Arc::clone(&state.registry),
        Arc::clone(&state.engine),
        state.heartbeat_interval,
    )
    .await;

    state.registry.remove(&conn_id).await;
    info!(
        conn_id = %conn_id,
        total = state.registry.count(),
        "client disconnected"
    );
}

/// Verify the supplied token within `deadline`. An absent token is its own
/// failure; a hung key fetch is reported like any other resolution failure.
async fn admit(
    verifier: &TokenVerifier,
    token: Option<&str>,
    deadline: Duration,
) -> Result<IdentityClaims, AuthError> {
    let token = token.ok_or(AuthError::MissingToken)?;
    match tokio::time::timeout(deadline, verifier.verify(token)).await {
        Ok(result) => result,
        Err(_) => Err(AuthError::KeyResolution {
            reason: format!("verification timed out after {}s", deadline.as_secs()),
        }),
    }
}

/// Close the socket with the failure's client-facing code. The attempt was
/// never registered, so there is nothing to evict.
async fn reject(mut socket: WebSocket, err: &AuthError) {
    let frame = CloseFrame {
        code: err.close_code(),
        reason: err.close_reason().into(),
    };
    let _ = socket.send(WsMessage::Close(Some(frame))).await;
}

/// Split the socket and run both pump halves until either ends.
async fn pump(
    socket: WebSocket,
    conn_id: ConnectionId,
    identity: Option<String>,
    mut rx: mpsc::Receiver<WsMessage>,
    registry: Arc<ConnectionRegistry>,
    engine: Arc<RelayEngine>,
    heartbeat: Duration,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer: drain the outbound queue, ping on the heartbeat.
    let writer_id = conn_id.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat);
        ping_interval.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                frame = rx.recv() => {
                    match frame {
                        Some(frame) => {
                            if ws_tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                        // Evicted: the registry held the only queue sender.
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                    trace!(conn_id = %writer_id, "sent ping");
                }
            }
        }
    });

    // Reader: relay inbound frames, track pongs.
    let reader_id = conn_id.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(frame)) = ws_rx.next().await {
            match frame {
                WsMessage::Text(_) | WsMessage::Binary(_) => {
                    engine.dispatch(&reader_id, identity.as_deref(), frame).await;
                }
                WsMessage::Pong(_) => registry.record_pong(&reader_id).await,
                WsMessage::Close(_) => {
                    registry.mark_closing(&reader_id).await;
                    break;
                }
                WsMessage::Ping(_) => {} // axum replies automatically
            }
        }
    });

    // Whichever half finishes first takes the other down with it. A dead
    // writer must not leave the reader relaying for an evicted connection.
    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }
}

/// Periodically evict connections whose last pong is older than `timeout`.
pub fn start_sweep_task(
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    timeout: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let stale = registry.stale_connections(timeout).await;
            for id in stale {
                registry.remove(&id).await;
                info!(conn_id = %id, "evicted unresponsive connection");
            }
        }
    })
}
