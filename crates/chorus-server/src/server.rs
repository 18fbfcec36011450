use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chorus_auth::{JwksClient, TokenVerifier};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::assets;
use crate::registry::ConnectionRegistry;
use crate::relay::{RelayEngine, RelayMode};
use crate::ws;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Auth service base URL. Presence turns token verification on and
    /// scopes relay to same-identity connections.
    pub auth_base_url: Option<String>,
    /// Directory the static responder serves from.
    pub public_dir: PathBuf,
    /// Outbound queue capacity per connection.
    pub max_send_queue: usize,
    /// Ping cadence on each connection's writer.
    pub heartbeat_interval: Duration,
    /// Silence window after which a connection is presumed dead.
    pub client_timeout: Duration,
    /// How often the sweep scans for silent connections.
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            auth_base_url: None,
            public_dir: PathBuf::from("public"),
            max_send_queue: 256,
            heartbeat_interval: Duration::from_secs(30),
            client_timeout: Duration::from_secs(90),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl ServerConfig {
    /// Relay scope implied by the auth configuration.
    pub fn relay_mode(&self) -> RelayMode {
        if self.auth_base_url.is_some() {
            RelayMode::SameIdentity
        } else {
            RelayMode::Broadcast
        }
    }
}

/// Failures while bringing the server up.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind listener: {0}")]
    Bind(#[from] std::io::Error),
    #[error("auth setup failed: {0}")]
    Auth(#[from] chorus_auth::AuthError),
}

/// State shared by every route handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub engine: Arc<RelayEngine>,
    pub verifier: Option<Arc<TokenVerifier>>,
    pub public_dir: PathBuf,
    pub heartbeat_interval: Duration,
}

/// Assemble the router: relay endpoint, health check, static fallback.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .fallback(assets::serve_asset)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Create and start the server. Returns a handle holding the bound port
/// and the background tasks.
pub async fn start(config: ServerConfig) -> Result<ServerHandle, ServerError> {
    let registry = Arc::new(ConnectionRegistry::new(config.max_send_queue));

    let mode = config.relay_mode();
    let verifier = match &config.auth_base_url {
        Some(base_url) => {
            let keys = Arc::new(JwksClient::new(base_url)?);
            Some(Arc::new(TokenVerifier::new(keys)))
        }
        None => None,
    };
    let engine = Arc::new(RelayEngine::new(Arc::clone(&registry), mode));

    // Evict connections that stop answering pings.
    let sweep = ws::start_sweep_task(
        Arc::clone(&registry),
        config.sweep_interval,
        config.client_timeout,
    );

    let state = AppState {
        registry: Arc::clone(&registry),
        engine,
        verifier,
        public_dir: config.public_dir.clone(),
        heartbeat_interval: config.heartbeat_interval,
    };
    let router = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), mode = ?mode, "relay server started");

    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        registry,
        _server: server,
        _sweep: sweep,
    })
}

/// Handle returned by [`start`]. Dropping it does not stop the server;
/// it exists so callers can learn the bound port and inspect the registry.
pub struct ServerHandle {
    pub port: u16,
    pub registry: Arc<ConnectionRegistry>,
    _server: tokio::task::JoinHandle<()>,
    _sweep: tokio::task::JoinHandle<()>,
}

#[derive(Debug, Deserialize)]
struct WsParams {
    token: Option<String>,
}

/// WebSocket upgrade handler. Token checks run after the upgrade so the
/// client can observe the close code.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws::handle_connection(socket, params.token, state))
}

/// Health check reporting the live connection count.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "connections": state.registry.count(),
    }))
}
