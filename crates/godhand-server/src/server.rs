use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use godhand_core::SessionId;
use godhand_engine::SessionManager;

use crate::client::{self, ClientRegistry};
use crate::event_bridge;
use crate::handlers;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    /// `0` picks a free port.
    pub port: u16,
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
    /// Clients silent for longer than this are dropped.
    pub client_timeout: Duration,
    /// Upper bound on one fallback execution.
    pub fallback_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8000,
            max_send_queue: 256,
            heartbeat_interval: Duration::from_secs(30),
            client_timeout: Duration::from_secs(90),
            fallback_timeout: Duration::from_secs(60),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub client_registry: Arc<ClientRegistry>,
    pub config: Arc<ServerConfig>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/ws/{session_id}", get(ws_session_handler))
        .route("/api/execute", post(handlers::execute))
        .route("/api/parse", post(handlers::parse))
        .route("/api/health", get(handlers::health))
        .route("/api/sessions/{session_id}/history", get(handlers::history))
        .route("/api/sessions/{session_id}/export", post(handlers::export))
        .route("/api/stats", get(handlers::stats))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind, wire the event bridge and start serving. Returns a handle that
/// keeps the background tasks alive.
pub async fn start(
    config: ServerConfig,
    manager: Arc<SessionManager>,
) -> Result<ServerHandle, std::io::Error> {
    let client_registry = Arc::new(ClientRegistry::new(config.max_send_queue));

    let bridge = event_bridge::create_bridge(Arc::clone(&client_registry), manager.subscribe());
    let cleanup = client::start_cleanup_task(
        Arc::clone(&client_registry),
        config.heartbeat_interval,
        config.client_timeout,
    );

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    let local_addr = listener.local_addr()?;

    let state = AppState {
        manager: Arc::clone(&manager),
        client_registry,
        config: Arc::new(config),
    };
    let router = build_router(state);

    let shutdown = CancellationToken::new();
    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "server stopped with error");
        }
    });

    tracing::info!(addr = %local_addr, "godhand server started");

    Ok(ServerHandle {
        addr: local_addr,
        port: local_addr.port(),
        manager,
        shutdown,
        server,
        bridge,
        cleanup,
    })
}

pub struct ServerHandle {
    pub addr: SocketAddr,
    pub port: u16,
    manager: Arc<SessionManager>,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
    bridge: tokio::task::JoinHandle<()>,
    cleanup: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Stop accepting connections, close every session and wait for the
    /// listener to wind down.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let closed = self.manager.close_all();
        let server_abort = self.server.abort_handle();
        if tokio::time::timeout(Duration::from_secs(5), self.server).await.is_err() {
            tracing::warn!("listener did not drain in time, aborting");
            server_abort.abort();
        }
        self.bridge.abort();
        self.cleanup.abort();
        tracing::info!(closed_sessions = closed, "godhand server stopped");
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, None))
}

/// Reconnect path: the client asks for its previous session id back.
async fn ws_session_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let requested = SessionId::from_raw(session_id);
    ws.on_upgrade(move |socket| handle_socket(socket, state, Some(requested)))
}

/// One connection, one session. The client is registered under the id the
/// manager assigns, before the creation event goes out.
async fn handle_socket(socket: WebSocket, state: AppState, requested: Option<SessionId>) {
    let metrics = state.manager.metrics();
    metrics.gauge_inc("ws_connections", &[], 1.0);
    let registry = Arc::clone(&state.client_registry);
    let (session_id, (client_id, rx)) = state
        .manager
        .open_with(requested, |id| registry.register(id.clone()));
    tracing::info!(client_id = %client_id, session_id = %session_id, "websocket client connected");

    client::handle_ws_connection(
        socket,
        client_id.clone(),
        rx,
        Arc::clone(&state.client_registry),
        Arc::clone(&state.manager),
        state.config.heartbeat_interval,
    )
    .await;

    state.manager.close(&session_id);
    metrics.gauge_inc("ws_connections", &[], -1.0);
    tracing::info!(client_id = %client_id, session_id = %session_id, "websocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use godhand_engine::mock::ScriptedBackend;
    use godhand_engine::{Compiler, Executor, ExecutorConfig, RuleResolver, SessionConfig};

    fn manager() -> Arc<SessionManager> {
        let compiler = Arc::new(Compiler::new(Arc::new(RuleResolver)));
        let executor = Arc::new(Executor::new(
            Arc::new(ScriptedBackend::succeeding()),
            ExecutorConfig::default(),
        ));
        Arc::new(SessionManager::new(compiler, executor, SessionConfig::default()))
    }

    #[test]
    fn build_router_creates_routes() {
        let state = AppState {
            manager: manager(),
            client_registry: Arc::new(ClientRegistry::new(32)),
            config: Arc::new(ServerConfig::default()),
        };
        let _router = build_router(state);
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let config = ServerConfig {
            port: 0,
            ..Default::default()
        };
        let handle = start(config, manager()).await.unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/api/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["ready"], true);

        handle.shutdown().await;
    }
}
