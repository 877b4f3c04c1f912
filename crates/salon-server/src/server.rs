//! `SalonServer`: Axum HTTP and WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use salon_core::{ConnectionId, CredentialVerifier, RoomDirectory, RoomIdentifier};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::groups::GroupRegistry;
use crate::health::{self, HealthResponse};
use crate::metrics::WS_REJECTIONS_TOTAL;
use crate::params::ConnectParams;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::connection::ClientConnection;
use crate::websocket::handler::ChatSession;
use crate::websocket::session::{self, SessionContext};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub groups: Arc<GroupRegistry>,
    pub auth: Authenticator,
    pub shutdown: Arc<ShutdownCoordinator>,
    pub config: Arc<ServerConfig>,
    pub start_time: Instant,
    pub metrics_handle: Option<PrometheusHandle>,
}

/// The chat relay server.
pub struct SalonServer {
    config: Arc<ServerConfig>,
    groups: Arc<GroupRegistry>,
    auth: Authenticator,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics_handle: Option<PrometheusHandle>,
}

impl SalonServer {
    pub fn new(
        config: ServerConfig,
        directory: Arc<dyn RoomDirectory>,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> Self {
        Self {
            groups: Arc::new(GroupRegistry::new(config.max_dropped_messages)),
            config: Arc::new(config),
            auth: Authenticator::new(directory, verifier),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics_handle: None,
        }
    }

    /// Serve `/metrics` from this recorder handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            groups: Arc::clone(&self.groups),
            auth: self.auth.clone(),
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::clone(&self.config),
            start_time: self.start_time,
            metrics_handle: self.metrics_handle.clone(),
        };

        Router::new()
            .route("/ws/chat/{room}", get(ws_handler))
            .route("/ws/chat/{room}/", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind the configured address and serve until shutdown is initiated.
    ///
    /// Returns the bound address (useful with port 0) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        info!(%local_addr, "salon server listening");

        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "server error");
            }
        });
        Ok((local_addr, handle))
    }

    /// Stop accepting, close every session with 1001 and wait for them to
    /// finish, bounded by the configured shutdown timeout.
    pub async fn shutdown_gracefully(&self) -> bool {
        self.shutdown
            .graceful_shutdown(self.config.shutdown_timeout())
            .await
    }

    pub fn groups(&self) -> &Arc<GroupRegistry> {
        &self.groups
    }

    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /ws/chat/{room}
///
/// Authentication completes before the upgrade is accepted. A refused
/// client gets a socket carrying only the close frame.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(room): Path<String>,
    Query(query): Query<Vec<(String, String)>>,
    State(state): State<AppState>,
) -> Response {
    let ws = ws.max_message_size(state.config.max_message_size);
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let identifier = RoomIdentifier::parse(&room);
    let params = ConnectParams::from_pairs(query);

    let (send_tx, send_rx) = mpsc::channel(state.config.send_queue_capacity.max(1));
    let connection = Arc::new(ClientConnection::new(ConnectionId::new(), send_tx));
    let mut chat = ChatSession::new(connection, params.username.clone(), Arc::clone(&state.groups));

    match chat.authenticate(&state.auth, &identifier, params).await {
        Ok(room) => {
            let ctx = SessionContext {
                shutdown: state.shutdown.token(),
                heartbeat_interval: state.config.heartbeat_interval(),
                heartbeat_timeout: state.config.heartbeat_timeout(),
            };
            let tracker = state.shutdown.tracker().clone();
            ws.on_upgrade(move |socket| {
                tracker.track_future(session::run_chat_session(socket, chat, send_rx, room, ctx))
            })
        }
        Err(err) => {
            counter!(WS_REJECTIONS_TOTAL, "reason" => err.reason()).increment(1);
            let code = err.close_code();
            ws.on_upgrade(move |socket| session::reject(socket, code))
        }
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.groups.connection_count(),
        state.groups.group_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
