//! `StreamServer` — Axum HTTP server exposing trip streams.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tripcast_core::TripId;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::stream::{self, ConnectionRegistry};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Trip stream registry.
    pub registry: Arc<ConnectionRegistry>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Per-stream frame queue size.
    pub stream_queue_capacity: usize,
}

/// Reply to `POST /trips/{trip_id}/notify`.
#[derive(Debug, Clone, Serialize)]
pub struct NotifyResponse {
    /// Trip that was notified.
    pub trip_id: TripId,
    /// Streams the refresh was written to.
    pub delivered: usize,
}

/// The tripcast HTTP server.
pub struct StreamServer {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl StreamServer {
    /// Create a new server with an empty registry.
    pub fn new(config: ServerConfig) -> Self {
        let registry = ConnectionRegistry::with_config(config.registry_config());
        Self {
            config,
            registry,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: Arc::clone(&self.registry),
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
            stream_queue_capacity: self.config.stream_queue_capacity,
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/trips/{trip_id}/events", get(events_handler))
            .route("/trips/{trip_id}/notify", post(notify_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// The stream registry, for in-process callers that notify directly.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the configured address and serve in a background task.
    pub async fn start(self) -> Result<ServerHandle, ServerError> {
        let addr = self.config.bind_addr();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        let router = self.router();
        let token = self.shutdown.token();
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await;
            if let Err(e) = result {
                error!(error = %e, "server exited with error");
            }
        });

        info!(addr = %local_addr, "tripcast server listening");

        Ok(ServerHandle {
            addr: local_addr,
            server: self,
            task: server,
        })
    }
}

/// Running server returned by [`StreamServer::start`].
pub struct ServerHandle {
    addr: SocketAddr,
    server: StreamServer,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Bound address (resolves port `0`).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The stream registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.server.registry()
    }

    /// End all streams and stop the listener.
    pub async fn shutdown(self) {
        let timeout = self.server.config().shutdown_timeout();
        self.server
            .shutdown()
            .graceful_shutdown(self.server.registry(), vec![self.task], timeout)
            .await;
        info!("tripcast server stopped");
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.shutdown.is_shutting_down(),
        state.registry.trip_count(),
        state.registry.total_subscribers(),
    ))
}

/// GET /trips/{trip_id}/events
async fn events_handler(Path(trip_id): Path<String>, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    stream::open_stream(
        &state.registry,
        TripId::from(trip_id),
        state.stream_queue_capacity,
    )
}

/// POST /trips/{trip_id}/notify
async fn notify_handler(
    Path(trip_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<Map<String, Value>>,
) -> (StatusCode, Json<NotifyResponse>) {
    let trip_id = TripId::from(trip_id);
    let delivered = stream::notify(&state.registry, &trip_id, payload);
    (
        StatusCode::ACCEPTED,
        Json(NotifyResponse { trip_id, delivered }),
    )
}
