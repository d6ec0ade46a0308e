//! Fanout HTTP API
//!
//! HTTP layer for the fan-out service, built with Axum.
//!
//! # Endpoints
//!
//! ## WebSocket
//! - `GET /ws` - Real-time delivery connection
//!
//! ## Notifications
//! - `POST /api/v1/notifications/post-created` - Queue push for a new post
//! - `POST /api/v1/notifications/member-added` - Queue push for a new member
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /health` - Full health status
//!
//! # Example
//!
//! ```rust,ignore
//! use fanout::api::{serve, ApiConfig, AppState};
//! use fanout::bridge::BridgeMonitor;
//! use fanout::websocket::{Hub, JwtAuthorizer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = Arc::new(Hub::default());
//!     let authorizer = Arc::new(JwtAuthorizer::new("secret"));
//!     let config = ApiConfig::default();
//!
//!     let (_tx, shutdown) = tokio::sync::watch::channel(false);
//!     let state = AppState::new(hub, authorizer, BridgeMonitor::new(), config.clone());
//!     serve(state, &config, shutdown).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::{ApiConfig, AppState};

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::websocket::websocket_handler;

/// WebSocket, notification and health routes behind a trace layer
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route(
            "/notifications/post-created",
            post(routes::notify::post_created),
        )
        .route(
            "/notifications/member-added",
            post(routes::notify::member_added),
        )
        .layer(DefaultBodyLimit::max(state.config.max_body_size));

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness))
        .route("/", get(routes::health::full_health));

    // Create shared state
    let shared_state = Arc::new(state);

    Router::new()
        .route("/ws", get(websocket_handler))
        .nest("/api/v1", api_routes)
        .nest("/health", health_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(shared_state)
}

/// Start the API server; returns once `shutdown` flips to `true`
pub async fn serve(
    state: AppState,
    config: &ApiConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ApiError> {
    let router = build_router(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Fanout API listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            // A dropped sender also means shut down
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("Fanout API shut down gracefully");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
