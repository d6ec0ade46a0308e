//! Health Routes
//!
//! Probes for orchestrators and the `fanout status` command.
//!
//! - GET /health/live - Liveness probe
//! - GET /health/ready - Readiness probe (event bridge is consuming)
//! - GET /health - Full health status

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::HealthResponse;
use crate::api::state::AppState;
use crate::bridge::BridgeState;

/// GET /health/live
///
/// Liveness probe.
/// Always 200 while the process can serve requests.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /health/ready
///
/// Readiness probe.
/// Ready once the event bridge has a live subscription.
pub async fn readiness(State(state): State<Arc<AppState>>) -> StatusCode {
    if state.bridge.is_consuming() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /health
///
/// Connections, bridge state and counters, push pool counters.
pub async fn full_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let bridge = state.bridge.stats();

    let status = match bridge.state {
        BridgeState::Consuming => "healthy",
        BridgeState::Connecting => "degraded",
        BridgeState::Failed | BridgeState::Stopped => "unhealthy",
    };

    Json(HealthResponse {
        status: status.to_string(),
        connections: state.hub.active_count().await,
        bridge: bridge.into(),
        push: state.notifier.as_ref().map(|n| n.pool().stats().into()),
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
