//! WebSocket Handler
//!
//! Handles WebSocket upgrade requests. Credentials and the requested group
//! set are checked before the upgrade; the connection is registered with the
//! hub only once the upgrade succeeds.

use axum::{
    extract::{ws::WebSocket, Query, State, WebSocketUpgrade},
    http::{header, HeaderMap},
    response::Response,
};
use futures_util::StreamExt;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use super::auth::Grant;
use super::connection::Connection;
use super::hub::Hub;
use crate::api::{ApiError, AppState};
use crate::routing::GroupId;

/// Query parameters accepted on `/ws`
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Comma-separated group ids
    #[serde(default)]
    pub groups: Option<String>,
    /// Token for clients that cannot set headers (browsers)
    #[serde(default)]
    pub token: Option<String>,
}

/// WebSocket upgrade handler
///
/// `GET /ws?groups=<uuid>,<uuid>` with `Authorization: Bearer <token>`
/// (or `token=<token>` in the query).
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let token = bearer_token(&headers)
        .or(params.token.as_deref())
        .ok_or_else(|| ApiError::Unauthorized("missing credentials".to_string()))?;

    let requested = parse_groups(params.groups.as_deref())?;
    let grant = state.authorizer.authorize(token, &requested).await?;

    tracing::debug!(
        client_id = %grant.client_id,
        groups = grant.groups.len(),
        "Upgrading authorized connection"
    );

    let hub = Arc::clone(&state.hub);
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, hub, grant)))
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, hub: Arc<Hub>, grant: Grant) {
    let connection = Connection::open(hub, grant.client_id, grant.groups).await;
    let (sender, receiver) = socket.split();
    connection.run(sender, receiver).await;
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn parse_groups(raw: Option<&str>) -> Result<HashSet<GroupId>, ApiError> {
    let Some(raw) = raw else {
        return Ok(HashSet::new());
    };

    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            Uuid::try_parse(s).map_err(|_| ApiError::Validation(format!("invalid group id {:?}", s)))
        })
        .collect()
}
