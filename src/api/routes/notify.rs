//! Notification Routes
//!
//! Hand-off points for the CRUD service to trigger push notifications.
//!
//! - POST /api/v1/notifications/post-created
//! - POST /api/v1/notifications/member-added

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::NotificationAccepted;
use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::push::{JobHandle, MemberAdded, PostCreated};

/// POST /api/v1/notifications/post-created
///
/// Queue notifications for a new post.
pub async fn post_created(
    State(state): State<Arc<AppState>>,
    Json(event): Json<PostCreated>,
) -> ApiResult<(StatusCode, Json<NotificationAccepted>)> {
    let handle = state.notifier()?.post_created(&event).await?;
    Ok(accepted(handle))
}

/// POST /api/v1/notifications/member-added
///
/// Queue notifications for a new group member.
pub async fn member_added(
    State(state): State<Arc<AppState>>,
    Json(event): Json<MemberAdded>,
) -> ApiResult<(StatusCode, Json<NotificationAccepted>)> {
    let handle = state.notifier()?.member_added(&event).await?;
    Ok(accepted(handle))
}

fn accepted(handle: Option<JobHandle>) -> (StatusCode, Json<NotificationAccepted>) {
    match handle {
        Some(handle) => (
            StatusCode::ACCEPTED,
            Json(NotificationAccepted::queued(handle.id())),
        ),
        None => (StatusCode::OK, Json(NotificationAccepted::no_recipients())),
    }
}
