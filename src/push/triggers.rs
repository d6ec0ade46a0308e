//! Application-event triggers.
//!
//! Turn application events into push jobs: resolve recipients for the
//! affected groups, build the payload, and queue the job on the worker pool.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use super::directory::{dedupe_tokens, DirectoryError, RecipientDirectory};
use super::pool::{JobHandle, PoolError, PushJob, WorkerPool};
use super::PushPayload;
use crate::routing::{ClientId, GroupId};

/// Trigger errors
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("Invalid event: {0}")]
    Validation(String),

    #[error("Recipient lookup failed: {0}")]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// A post was shared to one or more groups
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostCreated {
    pub post_id: Uuid,
    pub author_id: ClientId,
    pub author_name: String,
    pub groups: Vec<GroupId>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// A user joined a group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberAdded {
    pub group_id: GroupId,
    pub group_name: String,
    pub member_id: ClientId,
    pub member_name: String,
}

/// Builds and queues push jobs for application events
pub struct Notifier {
    directory: Arc<dyn RecipientDirectory>,
    pool: Arc<WorkerPool>,
}

impl Notifier {
    pub fn new(directory: Arc<dyn RecipientDirectory>, pool: Arc<WorkerPool>) -> Self {
        Self { directory, pool }
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Notify the members of the post's groups, except the author.
    ///
    /// Returns `None` when nobody needs notifying.
    pub async fn post_created(&self, event: &PostCreated) -> Result<Option<JobHandle>, TriggerError> {
        if event.author_name.trim().is_empty() {
            return Err(TriggerError::Validation("author_name is required".to_string()));
        }

        let mut payload = PushPayload::new(
            format!("New post from {}", event.author_name),
            event.caption.clone().unwrap_or_default(),
        )
        .with_data("type", "post_created")
        .with_data("post_id", event.post_id.to_string());
        payload.image_url = event.image_url.clone();
        if let [group] = event.groups.as_slice() {
            payload.thread_id = Some(group.to_string());
            payload = payload.with_data("group_id", group.to_string());
        }

        self.enqueue("post_created", &event.groups, event.author_id, payload)
            .await
    }

    /// Notify the group's existing members that someone joined
    pub async fn member_added(&self, event: &MemberAdded) -> Result<Option<JobHandle>, TriggerError> {
        if event.member_name.trim().is_empty() || event.group_name.trim().is_empty() {
            return Err(TriggerError::Validation(
                "member_name and group_name are required".to_string(),
            ));
        }

        let mut payload = PushPayload::new(
            format!("{} joined {}", event.member_name, event.group_name),
            "",
        )
        .with_data("type", "member_added")
        .with_data("group_id", event.group_id.to_string())
        .with_data("member_id", event.member_id.to_string());
        payload.thread_id = Some(event.group_id.to_string());

        self.enqueue("member_added", &[event.group_id], event.member_id, payload)
            .await
    }

    async fn enqueue(
        &self,
        kind: &'static str,
        groups: &[GroupId],
        actor: ClientId,
        payload: PushPayload,
    ) -> Result<Option<JobHandle>, TriggerError> {
        let recipients = dedupe_tokens(self.directory.device_tokens(groups, Some(actor)).await?);

        if recipients.is_empty() {
            tracing::debug!(kind, groups = groups.len(), "No push recipients");
            return Ok(None);
        }

        let job = PushJob::new(kind, recipients, payload);
        tracing::debug!(job_id = %job.id, kind, recipients = job.recipients.len(), "Queueing push job");
        Ok(Some(self.pool.submit(job).await?))
    }
}
