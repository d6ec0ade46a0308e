//! Push Notification Fan-out
//!
//! Delivers notifications to offline recipients through external push
//! gateways, independently of the real-time hub.
//!
//! ## Components
//!
//! - **Gateways**: FCM (Android) and APNs (iOS) behind [`PushGateway`]
//! - **Dispatcher**: per-recipient delivery with a timeout and a concurrency cap
//! - **Router**: splits a recipient set by platform family
//! - **Worker pool**: bounded queue of fan-out jobs with observable completion
//! - **Triggers**: build payloads for application events
//!
//! A failure for one recipient never affects the others in the batch.

mod apns;
mod directory;
mod dispatcher;
mod fcm;
mod pool;
mod router;
mod triggers;

pub use apns::{ApnsConfig, ApnsGateway};
pub use directory::{dedupe_tokens, DirectoryError, HttpRecipientDirectory, RecipientDirectory};
pub use dispatcher::{DeliveryFailure, DeliveryReport, NotificationDispatcher};
pub use fcm::{FcmConfig, FcmGateway, ServiceAccountKey};
pub use pool::{JobHandle, PoolConfig, PoolError, PoolStats, PushJob, WorkerPool};
pub use router::PushRouter;
pub use triggers::{MemberAdded, Notifier, PostCreated, TriggerError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Platform family of a device token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[serde(alias = "apns")]
    Ios,
    #[serde(alias = "fcm")]
    Android,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Ios => write!(f, "ios"),
            Platform::Android => write!(f, "android"),
        }
    }
}

/// A push identifier tagged with its platform
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceToken {
    pub token: String,
    pub platform: Platform,
}

impl DeviceToken {
    pub fn ios(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            platform: Platform::Ios,
        }
    }

    pub fn android(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            platform: Platform::Android,
        }
    }
}

/// Notification content shared by every recipient of a batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Groups notifications together on the device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Custom key/value data for the client app
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, String>,
}

impl PushPayload {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Push delivery errors
#[derive(Debug, Clone, Error)]
pub enum PushError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    /// The gateway says the token is invalid or expired; retrying is pointless
    #[error("Token rejected ({status}): {reason}")]
    Rejected { status: u16, reason: String },

    #[error("Gateway authentication failed: {0}")]
    Auth(String),

    #[error("Gateway error ({status}): {message}")]
    Gateway { status: u16, message: String },

    #[error("No gateway configured for {0}")]
    NoGateway(Platform),
}

impl PushError {
    pub fn is_token_rejected(&self) -> bool {
        matches!(self, PushError::Rejected { .. })
    }
}

impl From<reqwest::Error> for PushError {
    fn from(e: reqwest::Error) -> Self {
        PushError::Transport(e.to_string())
    }
}

/// One external push service
#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Deliver one notification to one device
    async fn send(&self, token: &str, payload: &PushPayload) -> Result<(), PushError>;
}
