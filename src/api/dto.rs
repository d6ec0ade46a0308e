//! Data Transfer Objects
//!
//! Response types for the API endpoints. Notification request bodies are
//! the trigger events themselves ([`PostCreated`](crate::push::PostCreated),
//! [`MemberAdded`](crate::push::MemberAdded)).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bridge::BridgeStats;
use crate::push::PoolStats;

// ============================================
// NOTIFICATION DTOs
// ============================================

/// Response to a notification trigger
#[derive(Debug, Serialize, Deserialize)]
pub struct NotificationAccepted {
    /// "queued" or "no_recipients"
    pub status: String,
    /// Job id when a job was queued
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
}

impl NotificationAccepted {
    pub fn queued(job_id: Uuid) -> Self {
        Self {
            status: "queued".to_string(),
            job_id: Some(job_id),
        }
    }

    pub fn no_recipients() -> Self {
        Self {
            status: "no_recipients".to_string(),
            job_id: None,
        }
    }
}

// ============================================
// HEALTH DTOs
// ============================================

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall status: healthy, degraded, unhealthy
    pub status: String,
    /// Live WebSocket connections
    pub connections: usize,
    /// Event bridge state and counters
    pub bridge: BridgeHealth,
    /// Push worker pool counters (absent when push is disabled)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push: Option<PushHealth>,
    /// Server uptime in seconds
    pub uptime_seconds: u64,
    /// Application version
    pub version: String,
}

/// Bridge section of the health response
#[derive(Debug, Serialize, Deserialize)]
pub struct BridgeHealth {
    pub state: String,
    pub subscribe_attempts: u64,
    pub received: u64,
    pub dispatched: u64,
    pub decode_errors: u64,
    pub consume_errors: u64,
}

impl From<BridgeStats> for BridgeHealth {
    fn from(s: BridgeStats) -> Self {
        Self {
            state: s.state.as_str().to_string(),
            subscribe_attempts: s.subscribe_attempts,
            received: s.received,
            dispatched: s.dispatched,
            decode_errors: s.decode_errors,
            consume_errors: s.consume_errors,
        }
    }
}

/// Push section of the health response
#[derive(Debug, Serialize, Deserialize)]
pub struct PushHealth {
    pub workers: usize,
    pub submitted: u64,
    pub completed: u64,
    pub rejected: u64,
    pub delivered: u64,
    pub failed: u64,
}

impl From<PoolStats> for PushHealth {
    fn from(s: PoolStats) -> Self {
        Self {
            workers: s.workers,
            submitted: s.submitted,
            completed: s.completed,
            rejected: s.rejected,
            delivered: s.delivered,
            failed: s.failed,
        }
    }
}
