//! Application State
//!
//! Handles to the hub, authorizer, push notifier and bridge monitor that
//! every route needs; the router holds it behind an `Arc`.

use std::sync::Arc;
use std::time::Instant;

use crate::api::error::ApiError;
use crate::bridge::BridgeMonitor;
use crate::push::Notifier;
use crate::websocket::{ConnectAuthorizer, Hub};

/// State handed to every route
#[derive(Clone)]
pub struct AppState {
    /// Live connection registry
    pub hub: Arc<Hub>,
    /// Gate for `/ws` upgrades
    pub authorizer: Arc<dyn ConnectAuthorizer>,
    /// Push triggers (absent when no gateway is configured)
    pub notifier: Option<Arc<Notifier>>,
    /// Event bridge status
    pub bridge: BridgeMonitor,
    /// API configuration
    pub config: Arc<ApiConfig>,
    /// Process start, for `uptime_seconds`
    pub start_time: Instant,
}

impl AppState {
    /// Create state without push notifications
    pub fn new(
        hub: Arc<Hub>,
        authorizer: Arc<dyn ConnectAuthorizer>,
        bridge: BridgeMonitor,
        config: ApiConfig,
    ) -> Self {
        Self {
            hub,
            authorizer,
            notifier: None,
            bridge,
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }

    /// Enable the notification endpoints
    pub fn with_notifier(mut self, notifier: Arc<Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Seconds since the state was built
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub(crate) fn notifier(&self) -> Result<&Arc<Notifier>, ApiError> {
        self.notifier
            .as_ref()
            .ok_or_else(|| ApiError::ServiceUnavailable("push notifications are not configured".to_string()))
    }
}

/// HTTP listener settings
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Body limit for the notification endpoints
    pub max_body_size: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
            max_body_size: 1024 * 1024,
        }
    }
}

impl ApiConfig {
    /// Listen on `host:port` with the default body limit
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// `host:port` for binding
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
