//! # Fanout
//!
//! Real-time fan-out service: a WebSocket connection hub fed from a Kafka
//! topic, plus push notification delivery through FCM and APNs.
//!
//! ## Modules
//!
//! - [`routing`]: Addresses (unicast, multicast, broadcast) and the `<kind>:<uuid>` key codec
//! - [`websocket`]: Connection registry, per-connection pumps and connect authorization
//! - [`bridge`]: Broker subscription with retry, decoding records into routable messages
//! - [`push`]: Push gateways, bounded concurrent dispatch, worker pool and triggers
//! - [`api`]: HTTP server with Axum (WebSocket upgrade, notification hand-off, health)
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fanout::routing::{Address, RoutableMessage};
//! use fanout::websocket::Hub;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = Hub::default();
//!
//!     // Keys arrive from the broker as `<kind>:<uuid>`
//!     let address: Address = "group:3fa85f64-5717-4562-b3fc-2c963f66afa6".parse()?;
//!     let summary = hub
//!         .dispatch(&RoutableMessage::new(address, r#"{"type":"post"}"#))
//!         .await;
//!
//!     println!("Delivered to {} connections", summary.delivered);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod bridge;
pub mod config;
pub mod push;
pub mod routing;
pub mod websocket;

// Re-export top-level types for convenience
pub use routing::{Address, ClientId, DecodeError, GroupId, RoutableMessage};

pub use websocket::{Connection, DispatchSummary, Hub, HubConfig, JwtAuthorizer};

pub use bridge::{BridgeError, BridgeMonitor, EventBridge, KafkaConnector, RetryPolicy};

pub use push::{
    DeliveryReport, DeviceToken, NotificationDispatcher, Notifier, Platform, PushError,
    PushGateway, PushPayload, PushRouter, WorkerPool,
};

pub use api::{build_router, serve, ApiConfig, ApiError, AppState};

pub use config::{Config, ConfigError};
