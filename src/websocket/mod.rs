//! WebSocket Real-Time Delivery
//!
//! Delivers broker events to live client connections.
//!
//! ## Architecture
//!
//! - **Hub**: Owns the active set and fans messages out to outbound queues
//! - **Connection**: One socket with an inbound and an outbound pump
//! - **Handler**: Authorizes and upgrades `/ws` requests
//! - **Auth**: Seam for the membership/authorization collaborator
//!
//! ## Backpressure
//!
//! Every connection has a bounded outbound queue. Dispatch never waits: a
//! connection whose queue is full is evicted and must reconnect.
//!
//! ## Example
//!
//! ```javascript
//! // Browser
//! const ws = new WebSocket('ws://localhost:8090/ws?groups=<group-id>&token=<jwt>');
//!
//! ws.onmessage = (event) => {
//!   console.log('Received:', event.data);
//! };
//! ```

mod auth;
mod connection;
mod handler;
mod hub;

pub use auth::{AuthError, ConnectAuthorizer, ConnectClaims, Grant, JwtAuthorizer};
pub use connection::{Connection, InboundEnd, OutboundEnd};
pub use handler::{websocket_handler, ConnectParams};
pub use hub::{ConnectionHandle, ConnectionId, DispatchSummary, Enqueue, Hub, HubConfig};
