//! Broker-to-hub event bridge.
//!
//! Records are keyed `<kind>:<id>` (see [`crate::routing`]); the value is
//! forwarded to the hub untouched.

mod event_bridge;
mod retry;
mod source;

pub use event_bridge::{decode_record, BridgeError, BridgeMonitor, BridgeState, BridgeStats, EventBridge};
pub use retry::{Backoff, RetryPolicy};
pub use source::{
    BrokerError, BrokerRecord, KafkaConnector, KafkaSettings, KafkaSource, RecordSource,
    SourceConnector,
};
