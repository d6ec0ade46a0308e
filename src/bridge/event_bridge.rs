//! Event Bridge
//!
//! Subscribes to the broker, decodes each record's routing key into an
//! [`Address`], and hands the resulting message to the hub.
//!
//! Malformed records are dropped and counted. Per-record consume errors are
//! counted and skipped. Only a subscription that cannot be established
//! within the retry policy is fatal.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

use super::retry::RetryPolicy;
use super::source::{BrokerError, BrokerRecord, RecordSource, SourceConnector};
use crate::routing::{Address, DecodeError, RoutableMessage};
use crate::websocket::Hub;

/// Bridge errors
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Broker subscription failed after {attempts} attempts: {last}")]
    SubscribeExhausted { attempts: u32, last: BrokerError },
}

/// Decode a broker record into a routable message.
///
/// A record without a value carries an empty payload.
pub fn decode_record(record: BrokerRecord) -> Result<RoutableMessage, DecodeError> {
    let address = Address::from_key_bytes(record.key.as_deref())?;
    Ok(RoutableMessage::new(address, record.payload.unwrap_or_default()))
}

/// Lifecycle of the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeState {
    Connecting,
    Consuming,
    Failed,
    Stopped,
}

impl BridgeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeState::Connecting => "connecting",
            BridgeState::Consuming => "consuming",
            BridgeState::Failed => "failed",
            BridgeState::Stopped => "stopped",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => BridgeState::Consuming,
            2 => BridgeState::Failed,
            3 => BridgeState::Stopped,
            _ => BridgeState::Connecting,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            BridgeState::Connecting => 0,
            BridgeState::Consuming => 1,
            BridgeState::Failed => 2,
            BridgeState::Stopped => 3,
        }
    }
}

/// Point-in-time view of bridge counters
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStats {
    pub state: BridgeState,
    pub subscribe_attempts: u64,
    pub received: u64,
    pub dispatched: u64,
    pub decode_errors: u64,
    pub consume_errors: u64,
}

#[derive(Default)]
struct MonitorInner {
    state: AtomicU8,
    subscribe_attempts: AtomicU64,
    received: AtomicU64,
    dispatched: AtomicU64,
    decode_errors: AtomicU64,
    consume_errors: AtomicU64,
}

/// Shared, cheaply cloned view of the bridge for health reporting
#[derive(Clone, Default)]
pub struct BridgeMonitor {
    inner: Arc<MonitorInner>,
}

impl BridgeMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> BridgeState {
        BridgeState::from_u8(self.inner.state.load(Ordering::Relaxed))
    }

    pub fn is_consuming(&self) -> bool {
        self.state() == BridgeState::Consuming
    }

    pub fn stats(&self) -> BridgeStats {
        let i = &self.inner;
        BridgeStats {
            state: self.state(),
            subscribe_attempts: i.subscribe_attempts.load(Ordering::Relaxed),
            received: i.received.load(Ordering::Relaxed),
            dispatched: i.dispatched.load(Ordering::Relaxed),
            decode_errors: i.decode_errors.load(Ordering::Relaxed),
            consume_errors: i.consume_errors.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn set_state(&self, state: BridgeState) {
        self.inner.state.store(state.as_u8(), Ordering::Relaxed);
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Broker-to-hub bridge
pub struct EventBridge<C: SourceConnector> {
    connector: C,
    hub: Arc<Hub>,
    retry: RetryPolicy,
    monitor: BridgeMonitor,
}

impl<C: SourceConnector> EventBridge<C> {
    pub fn new(connector: C, hub: Arc<Hub>, retry: RetryPolicy) -> Self {
        Self {
            connector,
            hub,
            retry,
            monitor: BridgeMonitor::new(),
        }
    }

    /// Report into an existing monitor (shared with the health endpoint)
    pub fn with_monitor(mut self, monitor: BridgeMonitor) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn monitor(&self) -> BridgeMonitor {
        self.monitor.clone()
    }

    /// Subscribe and forward records until shutdown or the subscription ends.
    ///
    /// Returns an error only when the subscription cannot be established.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), BridgeError> {
        self.monitor.set_state(BridgeState::Connecting);

        let Some(mut source) = self.subscribe(&mut shutdown).await? else {
            self.monitor.set_state(BridgeState::Stopped);
            return Ok(());
        };

        self.monitor.set_state(BridgeState::Consuming);
        tracing::info!("Event bridge consuming");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Event bridge shutting down");
                        break;
                    }
                }
                next = source.next_record() => match next {
                    Some(Ok(record)) => self.forward(record).await,
                    Some(Err(e)) => {
                        BridgeMonitor::bump(&self.monitor.inner.consume_errors);
                        tracing::warn!(error = %e, "Failed to consume broker record");
                    }
                    None => {
                        tracing::warn!("Broker subscription ended");
                        break;
                    }
                },
            }
        }

        self.monitor.set_state(BridgeState::Stopped);
        Ok(())
    }

    /// Connect with retries; `None` when shutdown arrives first
    async fn subscribe(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<C::Source>, BridgeError> {
        let mut attempt = 0u32;

        loop {
            if *shutdown.borrow() {
                return Ok(None);
            }

            attempt += 1;
            BridgeMonitor::bump(&self.monitor.inner.subscribe_attempts);

            let err = match self.connector.connect().await {
                Ok(source) => {
                    tracing::info!(attempt, "Broker subscription established");
                    return Ok(Some(source));
                }
                Err(e) => e,
            };

            if !self.retry.should_retry(attempt) {
                self.monitor.set_state(BridgeState::Failed);
                tracing::error!(attempts = attempt, error = %err, "Broker subscription retries exhausted");
                return Err(BridgeError::SubscribeExhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = self.retry.delay_for(attempt);
            tracing::warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Broker subscription failed, retrying"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(None);
                    }
                }
            }
        }
    }

    async fn forward(&self, record: BrokerRecord) {
        BridgeMonitor::bump(&self.monitor.inner.received);
        let (partition, offset) = (record.partition, record.offset);

        match decode_record(record) {
            Ok(message) => {
                let summary = self.hub.dispatch(&message).await;
                BridgeMonitor::bump(&self.monitor.inner.dispatched);
                tracing::debug!(
                    partition,
                    offset,
                    mode = message.address().mode(),
                    matched = summary.matched,
                    evicted = summary.evicted,
                    "Dispatched broker record"
                );
            }
            Err(e) => {
                BridgeMonitor::bump(&self.monitor.inner.decode_errors);
                tracing::warn!(partition, offset, error = %e, "Dropping undecodable broker record");
            }
        }
    }
}
