//! Notification Dispatcher
//!
//! Sends one payload to many push identifiers through a single gateway.
//! Each identifier gets its own task and its own timeout; the batch always
//! runs to completion.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::{PushError, PushGateway, PushPayload};

/// A single recipient that could not be reached
#[derive(Debug, Clone)]
pub struct DeliveryFailure {
    pub identifier: String,
    pub error: PushError,
}

/// Outcome of a fan-out, in recipient order
#[derive(Debug, Clone, Default)]
pub struct DeliveryReport {
    pub delivered: Vec<String>,
    pub failed: Vec<DeliveryFailure>,
}

impl DeliveryReport {
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }

    /// Tokens the gateway rejected as invalid or expired
    pub fn rejected_tokens(&self) -> Vec<&str> {
        self.failed
            .iter()
            .filter(|f| f.error.is_token_rejected())
            .map(|f| f.identifier.as_str())
            .collect()
    }

    pub fn merge(&mut self, other: DeliveryReport) {
        self.delivered.extend(other.delivered);
        self.failed.extend(other.failed);
    }
}

/// Fan-out over one gateway
pub struct NotificationDispatcher {
    gateway: Arc<dyn PushGateway>,
    timeout: Duration,
    permits: Arc<Semaphore>,
}

impl NotificationDispatcher {
    pub fn new(gateway: Arc<dyn PushGateway>, timeout: Duration, max_concurrency: usize) -> Self {
        Self {
            gateway,
            timeout,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    pub fn gateway_name(&self) -> &'static str {
        self.gateway.name()
    }

    /// One request to one identifier, bounded by the request timeout
    pub async fn send(&self, identifier: &str, payload: &PushPayload) -> Result<(), PushError> {
        send_with_timeout(self.gateway.as_ref(), self.timeout, identifier, payload).await
    }

    /// Deliver `payload` to every distinct identifier.
    ///
    /// Failures are recorded per identifier and never stop the batch.
    pub async fn fan_out<I>(&self, identifiers: I, payload: &PushPayload) -> DeliveryReport
    where
        I: IntoIterator<Item = String>,
    {
        let mut seen = HashSet::new();
        let recipients: Vec<String> = identifiers
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();

        if recipients.is_empty() {
            return DeliveryReport::default();
        }

        let payload = Arc::new(payload.clone());
        let mut tasks = JoinSet::new();

        for (index, identifier) in recipients.iter().cloned().enumerate() {
            let gateway = Arc::clone(&self.gateway);
            let permits = Arc::clone(&self.permits);
            let payload = Arc::clone(&payload);
            let timeout = self.timeout;

            tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => {
                        send_with_timeout(gateway.as_ref(), timeout, &identifier, &payload).await
                    }
                    Err(_) => Err(PushError::Transport("dispatcher closed".to_string())),
                };
                (index, result)
            });
        }

        let mut results: Vec<Option<Result<(), PushError>>> = vec![None; recipients.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => tracing::error!(error = %e, "Push delivery task failed"),
            }
        }

        let mut report = DeliveryReport::default();
        for (identifier, result) in recipients.into_iter().zip(results) {
            match result.unwrap_or_else(|| Err(PushError::Transport("delivery task aborted".to_string()))) {
                Ok(()) => report.delivered.push(identifier),
                Err(error) => {
                    tracing::warn!(
                        gateway = self.gateway.name(),
                        identifier = %identifier,
                        error = %error,
                        "Push delivery failed"
                    );
                    report.failed.push(DeliveryFailure { identifier, error });
                }
            }
        }

        tracing::debug!(
            gateway = self.gateway.name(),
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Push fan-out finished"
        );
        report
    }
}

async fn send_with_timeout(
    gateway: &dyn PushGateway,
    timeout: Duration,
    identifier: &str,
    payload: &PushPayload,
) -> Result<(), PushError> {
    match tokio::time::timeout(timeout, gateway.send(identifier, payload)).await {
        Ok(result) => result,
        Err(_) => Err(PushError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Gateway with scripted per-token behavior
    #[derive(Default)]
    struct FakeGateway {
        slow: Vec<String>,
        rejected: Vec<String>,
        calls: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl PushGateway for FakeGateway {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn send(&self, token: &str, _payload: &PushPayload) -> Result<(), PushError> {
            self.calls.lock().unwrap().push(token.to_string());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let delay = if self.slow.iter().any(|t| t == token) {
                Duration::from_secs(5)
            } else {
                Duration::from_millis(10)
            };
            tokio::time::sleep(delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.rejected.iter().any(|t| t == token) {
                return Err(PushError::Rejected {
                    status: 410,
                    reason: "Unregistered".to_string(),
                });
            }
            Ok(())
        }
    }

    fn tokens(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_timeout_on_one_recipient_is_isolated() {
        let gateway = Arc::new(FakeGateway {
            slow: tokens(&["device-2"]),
            ..Default::default()
        });
        let dispatcher = NotificationDispatcher::new(gateway, Duration::from_millis(100), 8);

        let report = dispatcher
            .fan_out(tokens(&["device-1", "device-2", "device-3"]), &PushPayload::new("t", "b"))
            .await;

        assert_eq!(report.delivered, tokens(&["device-1", "device-3"]));
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].identifier, "device-2");
        assert!(matches!(report.failed[0].error, PushError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_duplicates_are_sent_once() {
        let gateway = Arc::new(FakeGateway::default());
        let dispatcher =
            NotificationDispatcher::new(gateway.clone(), Duration::from_secs(1), 8);

        let report = dispatcher
            .fan_out(tokens(&["a", "b", "a", "a"]), &PushPayload::new("t", "b"))
            .await;

        assert_eq!(report.attempted(), 2);
        assert_eq!(gateway.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let gateway = Arc::new(FakeGateway::default());
        let dispatcher =
            NotificationDispatcher::new(gateway.clone(), Duration::from_secs(1), 2);

        let ids: Vec<String> = (0..8).map(|i| format!("device-{}", i)).collect();
        let report = dispatcher.fan_out(ids, &PushPayload::new("t", "b")).await;

        assert_eq!(report.delivered.len(), 8);
        assert!(gateway.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_rejected_tokens_reported() {
        let gateway = Arc::new(FakeGateway {
            rejected: tokens(&["stale"]),
            ..Default::default()
        });
        let dispatcher = NotificationDispatcher::new(gateway, Duration::from_secs(1), 4);

        let report = dispatcher
            .fan_out(tokens(&["fresh", "stale"]), &PushPayload::new("t", "b"))
            .await;

        assert_eq!(report.rejected_tokens(), vec!["stale"]);
        assert_eq!(report.delivered, tokens(&["fresh"]));
    }

    #[tokio::test]
    async fn test_send_single() {
        let gateway = Arc::new(FakeGateway {
            slow: tokens(&["slow"]),
            ..Default::default()
        });
        let dispatcher = NotificationDispatcher::new(gateway, Duration::from_millis(50), 1);
        let payload = PushPayload::new("t", "b");

        assert!(dispatcher.send("fast", &payload).await.is_ok());
        assert!(matches!(
            dispatcher.send("slow", &payload).await,
            Err(PushError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let dispatcher =
            NotificationDispatcher::new(Arc::new(FakeGateway::default()), Duration::from_secs(1), 1);
        let report = dispatcher.fan_out(Vec::<String>::new(), &PushPayload::default()).await;
        assert_eq!(report.attempted(), 0);
    }
}
