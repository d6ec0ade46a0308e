//! Platform routing for push fan-out.

use std::collections::HashMap;

use super::dispatcher::{DeliveryFailure, DeliveryReport, NotificationDispatcher};
use super::{DeviceToken, Platform, PushError, PushPayload};

/// Splits recipients by platform and hands each group to its dispatcher
#[derive(Default)]
pub struct PushRouter {
    dispatchers: HashMap<Platform, NotificationDispatcher>,
}

impl PushRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dispatcher(mut self, platform: Platform, dispatcher: NotificationDispatcher) -> Self {
        self.dispatchers.insert(platform, dispatcher);
        self
    }

    pub fn supports(&self, platform: Platform) -> bool {
        self.dispatchers.contains_key(&platform)
    }

    /// Deliver to every recipient, each through exactly one gateway.
    ///
    /// Recipients on a platform without a gateway are reported as failed.
    pub async fn fan_out(&self, recipients: &[DeviceToken], payload: &PushPayload) -> DeliveryReport {
        let mut by_platform: HashMap<Platform, Vec<String>> = HashMap::new();
        for recipient in recipients {
            by_platform
                .entry(recipient.platform)
                .or_default()
                .push(recipient.token.clone());
        }

        let mut report = DeliveryReport::default();
        let mut runs = Vec::new();

        for (platform, tokens) in by_platform {
            match self.dispatchers.get(&platform) {
                Some(dispatcher) => runs.push(dispatcher.fan_out(tokens, payload)),
                None => {
                    tracing::warn!(%platform, count = tokens.len(), "No push gateway for platform");
                    report.failed.extend(tokens.into_iter().map(|identifier| DeliveryFailure {
                        identifier,
                        error: PushError::NoGateway(platform),
                    }));
                }
            }
        }

        for partial in futures_util::future::join_all(runs).await {
            report.merge(partial);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::PushGateway;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct Recording {
        name: &'static str,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PushGateway for Recording {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn send(&self, token: &str, _payload: &PushPayload) -> Result<(), PushError> {
            self.sent.lock().unwrap().push(token.to_string());
            Ok(())
        }
    }

    fn recording(name: &'static str) -> Arc<Recording> {
        Arc::new(Recording {
            name,
            sent: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_recipients_routed_by_platform() {
        let apns = recording("apns");
        let fcm = recording("fcm");
        let router = PushRouter::new()
            .with_dispatcher(
                Platform::Ios,
                NotificationDispatcher::new(apns.clone(), Duration::from_secs(1), 4),
            )
            .with_dispatcher(
                Platform::Android,
                NotificationDispatcher::new(fcm.clone(), Duration::from_secs(1), 4),
            );

        let recipients = vec![
            DeviceToken::ios("iphone"),
            DeviceToken::android("pixel"),
            DeviceToken::ios("ipad"),
        ];
        let report = router.fan_out(&recipients, &PushPayload::new("t", "b")).await;

        assert_eq!(report.delivered.len(), 3);
        let mut ios_sent = apns.sent.lock().unwrap().clone();
        ios_sent.sort();
        assert_eq!(ios_sent, vec!["ipad".to_string(), "iphone".to_string()]);
        assert_eq!(*fcm.sent.lock().unwrap(), vec!["pixel".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_gateway_reported() {
        let fcm = recording("fcm");
        let router = PushRouter::new().with_dispatcher(
            Platform::Android,
            NotificationDispatcher::new(fcm, Duration::from_secs(1), 4),
        );
        assert!(!router.supports(Platform::Ios));

        let report = router
            .fan_out(
                &[DeviceToken::ios("iphone"), DeviceToken::android("pixel")],
                &PushPayload::new("t", "b"),
            )
            .await;

        assert_eq!(report.delivered, vec!["pixel".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(report.failed[0].error, PushError::NoGateway(Platform::Ios)));
    }
}
