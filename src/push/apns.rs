//! Apple Push Notification service gateway for iOS devices.
//!
//! Uses certificate-based authentication: the PKCS#12 bundle is loaded once
//! at startup and presented as the TLS client identity on every request.

use async_trait::async_trait;
use reqwest::{Client, Identity};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use super::{PushError, PushGateway, PushPayload};

const APNS_PRODUCTION: &str = "https://api.push.apple.com";
const APNS_SANDBOX: &str = "https://api.sandbox.push.apple.com";

/// APNs gateway configuration
#[derive(Debug, Clone)]
pub struct ApnsConfig {
    /// PKCS#12 (.p12) client certificate
    pub certificate_path: PathBuf,
    pub certificate_password: String,
    /// Sent as `apns-topic`
    pub bundle_id: String,
    pub production: bool,
    pub request_timeout: Duration,
}

/// APNs HTTP/2 client
pub struct ApnsGateway {
    client: Client,
    endpoint: &'static str,
    bundle_id: String,
    request_timeout: Duration,
}

impl ApnsGateway {
    pub fn new(config: ApnsConfig) -> Result<Self, PushError> {
        let der = std::fs::read(&config.certificate_path).map_err(|e| {
            PushError::Auth(format!(
                "cannot read APNs certificate {}: {}",
                config.certificate_path.display(),
                e
            ))
        })?;
        let identity = Identity::from_pkcs12_der(&der, &config.certificate_password)
            .map_err(|e| PushError::Auth(format!("invalid APNs certificate: {}", e)))?;

        let client = Client::builder()
            .use_native_tls()
            .identity(identity)
            .timeout(config.request_timeout)
            .build()?;

        let endpoint = if config.production {
            APNS_PRODUCTION
        } else {
            APNS_SANDBOX
        };
        tracing::info!(endpoint, bundle_id = %config.bundle_id, "APNs gateway ready");

        Ok(Self {
            client,
            endpoint,
            bundle_id: config.bundle_id,
            request_timeout: config.request_timeout,
        })
    }
}

#[async_trait]
impl PushGateway for ApnsGateway {
    fn name(&self) -> &'static str {
        "apns"
    }

    async fn send(&self, token: &str, payload: &PushPayload) -> Result<(), PushError> {
        let url = format!("{}/3/device/{}", self.endpoint, token);

        let response = self
            .client
            .post(&url)
            .header("apns-topic", &self.bundle_id)
            .header("apns-push-type", "alert")
            .header("apns-priority", "10")
            .json(&ApnsRequest::new(payload))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PushError::Timeout(self.request_timeout)
                } else {
                    PushError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        Err(classify_error(status.as_u16(), &text))
    }
}

/// Map an APNs error response to a [`PushError`]
fn classify_error(status: u16, body: &str) -> PushError {
    let reason = serde_json::from_str::<ApnsErrorBody>(body)
        .map(|b| b.reason)
        .unwrap_or_else(|_| body.to_string());

    match (status, reason.as_str()) {
        (410, _) | (400, "BadDeviceToken") | (400, "DeviceTokenNotForTopic") => {
            PushError::Rejected { status, reason }
        }
        (403, _) => PushError::Auth(reason),
        _ => PushError::Gateway {
            status,
            message: reason,
        },
    }
}

// ============================================
// Wire types
// ============================================

#[derive(Debug, Serialize)]
struct ApnsRequest<'a> {
    aps: Aps<'a>,
    /// Custom data travels at the top level next to `aps`
    #[serde(flatten)]
    data: &'a HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct Aps<'a> {
    alert: Alert<'a>,
    sound: &'a str,
    #[serde(rename = "thread-id", skip_serializing_if = "Option::is_none")]
    thread_id: Option<&'a str>,
    /// Lets a notification service extension fetch the image
    #[serde(rename = "mutable-content", skip_serializing_if = "Option::is_none")]
    mutable_content: Option<u8>,
}

#[derive(Debug, Serialize)]
struct Alert<'a> {
    title: &'a str,
    body: &'a str,
}

impl<'a> ApnsRequest<'a> {
    fn new(payload: &'a PushPayload) -> Self {
        let image_url = payload.image_url.as_deref();
        Self {
            aps: Aps {
                alert: Alert {
                    title: &payload.title,
                    body: &payload.body,
                },
                sound: "default",
                thread_id: payload.thread_id.as_deref(),
                mutable_content: image_url.map(|_| 1),
            },
            data: &payload.data,
            image_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApnsErrorBody {
    reason: String,
}
