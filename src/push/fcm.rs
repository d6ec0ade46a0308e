//! Firebase Cloud Messaging (HTTP v1) gateway for Android devices.
//!
//! Authenticates with a service-account key: a signed RS256 assertion is
//! exchanged for an OAuth access token, which is cached until shortly
//! before it expires.

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;

use super::{PushError, PushGateway, PushPayload};

const FCM_ENDPOINT: &str = "https://fcm.googleapis.com";
const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Seconds before expiry at which a cached token is refreshed
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// Google service-account key (the JSON file downloaded from the console)
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(default)]
    pub project_id: Option<String>,
    pub private_key: String,
    pub client_email: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> Result<Self, PushError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PushError::Auth(format!("cannot read service account {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| PushError::Auth(format!("invalid service account {}: {}", path.display(), e)))
    }
}

/// FCM gateway configuration
#[derive(Debug, Clone)]
pub struct FcmConfig {
    pub project_id: String,
    pub credentials: ServiceAccountKey,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: i64,
}

impl CachedToken {
    fn is_fresh(&self, now: i64) -> bool {
        self.expires_at > now + TOKEN_REFRESH_MARGIN_SECS
    }
}

/// FCM HTTP v1 client
pub struct FcmGateway {
    client: Client,
    config: FcmConfig,
    token: Mutex<Option<CachedToken>>,
}

impl FcmGateway {
    pub fn new(config: FcmConfig) -> Result<Self, PushError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            config,
            token: Mutex::new(None),
        })
    }

    fn send_url(&self) -> String {
        format!(
            "{}/v1/projects/{}/messages:send",
            FCM_ENDPOINT, self.config.project_id
        )
    }

    /// Cached OAuth token, refreshed when close to expiry
    async fn access_token(&self) -> Result<String, PushError> {
        let mut cache = self.token.lock().await;
        let now = Utc::now().timestamp();

        if let Some(cached) = cache.as_ref().filter(|t| t.is_fresh(now)) {
            return Ok(cached.access_token.clone());
        }

        let fresh = self.fetch_access_token(now).await?;
        let token = fresh.access_token.clone();
        *cache = Some(fresh);
        Ok(token)
    }

    async fn fetch_access_token(&self, now: i64) -> Result<CachedToken, PushError> {
        let creds = &self.config.credentials;
        let claims = AssertionClaims {
            iss: &creds.client_email,
            sub: &creds.client_email,
            scope: FCM_SCOPE,
            aud: &creds.token_uri,
            iat: now,
            exp: now + 3600,
        };

        let key = EncodingKey::from_rsa_pem(creds.private_key.as_bytes())
            .map_err(|e| PushError::Auth(format!("invalid private key: {}", e)))?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| PushError::Auth(format!("failed to sign assertion: {}", e)))?;

        let response = self
            .client
            .post(&creds.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(PushError::Auth(format!("token exchange failed ({}): {}", status, text)));
        }

        let body: TokenResponse = response.json().await?;
        tracing::debug!(expires_in = body.expires_in, "Refreshed FCM access token");

        Ok(CachedToken {
            access_token: body.access_token,
            expires_at: Utc::now().timestamp() + body.expires_in,
        })
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }
}

#[async_trait]
impl PushGateway for FcmGateway {
    fn name(&self) -> &'static str {
        "fcm"
    }

    async fn send(&self, token: &str, payload: &PushPayload) -> Result<(), PushError> {
        let access_token = self.access_token().await?;

        let response = self
            .client
            .post(self.send_url())
            .bearer_auth(access_token)
            .json(&FcmRequest::new(token, payload))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PushError::Timeout(self.config.request_timeout)
                } else {
                    PushError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        if status == StatusCode::UNAUTHORIZED {
            self.invalidate_token().await;
        }
        let text = response.text().await.unwrap_or_default();
        Err(classify_error(status.as_u16(), &text))
    }
}

/// Map an FCM error response to a [`PushError`]
fn classify_error(status: u16, body: &str) -> PushError {
    let parsed: Option<ErrorEnvelope> = serde_json::from_str(body).ok();
    let (api_status, error_code, message) = parsed
        .map(|env| {
            let code = env
                .error
                .details
                .iter()
                .find_map(|d| d.error_code.clone());
            (env.error.status, code, env.error.message)
        })
        .unwrap_or_else(|| (None, None, body.to_string()));

    let unregistered = error_code.as_deref() == Some("UNREGISTERED");
    let invalid_token = status == 400 && api_status.as_deref() == Some("INVALID_ARGUMENT");

    match status {
        404 => PushError::Rejected {
            status,
            reason: error_code.unwrap_or_else(|| "UNREGISTERED".to_string()),
        },
        _ if unregistered || invalid_token => PushError::Rejected {
            status,
            reason: error_code
                .or(api_status)
                .unwrap_or_else(|| "INVALID_ARGUMENT".to_string()),
        },
        401 | 403 => PushError::Auth(message),
        _ => PushError::Gateway { status, message },
    }
}

// ============================================
// Wire types
// ============================================

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Serialize)]
struct FcmRequest<'a> {
    message: FcmMessage<'a>,
}

#[derive(Debug, Serialize)]
struct FcmMessage<'a> {
    token: &'a str,
    notification: FcmNotification<'a>,
    #[serde(skip_serializing_if = "is_empty_map")]
    data: &'a HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    android: Option<AndroidConfig<'a>>,
}

fn is_empty_map(map: &&HashMap<String, String>) -> bool {
    map.is_empty()
}

#[derive(Debug, Serialize)]
struct FcmNotification<'a> {
    title: &'a str,
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct AndroidConfig<'a> {
    notification: AndroidNotification<'a>,
}

#[derive(Debug, Serialize)]
struct AndroidNotification<'a> {
    tag: &'a str,
}

impl<'a> FcmRequest<'a> {
    fn new(token: &'a str, payload: &'a PushPayload) -> Self {
        Self {
            message: FcmMessage {
                token,
                notification: FcmNotification {
                    title: &payload.title,
                    body: &payload.body,
                    image: payload.image_url.as_deref(),
                },
                data: &payload.data,
                android: payload.thread_id.as_deref().map(|tag| AndroidConfig {
                    notification: AndroidNotification { tag },
                }),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "errorCode", default)]
    error_code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> FcmGateway {
        FcmGateway::new(FcmConfig {
            project_id: "demo-project".to_string(),
            credentials: ServiceAccountKey {
                project_id: None,
                private_key: "not-a-key".to_string(),
                client_email: "push@demo-project.iam.gserviceaccount.com".to_string(),
                token_uri: default_token_uri(),
            },
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn test_request_shape() {
        let payload = PushPayload {
            image_url: Some("https://cdn/x.jpg".to_string()),
            thread_id: Some("group-1".to_string()),
            ..PushPayload::new("New post from ana", "sunset").with_data("post_id", "42")
        };
        let json = serde_json::to_value(FcmRequest::new("tok", &payload)).unwrap();

        assert_eq!(json["message"]["token"], "tok");
        assert_eq!(json["message"]["notification"]["title"], "New post from ana");
        assert_eq!(json["message"]["notification"]["image"], "https://cdn/x.jpg");
        assert_eq!(json["message"]["data"]["post_id"], "42");
        assert_eq!(json["message"]["android"]["notification"]["tag"], "group-1");

        let bare = serde_json::to_value(FcmRequest::new("tok", &PushPayload::new("t", ""))).unwrap();
        assert!(bare["message"].get("data").is_none());
        assert!(bare["message"].get("android").is_none());
    }

    #[test]
    fn test_classify_unregistered() {
        let body = r#"{"error":{"code":404,"message":"Requested entity was not found.","status":"NOT_FOUND",
            "details":[{"@type":"type.googleapis.com/google.firebase.fcm.v1.FcmError","errorCode":"UNREGISTERED"}]}}"#;
        assert!(matches!(
            classify_error(404, body),
            PushError::Rejected { status: 404, ref reason } if reason == "UNREGISTERED"
        ));
    }

    #[test]
    fn test_classify_invalid_argument() {
        let body = r#"{"error":{"code":400,"message":"The registration token is not a valid FCM registration token","status":"INVALID_ARGUMENT"}}"#;
        assert!(classify_error(400, body).is_token_rejected());
    }

    #[test]
    fn test_classify_auth_and_other() {
        assert!(matches!(classify_error(401, "nope"), PushError::Auth(_)));
        assert!(matches!(
            classify_error(503, "unavailable"),
            PushError::Gateway { status: 503, .. }
        ));
    }

    #[tokio::test]
    async fn test_cached_token_reused() {
        let gw = gateway();
        *gw.token.lock().await = Some(CachedToken {
            access_token: "cached".to_string(),
            expires_at: Utc::now().timestamp() + 3600,
        });
        assert_eq!(gw.access_token().await.unwrap(), "cached");
    }

    #[tokio::test]
    async fn test_expiring_token_refreshed() {
        let gw = gateway();
        *gw.token.lock().await = Some(CachedToken {
            access_token: "stale".to_string(),
            expires_at: Utc::now().timestamp() + 30,
        });
        // Refresh is attempted and fails on the bogus key before any request
        assert!(matches!(gw.access_token().await, Err(PushError::Auth(_))));
    }

    #[test]
    fn test_service_account_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sa.json");
        std::fs::write(
            &path,
            r#"{"type":"service_account","project_id":"p","private_key":"k","client_email":"e@p"}"#,
        )
        .unwrap();

        let key = ServiceAccountKey::from_file(&path).unwrap();
        assert_eq!(key.client_email, "e@p");
        assert_eq!(key.token_uri, GOOGLE_TOKEN_URI);

        assert!(ServiceAccountKey::from_file(&dir.path().join("missing.json")).is_err());
    }
}
