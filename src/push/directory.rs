//! Recipient directory client.
//!
//! Device tokens live with the CRUD service; this module asks it which
//! devices belong to the members of a set of groups.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

use super::DeviceToken;
use crate::routing::{ClientId, GroupId};

/// Directory errors
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Recipient directory unavailable")]
    Unavailable,

    #[error("Recipient directory timed out")]
    Timeout,

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Directory error {status}: {message}")]
    Api { status: u16, message: String },
}

/// Source of push recipients
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// Device tokens of every member of `groups`, minus `exclude`'s devices
    async fn device_tokens(
        &self,
        groups: &[GroupId],
        exclude: Option<ClientId>,
    ) -> Result<Vec<DeviceToken>, DirectoryError>;
}

/// Drop repeated tokens, keeping first-seen order
pub fn dedupe_tokens(tokens: Vec<DeviceToken>) -> Vec<DeviceToken> {
    let mut seen = HashSet::new();
    tokens
        .into_iter()
        .filter(|t| seen.insert(t.token.clone()))
        .collect()
}

/// Directory backed by the CRUD service's internal API
pub struct HttpRecipientDirectory {
    client: Client,
    base_url: String,
}

impl HttpRecipientDirectory {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, DirectoryError> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl RecipientDirectory for HttpRecipientDirectory {
    async fn device_tokens(
        &self,
        groups: &[GroupId],
        exclude: Option<ClientId>,
    ) -> Result<Vec<DeviceToken>, DirectoryError> {
        if groups.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/internal/device-tokens", self.base_url);
        let body = DeviceTokenQuery {
            groups,
            exclude_user: exclude,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DirectoryError::Timeout
                } else if e.is_connect() {
                    DirectoryError::Unavailable
                } else {
                    DirectoryError::Request(e)
                }
            })?;

        if response.status().is_success() {
            let tokens: Vec<DeviceToken> = response.json().await?;
            Ok(tokens)
        } else {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            Err(DirectoryError::Api {
                status: status.as_u16(),
                message: text,
            })
        }
    }
}

#[derive(Debug, Serialize)]
struct DeviceTokenQuery<'a> {
    groups: &'a [GroupId],
    #[serde(skip_serializing_if = "Option::is_none")]
    exclude_user: Option<ClientId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_dedupe_keeps_first_seen_order() {
        let tokens = vec![
            DeviceToken::ios("a"),
            DeviceToken::android("b"),
            DeviceToken::ios("a"),
            DeviceToken::ios("c"),
        ];
        let unique = dedupe_tokens(tokens);
        let names: Vec<&str> = unique.iter().map(|t| t.token.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_query_shape() {
        let group = Uuid::new_v4();
        let groups = [group];
        let json = serde_json::to_value(DeviceTokenQuery {
            groups: &groups,
            exclude_user: None,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({ "groups": [group.to_string()] }));
    }

    #[tokio::test]
    async fn test_empty_groups_skip_request() {
        // Unroutable address: any request would fail
        let directory =
            HttpRecipientDirectory::new("http://127.0.0.1:9", Duration::from_millis(100)).unwrap();
        assert!(directory.device_tokens(&[], None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_directory() {
        let directory =
            HttpRecipientDirectory::new("http://127.0.0.1:9/", Duration::from_millis(500)).unwrap();
        let result = directory.device_tokens(&[Uuid::new_v4()], None).await;
        assert!(result.is_err());
    }
}
