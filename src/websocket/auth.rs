//! Connection Authorization
//!
//! Decides who may open a connection and which groups it receives. The
//! membership decision belongs to an upstream collaborator; this module only
//! defines the seam and a JWT-backed implementation whose tokens carry the
//! caller's id and group memberships.

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::routing::{ClientId, GroupId};

/// Identity and memberships granted to a new connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub client_id: ClientId,
    pub groups: HashSet<GroupId>,
}

/// Authorization failures, all raised before the upgrade completes
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing credentials")]
    MissingToken,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Not a member of group {0}")]
    NotMember(GroupId),
}

/// Gate for opening connections
#[async_trait]
pub trait ConnectAuthorizer: Send + Sync {
    /// Check the credentials and the requested groups.
    ///
    /// An empty request asks for every group the caller belongs to.
    async fn authorize(
        &self,
        token: &str,
        requested: &HashSet<GroupId>,
    ) -> Result<Grant, AuthError>;
}

/// Claims carried by connection tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectClaims {
    /// Client id
    pub sub: ClientId,
    /// Groups the client belongs to
    #[serde(default)]
    pub groups: Vec<GroupId>,
    /// Expiry (seconds since epoch)
    pub exp: i64,
}

/// HS256 token verifier
pub struct JwtAuthorizer {
    key: DecodingKey,
    validation: Validation,
}

impl JwtAuthorizer {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

#[async_trait]
impl ConnectAuthorizer for JwtAuthorizer {
    async fn authorize(
        &self,
        token: &str,
        requested: &HashSet<GroupId>,
    ) -> Result<Grant, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let claims = decode::<ConnectClaims>(token, &self.key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?
            .claims;

        let member_of: HashSet<GroupId> = claims.groups.into_iter().collect();
        let groups = if requested.is_empty() {
            member_of
        } else {
            if let Some(group) = requested.iter().find(|g| !member_of.contains(g)) {
                return Err(AuthError::NotMember(*group));
            }
            requested.clone()
        };

        Ok(Grant {
            client_id: claims.sub,
            groups,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use uuid::Uuid;

    const SECRET: &str = "test-secret";

    fn token(sub: ClientId, groups: Vec<GroupId>, exp_offset: i64) -> String {
        let claims = ConnectClaims {
            sub,
            groups,
            exp: chrono::Utc::now().timestamp() + exp_offset,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_member_is_granted_requested_group() {
        let auth = JwtAuthorizer::new(SECRET);
        let client = Uuid::new_v4();
        let (g1, g2) = (Uuid::new_v4(), Uuid::new_v4());

        let requested: HashSet<_> = [g1].into_iter().collect();
        let grant = auth
            .authorize(&token(client, vec![g1, g2], 3600), &requested)
            .await
            .unwrap();

        assert_eq!(grant.client_id, client);
        assert_eq!(grant.groups, requested);
    }

    #[tokio::test]
    async fn test_empty_request_grants_all_memberships() {
        let auth = JwtAuthorizer::new(SECRET);
        let (g1, g2) = (Uuid::new_v4(), Uuid::new_v4());

        let grant = auth
            .authorize(&token(Uuid::new_v4(), vec![g1, g2], 3600), &HashSet::new())
            .await
            .unwrap();

        assert_eq!(grant.groups.len(), 2);
    }

    #[tokio::test]
    async fn test_non_member_rejected() {
        let auth = JwtAuthorizer::new(SECRET);
        let foreign = Uuid::new_v4();
        let requested: HashSet<_> = [foreign].into_iter().collect();

        let err = auth
            .authorize(&token(Uuid::new_v4(), vec![Uuid::new_v4()], 3600), &requested)
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::NotMember(g) if g == foreign));
    }

    #[tokio::test]
    async fn test_bad_tokens_rejected() {
        let auth = JwtAuthorizer::new(SECRET);

        assert!(matches!(
            auth.authorize("", &HashSet::new()).await,
            Err(AuthError::MissingToken)
        ));
        assert!(matches!(
            auth.authorize("not.a.jwt", &HashSet::new()).await,
            Err(AuthError::InvalidToken(_))
        ));

        let expired = token(Uuid::new_v4(), vec![], -3600);
        assert!(matches!(
            auth.authorize(&expired, &HashSet::new()).await,
            Err(AuthError::InvalidToken(_))
        ));

        let other = JwtAuthorizer::new("other-secret");
        let valid_elsewhere = token(Uuid::new_v4(), vec![], 3600);
        assert!(other.authorize(&valid_elsewhere, &HashSet::new()).await.is_err());
    }
}
