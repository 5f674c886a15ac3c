use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{SessionError, SessionEstablisher};
use crate::config::crypto::CryptoService;
use crate::models::identity::{Identity, Session};

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    domain: String,
    iat: i64,
    exp: i64,
    jti: String,
}

/// In-house issuer of signed, stateless session tokens.
pub struct TokenSessions {
    crypto: CryptoService,
    ttl: Duration,
}

impl TokenSessions {
    pub fn new(crypto: CryptoService, ttl: Duration) -> Self {
        Self { crypto, ttl }
    }
}

#[async_trait]
impl SessionEstablisher for TokenSessions {
    fn name(&self) -> &'static str {
        "token"
    }

    #[instrument(skip(self, identity), fields(email = %identity.email))]
    async fn establish(&self, identity: &Identity) -> Result<Session, SessionError> {
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(self.ttl)
            .ok_or_else(|| SessionError::Rejected("session lifetime out of range".into()))?;
        let claims = SessionClaims {
            sub: identity.email.clone(),
            domain: identity.domain.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        let token = self.crypto.sign(&claims)?;
        Ok(Session::Token {
            token,
            expires_at,
            refresh_token: None,
        })
    }

    async fn current_identity(&self, token: &str) -> Result<Option<Identity>, SessionError> {
        let claims: SessionClaims = match self.crypto.verify(token) {
            Ok(claims) => claims,
            Err(err) => {
                debug!(error = %err, "rejected session token");
                return Ok(None);
            }
        };
        if claims.exp <= Utc::now().timestamp() {
            return Ok(None);
        }
        Ok(Some(Identity::new(&claims.sub, &claims.domain)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sessions(ttl: Duration) -> TokenSessions {
        let crypto = CryptoService::new("0123456789abcdef0123456789abcdef").unwrap();
        TokenSessions::new(crypto, ttl)
    }

    #[tokio::test]
    async fn token_resolves_to_the_same_identity() {
        let sessions = sessions(Duration::minutes(60));
        let identity = Identity::new("bob@acme.com", "acme.com");

        let Session::Token { token, .. } = sessions.establish(&identity).await.unwrap() else {
            panic!("token provider must mint tokens");
        };
        assert_eq!(sessions.current_identity(&token).await.unwrap(), Some(identity));
        assert!(sessions.is_authenticated(&token).await.unwrap());
    }

    #[tokio::test]
    async fn expired_token_is_anonymous() {
        let sessions = sessions(Duration::seconds(-5));
        let identity = Identity::new("bob@acme.com", "acme.com");
        let Session::Token { token, .. } = sessions.establish(&identity).await.unwrap() else {
            panic!("token provider must mint tokens");
        };
        assert_eq!(sessions.current_identity(&token).await.unwrap(), None);
    }

    #[tokio::test]
    async fn garbage_token_is_anonymous() {
        let sessions = sessions(Duration::minutes(60));
        assert!(!sessions.is_authenticated("garbage").await.unwrap());
    }

    #[tokio::test]
    async fn redirect_login_and_refresh_are_unsupported() {
        let sessions = sessions(Duration::minutes(60));
        assert!(matches!(
            sessions.complete_login("code", "state").await,
            Err(SessionError::Unsupported("token"))
        ));
        assert!(matches!(
            sessions.refresh("anything").await,
            Err(SessionError::Unsupported("token"))
        ));
    }
}
