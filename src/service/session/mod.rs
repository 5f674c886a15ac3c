//! Bindings to the identity backend that turns a verified code into a session.
//!
//! Three interchangeable adapters exist. The application runs with exactly
//! one of them, picked by `auth_provider` in the configuration.

mod hosted;
mod managed;
mod token;

pub use hosted::{HostedLogin, HostedLoginSettings};
pub use managed::ManagedAuth;
pub use token::TokenSessions;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::models::identity::{Identity, Session};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("identity provider rejected the request: {0}")]
    Rejected(String),

    #[error("identity provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("token error: {0}")]
    Token(#[from] crate::config::crypto::TokenError),

    #[error("operation not supported by the {0} provider")]
    Unsupported(&'static str),
}

#[async_trait]
pub trait SessionEstablisher: Send + Sync {
    /// Short provider name used in logs.
    fn name(&self) -> &'static str;

    /// Mark `identity` as authenticated for the rest of the interactive session.
    async fn establish(&self, identity: &Identity) -> Result<Session, SessionError>;

    /// Resolve a session token back to its identity. Unknown, expired or
    /// revoked tokens resolve to `None`.
    async fn current_identity(&self, token: &str) -> Result<Option<Identity>, SessionError>;

    async fn is_authenticated(&self, token: &str) -> Result<bool, SessionError> {
        Ok(self.current_identity(token).await?.is_some())
    }

    /// End the session. Some providers answer with a URL the browser must visit.
    async fn end_session(&self, _token: &str) -> Result<Option<String>, SessionError> {
        Ok(None)
    }

    /// Finish a redirect-based login from the provider's authorization code.
    /// `state` must be the value handed out by `establish` for this login.
    async fn complete_login(&self, _code: &str, _state: &str) -> Result<Session, SessionError> {
        Err(SessionError::Unsupported(self.name()))
    }

    /// Trade a refresh token for a fresh access token.
    async fn refresh(&self, _refresh_token: &str) -> Result<Session, SessionError> {
        Err(SessionError::Unsupported(self.name()))
    }
}

/// Absolute expiry for a provider-reported lifetime in seconds.
pub(crate) fn expiry_after(expires_in: i64) -> Result<DateTime<Utc>, SessionError> {
    Duration::try_seconds(expires_in)
        .filter(|lifetime| *lifetime > Duration::zero())
        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
        .ok_or_else(|| SessionError::Rejected(format!("unusable token lifetime {expires_in}s")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_lifetimes_are_range_checked() {
        assert!(expiry_after(3600).unwrap() > Utc::now());
        assert!(matches!(expiry_after(0), Err(SessionError::Rejected(_))));
        assert!(matches!(expiry_after(-60), Err(SessionError::Rejected(_))));
        assert!(matches!(expiry_after(i64::MAX), Err(SessionError::Rejected(_))));
    }
}
