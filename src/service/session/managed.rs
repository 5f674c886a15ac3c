use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, instrument};

use super::{SessionError, SessionEstablisher, expiry_after};
use crate::models::identity::{Identity, Session};

#[derive(Debug, Deserialize)]
struct IssuedSession {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl IssuedSession {
    fn into_session(self) -> Result<Session, SessionError> {
        Ok(Session::Token {
            expires_at: expiry_after(self.expires_in)?,
            token: self.access_token,
            refresh_token: self.refresh_token,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ProviderUser {
    email: String,
    domain: String,
    #[serde(default)]
    email_confirmed_at: Option<DateTime<Utc>>,
}

/// Sessions held by a hosted backend-as-a-service with passwordless auth.
///
/// The service key authorizes session creation and refresh. Every other call
/// is made with the user's own access token.
pub struct ManagedAuth {
    client: Client,
    base_url: String,
    service_key: String,
}

impl ManagedAuth {
    pub fn new(client: Client, base_url: &str, service_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }
}

async fn rejection(response: reqwest::Response) -> SessionError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    SessionError::Rejected(format!("{status}: {body}"))
}

#[async_trait]
impl SessionEstablisher for ManagedAuth {
    fn name(&self) -> &'static str {
        "managed"
    }

    #[instrument(skip(self, identity), fields(email = %identity.email))]
    async fn establish(&self, identity: &Identity) -> Result<Session, SessionError> {
        let response = self
            .client
            .post(self.endpoint("sessions"))
            .bearer_auth(&self.service_key)
            .json(identity)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(rejection(response).await);
        }

        let issued: IssuedSession = response.json().await?;
        info!("managed session created");
        issued.into_session()
    }

    async fn current_identity(&self, token: &str) -> Result<Option<Identity>, SessionError> {
        let response = self
            .client
            .get(self.endpoint("user"))
            .bearer_auth(token)
            .send()
            .await?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let user: ProviderUser = response.json().await?;
                if user.email_confirmed_at.is_none() {
                    debug!(email = %user.email, "session user has no confirmed email");
                    return Ok(None);
                }
                Ok(Some(Identity::new(&user.email, &user.domain)))
            }
            _ => Err(rejection(response).await),
        }
    }

    async fn end_session(&self, token: &str) -> Result<Option<String>, SessionError> {
        let response = self
            .client
            .post(self.endpoint("logout"))
            .bearer_auth(token)
            .send()
            .await?;
        // an already dead session is as good as a revoked one
        if response.status().is_success() || response.status() == StatusCode::UNAUTHORIZED {
            Ok(None)
        } else {
            Err(rejection(response).await)
        }
    }

    #[instrument(skip_all)]
    async fn refresh(&self, refresh_token: &str) -> Result<Session, SessionError> {
        let response = self
            .client
            .post(self.endpoint("sessions/refresh"))
            .bearer_auth(&self.service_key)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(rejection(response).await);
        }

        let mut issued: IssuedSession = response.json().await?;
        // providers that do not rotate keep the caller's refresh token valid
        if issued.refresh_token.is_none() {
            issued.refresh_token = Some(refresh_token.to_string());
        }
        info!("managed session refreshed");
        issued.into_session()
    }
}
