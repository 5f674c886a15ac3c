use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{info, instrument, warn};
use url::Url;

use super::{SessionError, SessionEstablisher, expiry_after};
use crate::config::crypto::CryptoService;
use crate::models::identity::{Identity, Session};

const SCOPES: &str = "email openid profile";
const LOGIN_STATE_TTL_MINUTES: i64 = 10;

#[derive(Debug, Clone)]
pub struct HostedLoginSettings {
    /// `auth.example.com`, or a full `http(s)://` base URL.
    pub domain: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub logout_uri: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl TokenResponse {
    fn into_session(self) -> Result<Session, SessionError> {
        Ok(Session::Token {
            expires_at: expiry_after(self.expires_in)?,
            token: self.access_token,
            refresh_token: self.refresh_token,
        })
    }
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    email: String,
}

/// A verified identity waiting for the browser to come back from the
/// provider's login page.
struct PendingLogin {
    identity: Identity,
    expires_at: DateTime<Utc>,
}

/// Redirect-based login against a hosted OpenID Connect provider.
///
/// The provider owns the login page, so `establish` only points the browser
/// at it, carrying a one-time `state` bound to the identity that passed
/// verification. `complete_login` consumes that state and only accepts the
/// provider's answer if it names the same email.
pub struct HostedLogin {
    client: Client,
    base: Url,
    settings: HostedLoginSettings,
    pending: DashMap<String, PendingLogin>,
    state_ttl: Duration,
}

impl HostedLogin {
    pub fn new(client: Client, settings: HostedLoginSettings) -> Result<Self, url::ParseError> {
        let base = if settings.domain.starts_with("http://") || settings.domain.starts_with("https://") {
            Url::parse(&settings.domain)?
        } else {
            Url::parse(&format!("https://{}", settings.domain))?
        };
        Ok(Self {
            client,
            base,
            settings,
            pending: DashMap::new(),
            state_ttl: Duration::minutes(LOGIN_STATE_TTL_MINUTES),
        })
    }

    #[cfg(test)]
    fn with_state_ttl(mut self, ttl: Duration) -> Self {
        self.state_ttl = ttl;
        self
    }

    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        url.set_path(path);
        url
    }

    pub fn login_url(&self, login_hint: &str, state: &str) -> String {
        let mut url = self.endpoint("/login");
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("redirect_uri", &self.settings.redirect_uri)
            .append_pair("scope", SCOPES)
            .append_pair("state", state)
            .append_pair("login_hint", login_hint);
        url.into()
    }

    pub fn logout_url(&self) -> String {
        let mut url = self.endpoint("/logout");
        url.query_pairs_mut()
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("logout_uri", &self.settings.logout_uri);
        url.into()
    }

    /// Take the pending login for `state`. A state is good for one callback.
    fn take_pending(&self, state: &str) -> Result<Identity, SessionError> {
        let Some((_, login)) = self.pending.remove(state) else {
            return Err(SessionError::Rejected("unknown login state".into()));
        };
        if login.expires_at < Utc::now() {
            return Err(SessionError::Rejected("login state expired".into()));
        }
        Ok(login.identity)
    }

    async fn token_grant(&self, grant: &[(&str, &str)]) -> Result<TokenResponse, SessionError> {
        let mut form = vec![("client_id", self.settings.client_id.as_str())];
        form.extend_from_slice(grant);
        let mut request = self.client.post(self.endpoint("/oauth2/token")).form(&form);
        if let Some(secret) = &self.settings.client_secret {
            request = request.basic_auth(&self.settings.client_id, Some(secret));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            return Err(SessionError::Rejected(format!("token endpoint returned {status}")));
        }
        Ok(response.json().await?)
    }

    async fn user_info(&self, token: &str) -> Result<Option<UserInfo>, SessionError> {
        let response = self
            .client
            .get(self.endpoint("/oauth2/userInfo"))
            .bearer_auth(token)
            .send()
            .await?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => Err(SessionError::Rejected(format!("userInfo returned {status}"))),
        }
    }
}

#[async_trait]
impl SessionEstablisher for HostedLogin {
    fn name(&self) -> &'static str {
        "hosted"
    }

    async fn establish(&self, identity: &Identity) -> Result<Session, SessionError> {
        let now = Utc::now();
        self.pending.retain(|_, login| login.expires_at >= now);

        let expires_at = now
            .checked_add_signed(self.state_ttl)
            .ok_or_else(|| SessionError::Rejected("login state lifetime out of range".into()))?;
        let state = CryptoService::generate_state();
        let location = self.login_url(&identity.email, &state);
        self.pending.insert(
            state,
            PendingLogin {
                identity: identity.clone(),
                expires_at,
            },
        );
        Ok(Session::Redirect { location })
    }

    async fn current_identity(&self, token: &str) -> Result<Option<Identity>, SessionError> {
        Ok(self.user_info(token).await?.map(|user| {
            let domain = user.email.rsplit('@').next().unwrap_or_default().to_string();
            Identity::new(&user.email, &domain)
        }))
    }

    async fn end_session(&self, _token: &str) -> Result<Option<String>, SessionError> {
        Ok(Some(self.logout_url()))
    }

    #[instrument(skip_all)]
    async fn complete_login(&self, code: &str, state: &str) -> Result<Session, SessionError> {
        let expected = self.take_pending(state)?;

        let tokens = self
            .token_grant(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.settings.redirect_uri.as_str()),
            ])
            .await?;

        let Some(user) = self.user_info(&tokens.access_token).await? else {
            return Err(SessionError::Rejected("userInfo refused the new access token".into()));
        };
        if user.email.trim().to_lowercase() != expected.email {
            warn!(expected = %expected.email, "provider logged in a different account");
            return Err(SessionError::Rejected("signed-in account does not match the verified email".into()));
        }

        info!(email = %expected.email, "hosted login completed");
        tokens.into_session()
    }

    #[instrument(skip_all)]
    async fn refresh(&self, refresh_token: &str) -> Result<Session, SessionError> {
        let mut tokens = self
            .token_grant(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .await?;
        // the provider does not rotate refresh tokens on this grant
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = Some(refresh_token.to_string());
        }
        tokens.into_session()
    }
}
