use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The subject a verified session belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub email: String,
    pub domain: String,
}

impl Identity {
    pub fn new(email: &str, domain: &str) -> Self {
        Self {
            email: email.trim().to_lowercase(),
            domain: domain.trim().to_lowercase(),
        }
    }
}

/// What a session establisher hands back after a verified code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Session {
    /// Bearer token the HTTP layer keeps in the session cookie.
    Token {
        token: String,
        expires_at: DateTime<Utc>,
        /// Long-lived credential for minting the next access token, when the
        /// provider issues one.
        refresh_token: Option<String>,
    },
    /// The provider finishes the login itself; send the user here.
    Redirect { location: String },
}
