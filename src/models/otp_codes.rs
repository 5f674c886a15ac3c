use chrono::{DateTime, Utc};

/// Case-insensitive (email, domain) pair a challenge is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChallengeKey {
    email: String,
    domain: String,
}

impl ChallengeKey {
    pub fn new(email: &str, domain: &str) -> Self {
        Self {
            email: email.trim().to_lowercase(),
            domain: domain.trim().to_lowercase(),
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }
}

/// One outstanding OTP challenge.
#[derive(Debug, Clone)]
pub struct PendingVerification {
    pub key: ChallengeKey,
    pub code: String,
    pub failed_attempts: u32,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingVerification {
    pub fn new(
        key: ChallengeKey,
        code: String,
        issued_at: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            key,
            code,
            failed_attempts: 0,
            issued_at,
            expires_at: issued_at + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Returned by the issuer once the code has been handed to the sender.
#[derive(Debug, Clone)]
pub struct Receipt {
    pub otp_sent: bool,
    pub expires_at: DateTime<Utc>,
}
