use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::config::crypto::CryptoService;
use crate::errors::VerificationError;
use crate::models::identity::{Identity, Session};
use crate::models::otp_codes::{ChallengeKey, PendingVerification, Receipt};
use crate::service::email_service::{DispatchError, NotificationSender};
use crate::service::otp_store::VerificationStore;
use crate::service::session::SessionEstablisher;
use crate::service::validation::{email_matches_domain, validate_domain};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone)]
pub struct VerificationPolicy {
    pub otp_ttl: chrono::Duration,
    /// Mismatches tolerated per challenge. Zero disables the lockout.
    pub max_attempts: u32,
    pub dispatch_timeout: Duration,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            otp_ttl: chrono::Duration::minutes(10),
            max_attempts: 5,
            dispatch_timeout: Duration::from_secs(10),
        }
    }
}

/// Drives the domain ownership flow: check the domain, check the email
/// against it, issue a code, verify the code, hand off to the session
/// backend.
pub struct VerificationService {
    store: Arc<dyn VerificationStore>,
    sender: Arc<dyn NotificationSender>,
    sessions: Arc<dyn SessionEstablisher>,
    clock: Arc<dyn Clock>,
    policy: VerificationPolicy,
}

impl VerificationService {
    pub fn new(
        store: Arc<dyn VerificationStore>,
        sender: Arc<dyn NotificationSender>,
        sessions: Arc<dyn SessionEstablisher>,
        policy: VerificationPolicy,
    ) -> Self {
        Self {
            store,
            sender,
            sessions,
            clock: Arc::new(SystemClock),
            policy,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn check_domain(&self, domain: &str) -> Result<(), VerificationError> {
        let domain = domain.trim();
        if domain.is_empty() {
            return Err(VerificationError::MissingField("Domain is required"));
        }
        if !validate_domain(domain) {
            return Err(VerificationError::InvalidDomainFormat);
        }
        Ok(())
    }

    pub fn check_email(&self, email: &str, domain: &str) -> Result<(), VerificationError> {
        if !email_matches_domain(email.trim(), domain.trim()) {
            return Err(VerificationError::EmailDomainMismatch(domain.trim().to_string()));
        }
        Ok(())
    }

    /// Validate, match, then issue. What the email step of the flow runs.
    pub async fn request_code(&self, email: &str, domain: &str) -> Result<Receipt, VerificationError> {
        if email.trim().is_empty() || domain.trim().is_empty() {
            return Err(VerificationError::MissingField("Domain and email are required"));
        }
        self.check_domain(domain)?;
        self.check_email(email, domain)?;
        self.issue(email, domain).await
    }

    /// Generate a fresh code for the pair, replacing any earlier one, and
    /// send it. A failed send leaves the new challenge in place.
    #[instrument(skip(self))]
    pub async fn issue(&self, email: &str, domain: &str) -> Result<Receipt, VerificationError> {
        if email.trim().is_empty() || domain.trim().is_empty() {
            return Err(VerificationError::MissingField("Domain and email are required"));
        }

        let now = self.clock.now();
        let purged = self.store.purge_expired(now).await?;
        if purged > 0 {
            info!(purged, "dropped expired challenges");
        }

        let key = ChallengeKey::new(email, domain);
        let code = CryptoService::generate_otp_code();
        let challenge = PendingVerification::new(key.clone(), code.clone(), now, self.policy.otp_ttl);
        let expires_at = challenge.expires_at;
        self.store.put(challenge).await?;

        let timeout = self.policy.dispatch_timeout;
        match tokio::time::timeout(timeout, self.sender.send(key.email(), &code)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(error = %err, "failed to dispatch verification code");
                return Err(VerificationError::DispatchFailed(err));
            }
            Err(_) => {
                warn!(?timeout, "verification code dispatch timed out");
                return Err(VerificationError::DispatchFailed(DispatchError::Timeout(
                    timeout.as_secs(),
                )));
            }
        }

        info!(%expires_at, "verification code issued");
        Ok(Receipt {
            otp_sent: true,
            expires_at,
        })
    }

    /// Check a submitted code. Succeeds at most once per issued code.
    #[instrument(skip(self, code))]
    pub async fn verify(&self, email: &str, domain: &str, code: &str) -> Result<(), VerificationError> {
        let code = code.trim();
        if email.trim().is_empty() || domain.trim().is_empty() || code.is_empty() {
            return Err(VerificationError::MissingField("Domain, email, and OTP are required"));
        }
        self.check_domain(domain)?;
        self.check_email(email, domain)?;

        let key = ChallengeKey::new(email, domain);
        let Some(pending) = self.store.get(&key).await? else {
            return Err(VerificationError::NoChallengePending);
        };

        if pending.is_expired(self.clock.now()) {
            info!(issued_at = %pending.issued_at, "challenge expired");
            self.store.remove_if_code(&key, &pending.code).await?;
            return Err(VerificationError::ChallengeExpired);
        }

        let max_attempts = self.policy.max_attempts;
        if max_attempts > 0 && pending.failed_attempts >= max_attempts {
            self.store.remove_if_code(&key, &pending.code).await?;
            return Err(VerificationError::TooManyAttempts);
        }

        if !CryptoService::codes_match(code, &pending.code) {
            let attempts = self.store.record_failed_attempt(&key, &pending.code).await?;
            if let Some(attempts) = attempts {
                if max_attempts > 0 && attempts >= max_attempts {
                    warn!(attempts, "challenge locked after repeated mismatches");
                    self.store.remove_if_code(&key, &pending.code).await?;
                    return Err(VerificationError::TooManyAttempts);
                }
            }
            return Err(VerificationError::CodeMismatch);
        }

        // a concurrent verify may have consumed the code since the lookup
        if !self.store.remove_if_code(&key, &pending.code).await? {
            return Err(VerificationError::NoChallengePending);
        }

        info!("verification code accepted");
        Ok(())
    }

    /// Verify the code, then open a session for the pair exactly once.
    pub async fn complete(
        &self,
        email: &str,
        domain: &str,
        code: &str,
    ) -> Result<Session, VerificationError> {
        self.verify(email, domain, code).await?;

        let identity = Identity::new(email, domain);
        self.sessions.establish(&identity).await.map_err(|err| {
            warn!(error = %err, provider = self.sessions.name(), "session establishment failed");
            VerificationError::SessionEstablishmentFailed(err)
        })
    }
}
