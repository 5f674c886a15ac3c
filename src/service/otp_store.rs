use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;

use crate::models::otp_codes::{ChallengeKey, PendingVerification};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("verification store unavailable: {0}")]
    Unavailable(String),
}

/// Key-value home for pending challenges.
///
/// Conditional operations take the code the caller observed so that a
/// challenge re-issued in the meantime is never touched. Implementations must
/// run each conditional operation atomically per key.
#[async_trait]
pub trait VerificationStore: Send + Sync {
    /// Insert or replace the challenge for its key.
    async fn put(&self, challenge: PendingVerification) -> Result<(), StoreError>;

    async fn get(&self, key: &ChallengeKey) -> Result<Option<PendingVerification>, StoreError>;

    /// Remove the challenge only if it still holds `code`. Returns whether
    /// this call removed it.
    async fn remove_if_code(&self, key: &ChallengeKey, code: &str) -> Result<bool, StoreError>;

    /// Bump the failure counter of the challenge holding `code`. Returns the
    /// new count, or `None` if that challenge is gone.
    async fn record_failed_attempt(
        &self,
        key: &ChallengeKey,
        code: &str,
    ) -> Result<Option<u32>, StoreError>;

    /// Drop every challenge that expired before `now`.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// Process-local store. Lost on restart and not shared between instances.
#[derive(Default)]
pub struct InMemoryVerificationStore {
    entries: DashMap<ChallengeKey, PendingVerification>,
}

impl InMemoryVerificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl VerificationStore for InMemoryVerificationStore {
    async fn put(&self, challenge: PendingVerification) -> Result<(), StoreError> {
        self.entries.insert(challenge.key.clone(), challenge);
        Ok(())
    }

    async fn get(&self, key: &ChallengeKey) -> Result<Option<PendingVerification>, StoreError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn remove_if_code(&self, key: &ChallengeKey, code: &str) -> Result<bool, StoreError> {
        Ok(self
            .entries
            .remove_if(key, |_, pending| pending.code == code)
            .is_some())
    }

    async fn record_failed_attempt(
        &self,
        key: &ChallengeKey,
        code: &str,
    ) -> Result<Option<u32>, StoreError> {
        let Some(mut entry) = self.entries.get_mut(key) else {
            return Ok(None);
        };
        if entry.code != code {
            return Ok(None);
        }
        entry.failed_attempts += 1;
        Ok(Some(entry.failed_attempts))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let before = self.entries.len();
        self.entries.retain(|_, pending| !pending.is_expired(now));
        Ok(before.saturating_sub(self.entries.len()))
    }
}
