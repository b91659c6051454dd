//! Single-use challenge storage
//!
//! A challenge lives from `issue` until the first `consume` of its token or
//! until it expires, whichever comes first. Expired entries are invisible to
//! `consume` even if `sweep_expired` has not run yet.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use log::debug;

use super::crypto;
use super::errors::StoreError;
use super::types::{CeremonyPurpose, IssuedChallenge};
use super::user::UserHandle;

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub trait ChallengeStore: Send + Sync {
    /// Record a fresh random challenge for `subject`, valid for `ttl`
    ///
    /// # Errors
    /// Returns `StoreError::Backend` if the entry cannot be recorded.
    fn issue(
        &self,
        subject: &UserHandle,
        purpose: CeremonyPurpose,
        ttl: Duration,
    ) -> Result<IssuedChallenge, StoreError>;

    /// Atomically remove and return the challenge behind `token`
    ///
    /// Returns `None` if the token is unknown, already consumed, or expired.
    /// Among concurrent callers with the same token at most one gets `Some`.
    ///
    /// # Errors
    /// Returns `StoreError::Backend` if the backing medium fails.
    fn consume(&self, token: &str) -> Result<Option<IssuedChallenge>, StoreError>;

    /// Drop every entry expired at `now`, returning how many were removed
    fn sweep_expired(&self, now: DateTime<Utc>) -> usize;

    /// Number of live and not-yet-swept entries
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process challenge store backed by a `DashMap`
pub struct MemoryChallengeStore {
    entries: DashMap<String, IssuedChallenge>,
    clock: Arc<dyn Clock>,
}

impl MemoryChallengeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }
}

impl Default for MemoryChallengeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChallengeStore for MemoryChallengeStore {
    fn issue(
        &self,
        subject: &UserHandle,
        purpose: CeremonyPurpose,
        ttl: Duration,
    ) -> Result<IssuedChallenge, StoreError> {
        let ttl = TimeDelta::from_std(ttl)
            .map_err(|_| StoreError::Backend("challenge TTL out of range".to_string()))?;
        let issued_at = self.clock.now();

        let challenge = IssuedChallenge {
            token: uuid::Uuid::new_v4().to_string(),
            value: crypto::generate_challenge().to_vec(),
            subject: subject.clone(),
            purpose,
            issued_at,
            expires_at: issued_at + ttl,
        };

        self.entries
            .insert(challenge.token.clone(), challenge.clone());
        debug!(
            "Issued {purpose:?} challenge for '{subject}' (expires {})",
            challenge.expires_at
        );
        Ok(challenge)
    }

    fn consume(&self, token: &str) -> Result<Option<IssuedChallenge>, StoreError> {
        let Some((_, challenge)) = self.entries.remove(token) else {
            return Ok(None);
        };

        if challenge.is_expired(self.clock.now()) {
            debug!("Discarded expired challenge for '{}'", challenge.subject);
            return Ok(None);
        }

        debug!(
            "Consumed {:?} challenge for '{}'",
            challenge.purpose, challenge.subject
        );
        Ok(Some(challenge))
    }

    fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, challenge| !challenge.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
