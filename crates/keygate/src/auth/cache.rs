//! Bounded token validation cache.
//!
//! Maps a bearer token to the outcome of its last full check. Capacity is
//! fixed at construction and the least recently used entry is evicted when a
//! new token is inserted into a full cache. Every entry carries its own TTL;
//! expired entries are removed lazily, when a lookup touches them.
//!
//! Entries remember the [`ScopeTarget`] they were computed for. A positive or
//! insufficient-scope decision only holds for that target; signature and
//! expiry rejections hold for every target.
//!
//! Time is read from [`tokio::time::Instant`] so tests can pause the clock.

use crate::auth::scopes::ScopeTarget;
use crate::errors::AuthError;
use crate::observability::metrics;
use common::types::BearerToken;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Fallback TTL when `now + ttl` overflows the clock.
const MAX_ENTRY_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("token cache capacity must be greater than zero")]
    ZeroCapacity,
}

/// Why a cached validation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    InvalidToken,
    ExpiredToken,
    InsufficientScope,
}

impl Rejection {
    /// Signature and expiry failures do not depend on the target.
    #[must_use]
    pub fn is_target_independent(self) -> bool {
        matches!(self, Rejection::InvalidToken | Rejection::ExpiredToken)
    }
}

impl From<Rejection> for AuthError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::InvalidToken => AuthError::InvalidToken,
            Rejection::ExpiredToken => AuthError::ExpiredToken,
            Rejection::InsufficientScope => AuthError::InsufficientScope,
        }
    }
}

/// Result of a full check, as remembered by the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Valid { scopes: Vec<String> },
    Invalid(Rejection),
}

impl ValidationOutcome {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid { .. })
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    outcome: ValidationOutcome,
    target: ScopeTarget,
    expires_at: Instant,
}

impl CacheEntry {
    #[must_use]
    pub fn outcome(&self) -> &ValidationOutcome {
        &self.outcome
    }

    #[must_use]
    pub fn target(&self) -> &ScopeTarget {
        &self.target
    }

    #[must_use]
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Whether this decision can answer a full check for `target`.
    #[must_use]
    pub fn applies_to(&self, target: &ScopeTarget) -> bool {
        match self.outcome {
            ValidationOutcome::Invalid(rejection) if rejection.is_target_independent() => true,
            _ => self.target == *target,
        }
    }
}

/// Result of [`ValidationCache::lookup`].
#[derive(Debug, Clone)]
pub enum CacheLookup {
    /// Live entry; it is now the most recently used.
    Hit(CacheEntry),
    /// The entry had outlived its TTL and has been removed.
    Expired(CacheEntry),
    Miss,
}

/// Thread-safe LRU of validation outcomes keyed by token.
pub struct ValidationCache {
    entries: Mutex<LruCache<BearerToken, CacheEntry>>,
    capacity: NonZeroUsize,
}

impl ValidationCache {
    /// # Errors
    ///
    /// Returns `CacheError::ZeroCapacity` if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self, CacheError> {
        let capacity = NonZeroUsize::new(capacity).ok_or(CacheError::ZeroCapacity)?;
        Ok(Self {
            entries: Mutex::new(LruCache::new(capacity)),
            capacity,
        })
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<BearerToken, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a token, distinguishing a TTL expiry from a plain miss.
    pub fn lookup(&self, token: &BearerToken) -> CacheLookup {
        let now = Instant::now();
        let mut entries = self.lock();

        match entries.get(token) {
            None => return CacheLookup::Miss,
            Some(entry) if !entry.is_expired(now) => return CacheLookup::Hit(entry.clone()),
            Some(_) => {}
        }

        match entries.pop(token) {
            Some(entry) => {
                tracing::trace!(target: "keygate.auth.cache", "Evicted expired cache entry");
                CacheLookup::Expired(entry)
            }
            None => CacheLookup::Miss,
        }
    }

    /// Live entry for `token`, if any. Expired entries are removed.
    pub fn get(&self, token: &BearerToken) -> Option<CacheEntry> {
        match self.lookup(token) {
            CacheLookup::Hit(entry) => Some(entry),
            CacheLookup::Expired(_) | CacheLookup::Miss => None,
        }
    }

    /// Insert or replace the entry for `token`, valid for `ttl` from now.
    ///
    /// Evicts the least recently used token when the cache is full.
    pub fn put(
        &self,
        token: BearerToken,
        outcome: ValidationOutcome,
        target: ScopeTarget,
        ttl: Duration,
    ) {
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl)
            .or_else(|| now.checked_add(MAX_ENTRY_TTL))
            .unwrap_or(now);

        let entry = CacheEntry {
            outcome,
            target,
            expires_at,
        };

        let displaced = self.lock().push(token.clone(), entry);
        if let Some((displaced_token, _)) = displaced {
            if displaced_token != token {
                tracing::debug!(target: "keygate.auth.cache", "Evicted least recently used token");
                metrics::record_cache_eviction();
            }
        }
    }

    /// Remove the entry for `token`. Returns whether one was present.
    pub fn delete(&self, token: &BearerToken) -> bool {
        self.lock().pop(token).is_some()
    }

    /// Whether a live entry exists, without touching recency.
    pub fn contains(&self, token: &BearerToken) -> bool {
        let now = Instant::now();
        self.lock()
            .peek(token)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Number of stored entries, including expired ones not yet touched.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }
}

impl std::fmt::Debug for ValidationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
