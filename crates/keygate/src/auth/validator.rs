//! Token validation: full check at `AUTH` time, liveness check per gated
//! command.
//!
//! # Full check
//!
//! 1. A live cache entry that applies to the requested target answers
//!    immediately, replaying the cached decision.
//! 2. Otherwise the token is verified. Signature failures and expired tokens
//!    are cached as negative for the negative TTL. Oversized tokens are
//!    rejected without being cached.
//! 3. Verified tokens are checked for scope. The decision (positive or
//!    insufficient scope) is cached until the token's `exp`.
//!
//! # Liveness check
//!
//! Run for every gated command on the connection's bound token. A cached
//! decision is trusted without re-running scope matching; a cached decision
//! whose TTL has lapsed fails once with [`AuthError::ExpiredCacheEntry`] and is
//! evicted. Without a cache entry the token is re-verified for signature and
//! expiry only.

use crate::auth::cache::{CacheLookup, Rejection, ValidationCache, ValidationOutcome};
use crate::auth::scopes::ScopeTarget;
use crate::auth::verifier::{TokenVerifier, VerificationError};
use crate::errors::AuthError;
use crate::observability::metrics;
use chrono::Utc;
use common::types::BearerToken;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Default lifetime of cached signature/expiry rejections (24 hours).
pub const DEFAULT_NEGATIVE_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug)]
pub struct TokenValidator {
    verifier: Arc<TokenVerifier>,
    cache: Arc<ValidationCache>,
    negative_ttl: Duration,
}

impl TokenValidator {
    #[must_use]
    pub fn new(
        verifier: Arc<TokenVerifier>,
        cache: Arc<ValidationCache>,
        negative_ttl: Duration,
    ) -> Self {
        Self {
            verifier,
            cache,
            negative_ttl,
        }
    }

    #[must_use]
    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    #[must_use]
    pub fn cache(&self) -> &ValidationCache {
        &self.cache
    }

    /// Full validation of `token` for `organization`/`namespace`.
    ///
    /// # Errors
    ///
    /// - `InvalidToken` - signature, header or claims did not verify
    /// - `ExpiredToken` - `exp` is not in the future
    /// - `InsufficientScope` - neither required scope is present
    #[instrument(skip_all, fields(organization = %organization, namespace = %namespace))]
    pub fn full_check(
        &self,
        token: &BearerToken,
        organization: &str,
        namespace: &str,
    ) -> Result<(), AuthError> {
        let target = ScopeTarget::new(organization, namespace);

        if let Some(entry) = self.cache.get(token) {
            if entry.applies_to(&target) {
                metrics::record_cache_lookup("hit");
                let result = match entry.outcome() {
                    ValidationOutcome::Valid { .. } => Ok(()),
                    ValidationOutcome::Invalid(rejection) => Err(AuthError::from(*rejection)),
                };
                record_auth_result(&result);
                return result;
            }
            tracing::debug!(
                target: "keygate.auth.validator",
                cached_target = %entry.target(),
                "Cached decision was made for another target, re-validating"
            );
        }
        metrics::record_cache_lookup("miss");

        let result = self.validate_uncached(token, target);
        record_auth_result(&result);
        result
    }

    fn validate_uncached(&self, token: &BearerToken, target: ScopeTarget) -> Result<(), AuthError> {
        let verified = match self.verifier.verify(token.as_str()) {
            Ok(verified) => verified,
            Err(VerificationError::TokenTooLarge) => {
                // Not cached: the key would be the oversized token itself
                tracing::debug!(target: "keygate.auth.validator", size = token.len(), "Token too large");
                return Err(AuthError::InvalidToken);
            }
            Err(e) => {
                tracing::debug!(target: "keygate.auth.validator", error = %e, "Token failed verification");
                self.cache.put(
                    token.clone(),
                    ValidationOutcome::Invalid(Rejection::InvalidToken),
                    target,
                    self.negative_ttl,
                );
                return Err(AuthError::InvalidToken);
            }
        };

        let Some(ttl) = remaining_lifetime(verified.expires_at, Utc::now().timestamp_millis())
        else {
            tracing::debug!(
                target: "keygate.auth.validator",
                expires_at = verified.expires_at,
                "Token is expired"
            );
            self.cache.put(
                token.clone(),
                ValidationOutcome::Invalid(Rejection::ExpiredToken),
                target,
                self.negative_ttl,
            );
            return Err(AuthError::ExpiredToken);
        };

        if target.is_granted_by(&verified.scopes) {
            self.cache.put(
                token.clone(),
                ValidationOutcome::Valid {
                    scopes: verified.scopes,
                },
                target,
                ttl,
            );
            Ok(())
        } else {
            tracing::debug!(
                target: "keygate.auth.validator",
                required = %target,
                scope_count = verified.scopes.len(),
                "Token lacks required scope"
            );
            self.cache.put(
                token.clone(),
                ValidationOutcome::Invalid(Rejection::InsufficientScope),
                target,
                ttl,
            );
            Err(AuthError::InsufficientScope)
        }
    }

    /// Cheap re-check of an already bound token.
    ///
    /// # Errors
    ///
    /// - `InvalidToken` - cached as invalid, or fails re-verification
    /// - `ExpiredCacheEntry` - cached decision outlived its TTL (entry evicted)
    /// - `ExpiredToken` - uncached token whose `exp` has passed
    #[instrument(skip_all)]
    pub fn liveness_check(&self, token: &BearerToken) -> Result<(), AuthError> {
        match self.cache.lookup(token) {
            CacheLookup::Hit(entry) => {
                metrics::record_cache_lookup("hit");
                if entry.outcome().is_valid() {
                    Ok(())
                } else {
                    Err(AuthError::InvalidToken)
                }
            }
            CacheLookup::Expired(entry) => {
                metrics::record_cache_lookup("expired");
                if entry.outcome().is_valid() {
                    Err(AuthError::ExpiredCacheEntry)
                } else {
                    Err(AuthError::InvalidToken)
                }
            }
            CacheLookup::Miss => {
                metrics::record_cache_lookup("miss");
                let verified = self.verifier.verify(token.as_str()).map_err(|e| {
                    tracing::debug!(target: "keygate.auth.validator", error = %e, "Bound token failed re-verification");
                    AuthError::InvalidToken
                })?;
                remaining_lifetime(verified.expires_at, Utc::now().timestamp_millis())
                    .map(|_| ())
                    .ok_or(AuthError::ExpiredToken)
            }
        }
    }
}

/// Time left until `expires_at` (epoch seconds), measured from `now_millis`
/// (epoch milliseconds). `None` once the expiry has been reached.
fn remaining_lifetime(expires_at: i64, now_millis: i64) -> Option<Duration> {
    let remaining = expires_at.saturating_mul(1000).saturating_sub(now_millis);
    (remaining > 0).then(|| Duration::from_millis(remaining.unsigned_abs()))
}

fn record_auth_result(result: &Result<(), AuthError>) {
    let outcome = match result {
        Ok(()) => "success",
        Err(AuthError::InvalidToken) => "invalid_token",
        Err(AuthError::ExpiredToken | AuthError::ExpiredCacheEntry) => "expired",
        Err(AuthError::InsufficientScope) => "insufficient_scope",
    };
    metrics::record_auth_attempt(outcome);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use keygate_test_utils::crypto_fixtures::TestSigningKey;
    use keygate_test_utils::token_builders::TestTokenBuilder;

    struct Fixture {
        key: TestSigningKey,
        validator: TokenValidator,
    }

    fn fixture(capacity: usize) -> Fixture {
        let key = TestSigningKey::generate().unwrap();
        let verifier = Arc::new(TokenVerifier::from_pem(&key.public_key_pem()).unwrap());
        let cache = Arc::new(ValidationCache::new(capacity).unwrap());
        Fixture {
            key,
            validator: TokenValidator::new(verifier, cache, DEFAULT_NEGATIVE_CACHE_TTL),
        }
    }

    fn token(raw: String) -> BearerToken {
        BearerToken::new(raw)
    }

    #[test]
    fn test_full_check_accepts_member_scope() {
        let f = fixture(16);
        let t = token(
            TestTokenBuilder::new()
                .with_scope("user:memberof:acme.vault")
                .sign(&f.key)
                .unwrap(),
        );

        assert_eq!(f.validator.full_check(&t, "acme", "vault"), Ok(()));
        assert!(f.validator.cache().contains(&t));
    }

    #[test]
    fn test_full_check_accepts_write_scope() {
        let f = fixture(16);
        let t = token(
            TestTokenBuilder::new()
                .with_scope("acme.vault.write")
                .sign(&f.key)
                .unwrap(),
        );

        assert_eq!(f.validator.full_check(&t, "acme", "vault"), Ok(()));
    }

    #[test]
    fn test_full_check_insufficient_scope_is_cached() {
        let f = fixture(16);
        let t = token(
            TestTokenBuilder::new()
                .with_scope("user:memberof:acme.other")
                .sign(&f.key)
                .unwrap(),
        );

        assert_eq!(
            f.validator.full_check(&t, "acme", "vault"),
            Err(AuthError::InsufficientScope)
        );

        // Re-verifying under the rotated key would report InvalidToken
        let rotated = TestSigningKey::generate().unwrap();
        f.validator
            .verifier()
            .set_public_key_pem(&rotated.public_key_pem())
            .unwrap();

        assert_eq!(
            f.validator.full_check(&t, "acme", "vault"),
            Err(AuthError::InsufficientScope)
        );
        let entry = f.validator.cache().get(&t).unwrap();
        assert_eq!(
            entry.outcome(),
            &ValidationOutcome::Invalid(Rejection::InsufficientScope)
        );
    }

    #[test]
    fn test_full_check_bad_signature_is_negatively_cached() {
        let f = fixture(16);
        let stranger = TestSigningKey::generate().unwrap();
        let t = token(
            TestTokenBuilder::new()
                .with_scope("acme.vault")
                .sign(&stranger)
                .unwrap(),
        );

        assert_eq!(
            f.validator.full_check(&t, "acme", "vault"),
            Err(AuthError::InvalidToken)
        );
        assert_eq!(
            f.validator.cache().get(&t).unwrap().outcome(),
            &ValidationOutcome::Invalid(Rejection::InvalidToken)
        );
        // Rejection holds for any target
        assert_eq!(
            f.validator.full_check(&t, "other", "ns"),
            Err(AuthError::InvalidToken)
        );
    }

    #[test]
    fn test_full_check_expired_token_is_negatively_cached() {
        let f = fixture(16);
        let t = token(
            TestTokenBuilder::new()
                .with_scope("acme.vault")
                .expired()
                .sign(&f.key)
                .unwrap(),
        );

        assert_eq!(
            f.validator.full_check(&t, "acme", "vault"),
            Err(AuthError::ExpiredToken)
        );
        assert_eq!(
            f.validator.full_check(&t, "acme", "vault"),
            Err(AuthError::ExpiredToken)
        );
        assert_eq!(
            f.validator.cache().get(&t).unwrap().outcome(),
            &ValidationOutcome::Invalid(Rejection::ExpiredToken)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_token_rejection_lasts_retention_window() {
        let f = fixture(16);
        let t = token(
            TestTokenBuilder::new()
                .with_scope("acme.vault")
                .expires_in(-60)
                .sign(&f.key)
                .unwrap(),
        );

        assert_eq!(
            f.validator.full_check(&t, "acme", "vault"),
            Err(AuthError::ExpiredToken)
        );

        tokio::time::advance(Duration::from_secs(23 * 60 * 60)).await;
        assert_eq!(
            f.validator.cache().get(&t).unwrap().outcome(),
            &ValidationOutcome::Invalid(Rejection::ExpiredToken)
        );

        tokio::time::advance(Duration::from_secs(60 * 60 + 1)).await;
        assert!(!f.validator.cache().contains(&t));

        // Fresh miss: verified again and cached for a new window
        assert_eq!(
            f.validator.full_check(&t, "acme", "vault"),
            Err(AuthError::ExpiredToken)
        );
        let entry = f.validator.cache().get(&t).unwrap();
        assert_eq!(
            entry.expires_at(),
            tokio::time::Instant::now() + DEFAULT_NEGATIVE_CACHE_TTL
        );
    }

    #[test]
    fn test_oversized_token_is_not_cached() {
        let f = fixture(16);
        let t = BearerToken::new("a".repeat(common::jwt::MAX_JWT_SIZE_BYTES + 1));

        assert_eq!(
            f.validator.full_check(&t, "acme", "vault"),
            Err(AuthError::InvalidToken)
        );
        assert!(!f.validator.cache().contains(&t));
        assert!(f.validator.cache().is_empty());
    }

    #[test]
    fn test_remaining_lifetime_has_millisecond_precision() {
        assert_eq!(
            remaining_lifetime(100, 99_001),
            Some(Duration::from_millis(999))
        );
        assert_eq!(remaining_lifetime(100, 99_999), Some(Duration::from_millis(1)));
        assert_eq!(remaining_lifetime(100, 100_000), None);
        assert_eq!(remaining_lifetime(100, 100_020), None);
        assert_eq!(remaining_lifetime(i64::MIN, 0), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_positive_entry_never_outlives_exp() {
        let f = fixture(16);
        let now_millis = Utc::now().timestamp_millis();
        // Whole-second expiry with a fractional second left over
        let exp = now_millis / 1000 + 2;
        let t = token(
            TestTokenBuilder::new()
                .with_scope("acme.vault")
                .with_claim("exp", exp)
                .sign(&f.key)
                .unwrap(),
        );

        assert_eq!(f.validator.full_check(&t, "acme", "vault"), Ok(()));

        let entry = f.validator.cache().get(&t).unwrap();
        let until_exp = Duration::from_millis((exp * 1000 - now_millis).unsigned_abs());
        assert!(entry.expires_at() <= tokio::time::Instant::now() + until_exp);
    }

    #[test]
    fn test_full_check_revalidates_for_other_target() {
        let f = fixture(16);
        let t = token(
            TestTokenBuilder::new()
                .with_scope("acme.vault")
                .sign(&f.key)
                .unwrap(),
        );

        assert_eq!(f.validator.full_check(&t, "acme", "vault"), Ok(()));
        assert_eq!(
            f.validator.full_check(&t, "acme", "secrets"),
            Err(AuthError::InsufficientScope)
        );
    }

    #[test]
    fn test_full_check_garbage_token() {
        let f = fixture(16);
        let t = BearerToken::from("garbage");

        assert_eq!(
            f.validator.full_check(&t, "acme", "vault"),
            Err(AuthError::InvalidToken)
        );
    }

    #[test]
    fn test_liveness_trusts_cached_decision() {
        let f = fixture(16);
        let t = token(
            TestTokenBuilder::new()
                .with_scope("acme.vault")
                .sign(&f.key)
                .unwrap(),
        );
        f.validator.full_check(&t, "acme", "vault").unwrap();

        assert_eq!(f.validator.liveness_check(&t), Ok(()));
    }

    #[test]
    fn test_liveness_rejects_cached_negative() {
        let f = fixture(16);
        let t = token(
            TestTokenBuilder::new()
                .with_scope("acme.other")
                .sign(&f.key)
                .unwrap(),
        );
        let _ = f.validator.full_check(&t, "acme", "vault");

        assert_eq!(f.validator.liveness_check(&t), Err(AuthError::InvalidToken));
    }

    #[test]
    fn test_liveness_reverifies_after_eviction() {
        let f = fixture(1);
        let first = token(
            TestTokenBuilder::new()
                .with_scope("acme.vault")
                .sign(&f.key)
                .unwrap(),
        );
        let second = token(
            TestTokenBuilder::new()
                .with_scope("acme.vault")
                .with_claim("jti", "second")
                .sign(&f.key)
                .unwrap(),
        );

        f.validator.full_check(&first, "acme", "vault").unwrap();
        f.validator.full_check(&second, "acme", "vault").unwrap();
        assert!(!f.validator.cache().contains(&first));

        // Still signed and unexpired, so liveness succeeds without the cache
        assert_eq!(f.validator.liveness_check(&first), Ok(()));
    }

    #[test]
    fn test_liveness_uncached_forgery_fails() {
        let f = fixture(4);
        let stranger = TestSigningKey::generate().unwrap();
        let t = token(
            TestTokenBuilder::new()
                .with_scope("acme.vault")
                .sign(&stranger)
                .unwrap(),
        );

        assert_eq!(f.validator.liveness_check(&t), Err(AuthError::InvalidToken));
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_fails_once_when_entry_ttl_lapses() {
        let f = fixture(4);
        let t = token(
            TestTokenBuilder::new()
                .with_scope("acme.vault")
                .expires_in(30)
                .sign(&f.key)
                .unwrap(),
        );
        f.validator.full_check(&t, "acme", "vault").unwrap();

        // Cache clock moves past the entry TTL while the wall clock does not
        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(
            f.validator.liveness_check(&t),
            Err(AuthError::ExpiredCacheEntry)
        );
        assert!(!f.validator.cache().contains(&t));
        // Entry is gone; the token itself is still within `exp`
        assert_eq!(f.validator.liveness_check(&t), Ok(()));
    }

    #[test]
    fn test_rotated_key_does_not_invalidate_cached_decisions() {
        let f = fixture(4);
        let t = token(
            TestTokenBuilder::new()
                .with_scope("acme.vault")
                .sign(&f.key)
                .unwrap(),
        );
        f.validator.full_check(&t, "acme", "vault").unwrap();

        let rotated = TestSigningKey::generate().unwrap();
        f.validator
            .verifier()
            .set_public_key_pem(&rotated.public_key_pem())
            .unwrap();

        assert_eq!(f.validator.full_check(&t, "acme", "vault"), Ok(()));
        f.validator.cache().delete(&t);
        assert_eq!(
            f.validator.full_check(&t, "acme", "vault"),
            Err(AuthError::InvalidToken)
        );
    }
}
