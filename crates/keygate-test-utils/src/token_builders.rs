//! Builder patterns for test tokens
//!
//! Provides a fluent API for creating signed test tokens.

use crate::crypto_fixtures::{FixtureError, TestSigningKey};
use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};

/// Builder for creating test JWT claims
///
/// # Example
/// ```rust,ignore
/// let token = TestTokenBuilder::new()
///     .with_scope("user:memberof:acme.vault")
///     .expires_in(3600)
///     .sign(&key)?;
/// ```
pub struct TestTokenBuilder {
    scopes: Vec<String>,
    exp: i64,
    extra: Map<String, Value>,
}

impl TestTokenBuilder {
    /// Create a new token builder: no scopes, expires in one hour
    pub fn new() -> Self {
        Self {
            scopes: Vec::new(),
            exp: (Utc::now() + Duration::seconds(3600)).timestamp(),
            extra: Map::new(),
        }
    }

    /// Add one scope entry
    pub fn with_scope(mut self, scope: &str) -> Self {
        self.scopes.push(scope.to_string());
        self
    }

    /// Add several scope entries
    pub fn with_scopes(mut self, scopes: &[&str]) -> Self {
        self.scopes.extend(scopes.iter().map(ToString::to_string));
        self
    }

    /// Set expiration in seconds from now (negative for the past)
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.exp = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self
    }

    /// Expired one hour ago
    pub fn expired(self) -> Self {
        self.expires_in(-3600)
    }

    /// Set or override an arbitrary claim
    pub fn with_claim(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(name.to_string(), value.into());
        self
    }

    /// Build the claims as a JSON value
    pub fn build(self) -> Value {
        let mut claims = Map::new();
        claims.insert("exp".to_string(), json!(self.exp));
        claims.insert("scope".to_string(), json!(self.scopes));
        claims.extend(self.extra);
        Value::Object(claims)
    }

    /// Build and sign with `key`
    pub fn sign(self, key: &TestSigningKey) -> Result<String, FixtureError> {
        key.sign(&self.build())
    }
}

impl Default for TestTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}
