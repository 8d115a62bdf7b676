//! Bearer token authentication.
//!
//! - [`verifier`] - ES384 signature check and claim extraction
//! - [`scopes`] - organization/namespace scope matching
//! - [`cache`] - bounded LRU of validation decisions with per-entry TTL
//! - [`validator`] - full and liveness checks built on the three above

pub mod cache;
pub mod scopes;
pub mod validator;
pub mod verifier;

pub use cache::{CacheEntry, CacheError, CacheLookup, Rejection, ValidationCache, ValidationOutcome};
pub use scopes::ScopeTarget;
pub use validator::{TokenValidator, DEFAULT_NEGATIVE_CACHE_TTL};
pub use verifier::{TokenVerifier, VerificationError, VerifiedToken};
