//! JWT header utilities shared across Keygate crates.
//!
//! This module provides the pre-verification checks applied to every bearer
//! token before any cryptography runs:
//! - Size limit for DoS prevention
//! - Algorithm extraction from the JWT header
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - The header is only inspected, never trusted; the signature must still be
//!   verified against the configured key
//! - Generic error messages prevent information leakage
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{extract_alg, EXPECTED_ALGORITHM};
//!
//! let alg = extract_alg(token)?;
//! if alg != EXPECTED_ALGORITHM {
//!     return Err("unsupported algorithm");
//! }
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// JWTs larger than this size are rejected BEFORE any parsing or cryptographic
/// operations.
///
/// # Rationale
///
/// - Typical ES384 JWTs with a handful of scopes are 300-700 bytes
/// - 8KB leaves room for long scope lists while bounding base64 decode and
///   signature work per `AUTH` attempt
pub const MAX_JWT_SIZE_BYTES: usize = 8192; // 8KB

/// The only signing algorithm accepted for bearer tokens.
///
/// ECDSA over P-384 with SHA-384. Pinning a single asymmetric algorithm
/// forecloses algorithm-confusion attacks (`none`, HS* with the public key as
/// secret, and so on).
pub const EXPECTED_ALGORITHM: &str = "ES384";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while inspecting a JWT header.
///
/// Note: Error messages are intentionally generic to prevent information leakage.
/// Detailed information is logged at debug level for troubleshooting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtHeaderError {
    /// Token size exceeds maximum allowed.
    #[error("token exceeds maximum size")]
    TokenTooLarge,

    /// Token format is invalid (not a valid JWT structure).
    #[error("malformed token")]
    MalformedToken,

    /// Token header is missing the `alg` field.
    #[error("missing signing algorithm")]
    MissingAlg,
}

// =============================================================================
// Functions
// =============================================================================

/// Reject tokens larger than [`MAX_JWT_SIZE_BYTES`].
///
/// # Errors
///
/// Returns `JwtHeaderError::TokenTooLarge` if the token exceeds the limit.
pub fn check_token_size(token: &str) -> Result<(), JwtHeaderError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtHeaderError::TokenTooLarge);
    }
    Ok(())
}

/// Extract the `alg` (signing algorithm) from a JWT header without verifying
/// the signature.
///
/// Used to reject tokens that declare anything other than
/// [`EXPECTED_ALGORITHM`] before handing them to the signature check, so the
/// rejection reason can be reported precisely.
///
/// # Security
///
/// - Token size is checked BEFORE any parsing (denial-of-service prevention)
/// - This function does NOT validate the token signature
///
/// # Errors
///
/// Returns `JwtHeaderError` variants:
/// - `TokenTooLarge` - Token exceeds size limit
/// - `MalformedToken` - Token format invalid (wrong structure, bad base64, invalid JSON)
/// - `MissingAlg` - Header missing `alg` field or `alg` is not a non-empty string
pub fn extract_alg(token: &str) -> Result<String, JwtHeaderError> {
    check_token_size(token)?;

    // JWT format: header.payload.signature
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        tracing::debug!(
            target: "common.jwt",
            parts = parts.len(),
            "Token rejected: invalid JWT format"
        );
        return Err(JwtHeaderError::MalformedToken);
    }

    let header_part = parts.first().ok_or(JwtHeaderError::MalformedToken)?;
    let header_bytes = URL_SAFE_NO_PAD.decode(header_part).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT header base64");
        JwtHeaderError::MalformedToken
    })?;

    let header: serde_json::Value = serde_json::from_slice(&header_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT header JSON");
        JwtHeaderError::MalformedToken
    })?;

    header
        .get("alg")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .ok_or(JwtHeaderError::MissingAlg)
}

// =============================================================================
// Tests
// =============================================================================
