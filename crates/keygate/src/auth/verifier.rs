//! ES384 signature verification for bearer tokens.
//!
//! [`TokenVerifier`] checks a token against the configured public key and
//! extracts the two claims Keygate cares about: `exp` and `scope`. It does not
//! decide whether the token is expired or authorized; that is the validator's
//! job, so the verifier can be shared by the full and liveness checks.
//!
//! The public key can be replaced at runtime with
//! [`TokenVerifier::set_public_key_pem`]; in-flight verifications keep using
//! the key they started with.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use common::jwt::{extract_alg, JwtHeaderError, EXPECTED_ALGORITHM};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::instrument;

/// DER `AlgorithmIdentifier` of an SPKI key: `id-ecPublicKey` on `secp384r1`.
const P384_ALGORITHM_ID: [u8; 18] = [
    0x30, 0x10, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x05, 0x2b, 0x81,
    0x04, 0x00, 0x22,
];

/// Claims extracted from a token whose signature verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    /// Raw scope strings, in token order.
    pub scopes: Vec<String>,
    /// Absolute expiry, seconds since the Unix epoch.
    pub expires_at: i64,
}

/// Reasons a token failed verification.
///
/// These are logged, never sent to clients: the validator collapses all of
/// them into a single "invalid token" outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("token exceeds maximum size")]
    TokenTooLarge,

    #[error("malformed token")]
    Malformed,

    #[error("unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("malformed claims: {0}")]
    MalformedClaims(&'static str),

    #[error("invalid public key: {0}")]
    InvalidKey(String),
}

impl From<JwtHeaderError> for VerificationError {
    fn from(err: JwtHeaderError) -> Self {
        match err {
            JwtHeaderError::TokenTooLarge => VerificationError::TokenTooLarge,
            JwtHeaderError::MalformedToken | JwtHeaderError::MissingAlg => {
                VerificationError::Malformed
            }
        }
    }
}

/// Verifies ES384 tokens against a replaceable public key.
pub struct TokenVerifier {
    key: RwLock<Arc<DecodingKey>>,
    validation: Validation,
}

impl TokenVerifier {
    /// Build a verifier from a PEM-encoded (SPKI) P-384 public key.
    ///
    /// # Errors
    ///
    /// Returns `VerificationError::InvalidKey` if the PEM cannot be parsed or
    /// the key is not on P-384.
    pub fn from_pem(pem: &str) -> Result<Self, VerificationError> {
        let key = parse_public_key(pem)?;

        // Expiry and scope are judged by the validator so that an expired but
        // correctly signed token can be told apart from a forged one.
        let mut validation = Validation::new(Algorithm::ES384);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        Ok(Self {
            key: RwLock::new(Arc::new(key)),
            validation,
        })
    }

    /// Replace the verification key.
    ///
    /// The old key stays in effect if the new PEM is invalid.
    ///
    /// # Errors
    ///
    /// Returns `VerificationError::InvalidKey` if the PEM cannot be parsed.
    pub fn set_public_key_pem(&self, pem: &str) -> Result<(), VerificationError> {
        let key = Arc::new(parse_public_key(pem)?);
        *self.key.write().unwrap_or_else(PoisonError::into_inner) = key;
        tracing::info!(target: "keygate.auth.verifier", "Verification key replaced");
        Ok(())
    }

    fn current_key(&self) -> Arc<DecodingKey> {
        Arc::clone(&self.key.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Verify the token signature and extract `exp` and `scope`.
    ///
    /// The token must declare `ES384` in its header; any other algorithm is
    /// rejected before the signature is looked at.
    ///
    /// # Errors
    ///
    /// Returns a `VerificationError` describing the first check that failed.
    #[instrument(skip_all)]
    pub fn verify(&self, token: &str) -> Result<VerifiedToken, VerificationError> {
        let alg = extract_alg(token)?;
        if alg != EXPECTED_ALGORITHM {
            tracing::debug!(
                target: "keygate.auth.verifier",
                alg = %alg,
                "Token rejected: unsupported algorithm"
            );
            return Err(VerificationError::UnsupportedAlgorithm(alg));
        }

        let key = self.current_key();
        let data = decode::<Map<String, Value>>(token, &key, &self.validation).map_err(|e| {
            tracing::debug!(target: "keygate.auth.verifier", error = %e, "Token verification failed");
            match e.kind() {
                ErrorKind::InvalidSignature => VerificationError::InvalidSignature,
                ErrorKind::InvalidAlgorithm => {
                    VerificationError::UnsupportedAlgorithm(alg.clone())
                }
                ErrorKind::Json(_) => VerificationError::MalformedClaims("claims are not an object"),
                _ => VerificationError::Malformed,
            }
        })?;

        let expires_at = extract_expiry(&data.claims)?;
        let scopes = extract_scopes(&data.claims)?;

        Ok(VerifiedToken { scopes, expires_at })
    }
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("algorithm", &EXPECTED_ALGORITHM)
            .finish_non_exhaustive()
    }
}

fn parse_public_key(pem: &str) -> Result<DecodingKey, VerificationError> {
    ensure_p384_spki(pem).inspect_err(|e| {
        tracing::warn!(target: "keygate.auth.verifier", error = %e, "Rejected verification key");
    })?;

    DecodingKey::from_ec_pem(pem.as_bytes()).map_err(|e| {
        tracing::warn!(target: "keygate.auth.verifier", error = %e, "Rejected verification key");
        VerificationError::InvalidKey(e.to_string())
    })
}

/// Any EC curve parses as a `DecodingKey`, so the curve is checked up front.
/// The SPKI of a P-384 key is short enough for a two-byte outer header.
fn ensure_p384_spki(pem: &str) -> Result<(), VerificationError> {
    let body: String = pem
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("-----"))
        .collect();
    let der = STANDARD
        .decode(body)
        .map_err(|e| VerificationError::InvalidKey(format!("invalid PEM body: {e}")))?;

    if der.get(2..2 + P384_ALGORITHM_ID.len()) == Some(&P384_ALGORITHM_ID[..]) {
        Ok(())
    } else {
        Err(VerificationError::InvalidKey(
            "not a P-384 (secp384r1) public key".to_string(),
        ))
    }
}

/// `exp` may be encoded as an integer or a float; fractions are truncated.
#[allow(clippy::cast_possible_truncation)]
fn extract_expiry(claims: &Map<String, Value>) -> Result<i64, VerificationError> {
    let exp = claims
        .get("exp")
        .ok_or(VerificationError::MalformedClaims("missing exp"))?;

    if let Some(seconds) = exp.as_i64() {
        return Ok(seconds);
    }

    exp.as_f64()
        .filter(|seconds| seconds.is_finite())
        .map(|seconds| seconds as i64)
        .ok_or(VerificationError::MalformedClaims("exp is not a number"))
}

fn extract_scopes(claims: &Map<String, Value>) -> Result<Vec<String>, VerificationError> {
    let scope = claims
        .get("scope")
        .ok_or(VerificationError::MalformedClaims("missing scope"))?;

    let entries = scope
        .as_array()
        .ok_or(VerificationError::MalformedClaims("scope is not a list"))?;

    entries
        .iter()
        .map(|entry| {
            entry
                .as_str()
                .map(ToString::to_string)
                .ok_or(VerificationError::MalformedClaims("scope entry is not a string"))
        })
        .collect()
}
