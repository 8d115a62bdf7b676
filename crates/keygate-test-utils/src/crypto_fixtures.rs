//! ES384 key fixtures for testing
//!
//! P-384 keys cannot be derived from a short seed the way Ed25519 keys can, so
//! every fixture key is freshly generated. Tests that need two distinct keys
//! (e.g. a forged signature) simply generate two.

use base64::engine::general_purpose;
use base64::Engine;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING, ECDSA_P384_SHA384_FIXED_SIGNING,
};
use thiserror::Error;

/// DER prefix of a SubjectPublicKeyInfo for an uncompressed P-384 point:
///
/// ```text
/// SEQUENCE {
///   SEQUENCE { OID ecPublicKey, OID secp384r1 }
///   BIT STRING (0 unused bits) <97-byte point>
/// }
/// ```
const P384_SPKI_PREFIX: [u8; 23] = [
    0x30, 0x76, 0x30, 0x10, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x05,
    0x2b, 0x81, 0x04, 0x00, 0x22, 0x03, 0x62, 0x00,
];

/// Same as [`P384_SPKI_PREFIX`] for a P-256 point (OID prime256v1, 65 bytes).
const P256_SPKI_PREFIX: [u8; 26] = [
    0x30, 0x59, 0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x08,
    0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, 0x03, 0x42, 0x00,
];

/// Test fixture error type
#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    #[error("Token signing failed: {0}")]
    Signing(String),
}

/// An ES384 signing key with its PEM-encoded public half.
///
/// # Example
/// ```rust,ignore
/// let key = TestSigningKey::generate()?;
/// let verifier = TokenVerifier::from_pem(&key.public_key_pem())?;
/// let token = key.sign(&json!({"exp": 4102444800_i64, "scope": ["acme.vault"]}))?;
/// ```
pub struct TestSigningKey {
    pkcs8: Vec<u8>,
    public_key: Vec<u8>,
}

impl TestSigningKey {
    /// Generate a fresh P-384 keypair.
    pub fn generate() -> Result<Self, FixtureError> {
        let rng = SystemRandom::new();
        let document = EcdsaKeyPair::generate_pkcs8(&ECDSA_P384_SHA384_FIXED_SIGNING, &rng)
            .map_err(|e| FixtureError::Crypto(format!("Failed to generate P-384 key: {e:?}")))?;
        let pkcs8 = document.as_ref().to_vec();

        let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P384_SHA384_FIXED_SIGNING, &pkcs8, &rng)
            .map_err(|e| FixtureError::Crypto(format!("Failed to load P-384 key: {e:?}")))?;
        let public_key = key_pair.public_key().as_ref().to_vec();

        Ok(Self { pkcs8, public_key })
    }

    /// Public key as an SPKI PEM document, the format Keygate is configured
    /// with.
    pub fn public_key_pem(&self) -> String {
        spki_pem(&P384_SPKI_PREFIX, &self.public_key)
    }

    /// Sign arbitrary claims as an ES384 JWT.
    pub fn sign(&self, claims: &serde_json::Value) -> Result<String, FixtureError> {
        let key = EncodingKey::from_ec_der(&self.pkcs8);
        encode(&Header::new(Algorithm::ES384), claims, &key)
            .map_err(|e| FixtureError::Signing(e.to_string()))
    }
}

/// A well-formed EC public key on the wrong curve (P-256), for testing that
/// Keygate refuses it.
pub fn p256_public_key_pem() -> Result<String, FixtureError> {
    let rng = SystemRandom::new();
    let document = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
        .map_err(|e| FixtureError::Crypto(format!("Failed to generate P-256 key: {e:?}")))?;
    let key_pair =
        EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, document.as_ref(), &rng)
            .map_err(|e| FixtureError::Crypto(format!("Failed to load P-256 key: {e:?}")))?;

    Ok(spki_pem(&P256_SPKI_PREFIX, key_pair.public_key().as_ref()))
}

fn spki_pem(prefix: &[u8], point: &[u8]) -> String {
    let mut der = prefix.to_vec();
    der.extend_from_slice(point);

    let b64 = general_purpose::STANDARD.encode(der);
    let body: Vec<String> = b64
        .as_bytes()
        .chunks(64)
        .map(|line| String::from_utf8_lossy(line).into_owned())
        .collect();

    format!(
        "-----BEGIN PUBLIC KEY-----\n{}\n-----END PUBLIC KEY-----\n",
        body.join("\n")
    )
}
