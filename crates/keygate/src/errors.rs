//! Keygate error types.
//!
//! Every command-level error maps to a RESP error reply via
//! [`GatewayError::client_message`]. Messages returned to clients are
//! deliberately short; backend details are logged server-side and never sent
//! over the wire. Command errors never close the connection.

use crate::auth::{CacheError, VerificationError};
use crate::config::ConfigError;
use crate::store::StoreError;
use thiserror::Error;

/// Authentication/authorization failure produced by the token validator.
///
/// The display strings are client-safe; the underlying verification cause
/// (bad signature, malformed claims, ...) is only logged at debug level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Signature, header or claims did not verify.
    #[error("invalid JWT token")]
    InvalidToken,

    /// The token's own `exp` claim is in the past.
    #[error("expired JWT token")]
    ExpiredToken,

    /// The token verified but grants neither required scope.
    #[error("user does not have the right scope")]
    InsufficientScope,

    /// The cached validation outlived its TTL during a liveness check.
    #[error("expired JWT token")]
    ExpiredCacheEntry,
}

/// Keygate command error type.
///
/// Maps to RESP error replies:
/// - `ArgumentCount`: `ERR wrong number of arguments for '<name>' command`
/// - `UnknownCommand`: `ERR unknown command '<name>'`
/// - `Auth`: `ERR invalid JWT: <reason>`
/// - `NoCredential`: `ERR no JWT found for this connection`
/// - `CredentialInvalid`: `ERR JWT invalid: <reason>`
/// - `Backend`: `ERR backend error`
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Wrong number of arguments for a known command.
    #[error("wrong number of arguments for '{0}' command")]
    ArgumentCount(String),

    /// Command name not recognised.
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// `AUTH` full check failed; nothing was bound.
    #[error("invalid JWT: {0}")]
    Auth(AuthError),

    /// Gated command on a connection without a bound token.
    #[error("no JWT found for this connection")]
    NoCredential,

    /// Gated command whose bound token failed the liveness check.
    #[error("JWT invalid: {0}")]
    CredentialInvalid(AuthError),

    /// Storage collaborator failure.
    #[error("Backend error: {0}")]
    Backend(#[from] StoreError),
}

impl GatewayError {
    /// Returns the RESP error line for this error (without the leading `-`).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            GatewayError::Backend(_) => "ERR backend error".to_string(),
            other => format!("ERR {other}"),
        }
    }

    /// Bounded label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::ArgumentCount(_) => "argument_count",
            GatewayError::UnknownCommand(_) => "unknown_command",
            GatewayError::Auth(_) => "auth",
            GatewayError::NoCredential => "no_credential",
            GatewayError::CredentialInvalid(_) => "credential_invalid",
            GatewayError::Backend(_) => "backend",
        }
    }
}

/// Fatal errors raised while assembling the gateway at startup.
///
/// These abort the process; none of them can occur once the server is running.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid verification key: {0}")]
    VerificationKey(#[from] VerificationError),

    #[error("Token cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Backend error: {0}")]
    Backend(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metrics error: {0}")]
    Metrics(String),
}
