//! Keygate configuration.
//!
//! Configuration is loaded from environment variables. The backend URL may
//! carry a password and is redacted in Debug output.

use crate::auth::scopes::ScopeTarget;
use common::secret::SecretString;
use std::collections::{HashMap, HashSet};
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default RESP listener address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:6379";

/// Commands that require a bound token when `KEYGATE_AUTH_COMMANDS` is unset.
pub const DEFAULT_AUTH_COMMANDS: &[&str] = &["SET"];

/// Default number of cached token decisions.
pub const DEFAULT_TOKEN_CACHE_CAPACITY: usize = 4096;

/// Default retention of invalid/expired token decisions (24 hours).
pub const DEFAULT_NEGATIVE_CACHE_TTL_SECONDS: u64 = 86_400;

/// Commands that are never gated, whatever the configuration says.
const NEVER_GATED: &[&str] = &["AUTH", "QUIT"];

#[derive(Clone)]
pub struct Config {
    /// RESP listener address (default: "0.0.0.0:6379").
    pub bind_address: String,

    /// Organization component of the required scope.
    pub jwt_organization: String,

    /// Namespace component of the required scope.
    pub jwt_namespace: String,

    /// PEM-encoded P-384 public key used to verify tokens.
    pub jwt_public_key_pem: String,

    /// Upper-cased names of commands that need a bound, live token.
    pub auth_commands: HashSet<String>,

    /// Maximum number of cached token decisions (> 0).
    pub token_cache_capacity: usize,

    /// How long invalid or expired tokens stay cached.
    pub negative_cache_ttl: Duration,

    /// Redis URL for the storage backend. In-memory storage when unset.
    /// Protected by `SecretString` to prevent accidental logging.
    pub backend_url: Option<SecretString>,

    /// Prometheus listener. Metrics are disabled when unset.
    pub metrics_bind_address: Option<String>,

    /// Emit JSON logs instead of human-readable ones.
    pub log_json: bool,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut auth_commands: Vec<_> = self.auth_commands.iter().collect();
        auth_commands.sort();

        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("jwt_organization", &self.jwt_organization)
            .field("jwt_namespace", &self.jwt_namespace)
            .field("jwt_public_key_pem", &format!("<{} bytes>", self.jwt_public_key_pem.len()))
            .field("auth_commands", &auth_commands)
            .field("token_cache_capacity", &self.token_cache_capacity)
            .field("negative_cache_ttl", &self.negative_cache_ttl)
            .field("backend_url", &self.backend_url.as_ref().map(|_| "[REDACTED]"))
            .field("metrics_bind_address", &self.metrics_bind_address)
            .field("log_json", &self.log_json)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Failed to read public key file {path}: {source}")]
    PublicKeyFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// See [`Config::from_vars`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing, a numeric
    /// value does not parse or is zero, or the public key file is unreadable.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let jwt_organization = required(vars, "KEYGATE_JWT_ORGANIZATION")?;
        let jwt_namespace = required(vars, "KEYGATE_JWT_NAMESPACE")?;
        let jwt_public_key_pem = load_public_key(vars)?;

        let bind_address = vars
            .get("KEYGATE_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let auth_commands = vars
            .get("KEYGATE_AUTH_COMMANDS")
            .map_or_else(default_auth_commands, |raw| parse_auth_commands(raw));

        let token_cache_capacity = parse_positive(
            vars,
            "KEYGATE_TOKEN_CACHE_CAPACITY",
            DEFAULT_TOKEN_CACHE_CAPACITY,
        )?;

        let negative_cache_ttl = Duration::from_secs(parse_positive(
            vars,
            "KEYGATE_NEGATIVE_CACHE_TTL_SECONDS",
            DEFAULT_NEGATIVE_CACHE_TTL_SECONDS,
        )?);

        let backend_url = vars
            .get("KEYGATE_BACKEND_URL")
            .filter(|url| !url.trim().is_empty())
            .map(|url| SecretString::from(url.clone()));

        let metrics_bind_address = vars
            .get("KEYGATE_METRICS_BIND_ADDRESS")
            .filter(|addr| !addr.trim().is_empty())
            .cloned();

        let log_json = vars
            .get("KEYGATE_LOG_JSON")
            .is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1");

        Ok(Config {
            bind_address,
            jwt_organization,
            jwt_namespace,
            jwt_public_key_pem,
            auth_commands,
            token_cache_capacity,
            negative_cache_ttl,
            backend_url,
            metrics_bind_address,
            log_json,
        })
    }

    /// The scope target tokens are checked against.
    #[must_use]
    pub fn scope_target(&self) -> ScopeTarget {
        ScopeTarget::new(&self.jwt_organization, &self.jwt_namespace)
    }
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    vars.get(name)
        .filter(|value| !value.trim().is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

/// Inline PEM wins over the path. Literal `\n` sequences in the inline value
/// are turned into newlines so the key fits in a single env var.
fn load_public_key(vars: &HashMap<String, String>) -> Result<String, ConfigError> {
    if let Some(pem) = vars
        .get("KEYGATE_JWT_PUBLIC_KEY")
        .filter(|v| !v.trim().is_empty())
    {
        return Ok(pem.replace("\\n", "\n"));
    }

    let path = vars
        .get("KEYGATE_JWT_PUBLIC_KEY_PATH")
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar("KEYGATE_JWT_PUBLIC_KEY".to_string()))?;

    tracing::debug!(target: "keygate.config", path = %path, "Loading public key from file");
    std::fs::read_to_string(path).map_err(|source| ConfigError::PublicKeyFile {
        path: path.clone(),
        source,
    })
}

fn parse_positive<T>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let Some(raw) = vars.get(name) else {
        return Ok(default);
    };

    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => Ok(value),
        _ => Err(ConfigError::InvalidValue(format!(
            "{name} must be a positive integer, got '{raw}'"
        ))),
    }
}

fn default_auth_commands() -> HashSet<String> {
    DEFAULT_AUTH_COMMANDS.iter().map(ToString::to_string).collect()
}

/// Parse a comma-separated command list: trimmed, upper-cased, empty items
/// dropped. `AUTH` and `QUIT` are removed. An empty list falls back to the
/// default.
#[must_use]
pub fn parse_auth_commands(raw: &str) -> HashSet<String> {
    let commands: HashSet<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_ascii_uppercase)
        .filter(|name| {
            let ungatable = NEVER_GATED.contains(&name.as_str());
            if ungatable {
                tracing::warn!(target: "keygate.config", command = %name, "Command cannot be gated, ignoring");
            }
            !ungatable
        })
        .collect();

    if commands.is_empty() {
        default_auth_commands()
    } else {
        commands
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::ExposeSecret;

    const PEM: &str = "-----BEGIN PUBLIC KEY-----\nMHYw\n-----END PUBLIC KEY-----\n";

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            ("KEYGATE_JWT_ORGANIZATION".to_string(), "acme".to_string()),
            ("KEYGATE_JWT_NAMESPACE".to_string(), "vault".to_string()),
            ("KEYGATE_JWT_PUBLIC_KEY".to_string(), PEM.to_string()),
        ])
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::from_vars(&base_vars()).unwrap();

        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.jwt_organization, "acme");
        assert_eq!(config.jwt_namespace, "vault");
        assert_eq!(config.jwt_public_key_pem, PEM);
        assert_eq!(config.auth_commands, HashSet::from(["SET".to_string()]));
        assert_eq!(config.token_cache_capacity, 4096);
        assert_eq!(config.negative_cache_ttl, Duration::from_secs(86_400));
        assert!(config.backend_url.is_none());
        assert!(config.metrics_bind_address.is_none());
        assert!(!config.log_json);
        assert_eq!(config.scope_target(), ScopeTarget::new("acme", "vault"));
    }

    #[test]
    fn test_config_missing_required() {
        for name in [
            "KEYGATE_JWT_ORGANIZATION",
            "KEYGATE_JWT_NAMESPACE",
            "KEYGATE_JWT_PUBLIC_KEY",
        ] {
            let mut vars = base_vars();
            vars.remove(name);
            let err = Config::from_vars(&vars).unwrap_err();
            assert!(
                matches!(&err, ConfigError::MissingEnvVar(v) if v == name),
                "{name}: {err}"
            );
        }
    }

    #[test]
    fn test_config_custom_values() {
        let mut vars = base_vars();
        vars.insert("KEYGATE_BIND_ADDRESS".to_string(), "127.0.0.1:7000".to_string());
        vars.insert("KEYGATE_AUTH_COMMANDS".to_string(), "set, get".to_string());
        vars.insert("KEYGATE_TOKEN_CACHE_CAPACITY".to_string(), "16".to_string());
        vars.insert("KEYGATE_NEGATIVE_CACHE_TTL_SECONDS".to_string(), "60".to_string());
        vars.insert("KEYGATE_BACKEND_URL".to_string(), "redis://:pw@localhost:6380".to_string());
        vars.insert("KEYGATE_METRICS_BIND_ADDRESS".to_string(), "127.0.0.1:9090".to_string());
        vars.insert("KEYGATE_LOG_JSON".to_string(), "TRUE".to_string());

        let config = Config::from_vars(&vars).unwrap();

        assert_eq!(config.bind_address, "127.0.0.1:7000");
        assert_eq!(
            config.auth_commands,
            HashSet::from(["SET".to_string(), "GET".to_string()])
        );
        assert_eq!(config.token_cache_capacity, 16);
        assert_eq!(config.negative_cache_ttl, Duration::from_secs(60));
        assert_eq!(
            config.backend_url.as_ref().unwrap().expose_secret(),
            "redis://:pw@localhost:6380"
        );
        assert_eq!(config.metrics_bind_address.as_deref(), Some("127.0.0.1:9090"));
        assert!(config.log_json);
    }

    #[test]
    fn test_config_rejects_zero_and_garbage_numbers() {
        for (name, value) in [
            ("KEYGATE_TOKEN_CACHE_CAPACITY", "0"),
            ("KEYGATE_TOKEN_CACHE_CAPACITY", "lots"),
            ("KEYGATE_NEGATIVE_CACHE_TTL_SECONDS", "0"),
            ("KEYGATE_NEGATIVE_CACHE_TTL_SECONDS", "-5"),
        ] {
            let mut vars = base_vars();
            vars.insert(name.to_string(), value.to_string());
            assert!(
                matches!(Config::from_vars(&vars), Err(ConfigError::InvalidValue(_))),
                "{name}={value}"
            );
        }
    }

    #[test]
    fn test_config_inline_pem_escaped_newlines() {
        let mut vars = base_vars();
        vars.insert(
            "KEYGATE_JWT_PUBLIC_KEY".to_string(),
            "-----BEGIN PUBLIC KEY-----\\nMHYw\\n-----END PUBLIC KEY-----\\n".to_string(),
        );

        let config = Config::from_vars(&vars).unwrap();

        assert_eq!(config.jwt_public_key_pem, PEM);
    }

    #[test]
    fn test_config_public_key_from_file() {
        let path = std::env::temp_dir().join(format!("keygate-config-{}.pem", std::process::id()));
        std::fs::write(&path, PEM).unwrap();

        let mut vars = base_vars();
        vars.remove("KEYGATE_JWT_PUBLIC_KEY");
        vars.insert(
            "KEYGATE_JWT_PUBLIC_KEY_PATH".to_string(),
            path.to_string_lossy().into_owned(),
        );

        let config = Config::from_vars(&vars).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.jwt_public_key_pem, PEM);
    }

    #[test]
    fn test_config_unreadable_public_key_file() {
        let mut vars = base_vars();
        vars.remove("KEYGATE_JWT_PUBLIC_KEY");
        vars.insert(
            "KEYGATE_JWT_PUBLIC_KEY_PATH".to_string(),
            "/nonexistent/keygate/key.pem".to_string(),
        );

        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::PublicKeyFile { .. })
        ));
    }

    #[test]
    fn test_parse_auth_commands() {
        assert_eq!(
            parse_auth_commands(" set ,Get,,"),
            HashSet::from(["SET".to_string(), "GET".to_string()])
        );
        assert_eq!(parse_auth_commands(""), HashSet::from(["SET".to_string()]));
        assert_eq!(
            parse_auth_commands("auth,quit,ping"),
            HashSet::from(["PING".to_string()])
        );
        assert_eq!(parse_auth_commands("AUTH"), HashSet::from(["SET".to_string()]));
    }

    #[test]
    fn test_debug_redacts_backend_url() {
        let mut vars = base_vars();
        vars.insert(
            "KEYGATE_BACKEND_URL".to_string(),
            "redis://:hunter2@localhost:6379".to_string(),
        );
        let config = Config::from_vars(&vars).unwrap();

        let debug = format!("{config:?}");

        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("acme"));
    }
}
