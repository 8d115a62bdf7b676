//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Keygate uses them
//! for configuration values that may embed credentials, most notably the
//! backend URL (`redis://:password@host:port`).
//!
//! `SecretString` implements `Debug` with redaction, so any struct that
//! derives `Debug` and holds one gets safe logging behavior for free. The
//! value is zeroized on drop.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct BackendSettings {
//!     name: String,
//!     url: SecretString,
//! }
//!
//! let settings = BackendSettings {
//!     name: "primary".to_string(),
//!     url: SecretString::from("redis://:hunter2@localhost:6379"),
//! };
//!
//! // Safe: the URL is redacted
//! println!("{:?}", settings);
//!
//! // Reading the value is an explicit act
//! let url: &str = settings.url.expose_secret();
//! assert!(url.starts_with("redis://"));
//! ```
//!
//! Bearer tokens are deliberately NOT stored as `SecretString`: they are used
//! as cache and registry keys and need `Hash + Eq`. See
//! [`crate::types::BearerToken`] for the redacted key type.

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretString};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("redis://:hunter2@localhost:6379");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("hunter2"));
    }

    #[test]
    fn test_expose_secret_returns_inner_value() {
        let secret = SecretString::from("redis://localhost:6379");
        assert_eq!(secret.expose_secret(), "redis://localhost:6379");
    }

    #[test]
    fn test_struct_with_secret_is_safe() {
        #[allow(dead_code)]
        #[derive(Debug)]
        struct BackendSettings {
            name: String,
            url: SecretString,
        }

        let settings = BackendSettings {
            name: "primary".to_string(),
            url: SecretString::from("redis://:super-secret@db:6379"),
        };

        let debug_str = format!("{settings:?}");

        assert!(debug_str.contains("primary"));
        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("super-secret"));
    }
}
