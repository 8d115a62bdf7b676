//! Common utilities and types shared across Keygate crates.

#![warn(clippy::pedantic)]

/// Module for identifiers and credential wrappers
pub mod types;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT header utilities (size limits, algorithm inspection)
pub mod jwt;
