//! # Keygate Test Utilities
//!
//! Shared test utilities for Keygate.
//!
//! This crate provides:
//! - ES384 key fixtures (`TestSigningKey`)
//! - Token builders (`TestTokenBuilder`)
//! - Server test harness (`TestGatewayServer`) and a raw RESP client
//!
//! ## Usage
//!
//! ```rust,ignore
//! use keygate_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let key = TestSigningKey::generate()?;
//!     let token = TestTokenBuilder::new()
//!         .with_scope("user:memberof:acme.vault")
//!         .sign(&key)?;
//!
//!     let server = TestGatewayServer::spawn(&key).await?;
//!     let mut client = server.client().await?;
//!     assert_eq!(client.command(&["AUTH", &token]).await?, TestReply::ok());
//!     Ok(())
//! }
//! ```

pub mod crypto_fixtures;
pub mod server_harness;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use server_harness::*;
pub use token_builders::*;
