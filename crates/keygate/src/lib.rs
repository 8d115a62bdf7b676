//! Keygate Library
//!
//! Keygate is a Redis-protocol (RESP) gateway that puts JWT authorization in
//! front of a key-value backend:
//!
//! - Clients present an ES384-signed token with `AUTH <token>`
//! - The token must carry the scope `<org>.<ns>` or `<org>.<ns>.write`
//!   (optionally prefixed with `user:memberof:`)
//! - A successful `AUTH` binds the token to the connection
//! - Configured commands (default: `SET`) require a bound, still-valid token
//!
//! # Architecture
//!
//! ```text
//! GatewayServer (TCP accept loop)
//! └── connection task (one per client, RespCodec framing)
//!     └── CommandAuthorizationGate
//!         ├── ConnectionCredentialRegistry  (connection -> token)
//!         ├── TokenValidator
//!         │   ├── TokenVerifier             (ES384 signature, exp, scope)
//!         │   └── ValidationCache           (bounded LRU with per-entry TTL)
//!         └── Backend                       (MemoryStore or RedisStore)
//! ```
//!
//! # Modules
//!
//! - [`auth`] - token verification, scope matching, caching and validation
//! - [`config`] - service configuration from environment
//! - [`errors`] - error types and their RESP replies
//! - [`gate`] - command dispatch and authorization
//! - [`protocol`] - RESP codec and replies
//! - [`registry`] - per-connection credential bindings
//! - [`server`] - TCP listener and connection tasks
//! - [`store`] - storage backends

pub mod auth;
pub mod config;
pub mod errors;
pub mod gate;
pub mod observability;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod store;
