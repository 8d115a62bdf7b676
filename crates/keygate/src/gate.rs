//! Command dispatch and authorization.
//!
//! [`CommandAuthorizationGate`] turns one decoded request into one reply:
//!
//! 1. Parse the command name (case-insensitive) and check its arity.
//! 2. If the command is gated, require a token bound to the connection and
//!    run the liveness check on it.
//! 3. Execute: `PING`, `QUIT`, `AUTH`, `SET`, `GET`.
//!
//! `AUTH` and `QUIT` are never gated. Errors become error replies and never
//! close the connection; only `QUIT` does.

use crate::auth::{ScopeTarget, TokenValidator, TokenVerifier, ValidationCache};
use crate::config::Config;
use crate::errors::{GatewayError, StartupError};
use crate::observability::metrics;
use crate::protocol::Reply;
use crate::registry::ConnectionCredentialRegistry;
use crate::store::Backend;
use bytes::Bytes;
use common::types::{BearerToken, ConnectionId};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// A parsed, arity-checked request.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Ping,
    Quit,
    Auth(BearerToken),
    Set { key: Bytes, value: Bytes },
    Get { key: Bytes },
}

impl Command {
    fn parse(args: &[Bytes]) -> Result<Self, GatewayError> {
        let (name, rest) = args
            .split_first()
            .ok_or_else(|| GatewayError::UnknownCommand(String::new()))?;
        let raw_name = String::from_utf8_lossy(name);
        let wrong_arity = || GatewayError::ArgumentCount(raw_name.to_string());

        match raw_name.to_ascii_uppercase().as_str() {
            "PING" => match rest {
                [] => Ok(Command::Ping),
                _ => Err(wrong_arity()),
            },
            "QUIT" => match rest {
                [] => Ok(Command::Quit),
                _ => Err(wrong_arity()),
            },
            "AUTH" => match rest {
                [token] => Ok(Command::Auth(BearerToken::new(
                    String::from_utf8_lossy(token).into_owned(),
                ))),
                _ => Err(wrong_arity()),
            },
            "SET" => match rest {
                [key, value] => Ok(Command::Set {
                    key: key.clone(),
                    value: value.clone(),
                }),
                _ => Err(wrong_arity()),
            },
            "GET" => match rest {
                [key] => Ok(Command::Get { key: key.clone() }),
                _ => Err(wrong_arity()),
            },
            _ => Err(GatewayError::UnknownCommand(raw_name.to_string())),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Command::Ping => "PING",
            Command::Quit => "QUIT",
            Command::Auth(_) => "AUTH",
            Command::Set { .. } => "SET",
            Command::Get { .. } => "GET",
        }
    }
}

/// Reply to send and whether to close the connection afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateResponse {
    pub reply: Reply,
    pub close: bool,
}

impl GateResponse {
    fn reply(reply: Reply) -> Self {
        Self {
            reply,
            close: false,
        }
    }
}

pub struct CommandAuthorizationGate {
    validator: Arc<TokenValidator>,
    registry: Arc<ConnectionCredentialRegistry>,
    backend: Arc<dyn Backend>,
    target: ScopeTarget,
    gated_commands: HashSet<String>,
}

impl CommandAuthorizationGate {
    /// `gated_commands` are matched case-insensitively; `AUTH` and `QUIT` are
    /// ignored if present.
    #[must_use]
    pub fn new(
        validator: Arc<TokenValidator>,
        registry: Arc<ConnectionCredentialRegistry>,
        backend: Arc<dyn Backend>,
        target: ScopeTarget,
        gated_commands: impl IntoIterator<Item = String>,
    ) -> Self {
        let gated_commands = gated_commands
            .into_iter()
            .map(|name| name.to_ascii_uppercase())
            .filter(|name| name != "AUTH" && name != "QUIT")
            .collect();

        Self {
            validator,
            registry,
            backend,
            target,
            gated_commands,
        }
    }

    /// Assemble verifier, cache, validator and registry from configuration.
    ///
    /// # Errors
    ///
    /// Returns `StartupError` if the public key is invalid or the cache
    /// capacity is zero.
    pub fn from_config(config: &Config, backend: Arc<dyn Backend>) -> Result<Self, StartupError> {
        let verifier = Arc::new(TokenVerifier::from_pem(&config.jwt_public_key_pem)?);
        let cache = Arc::new(ValidationCache::new(config.token_cache_capacity)?);
        let validator = Arc::new(TokenValidator::new(
            verifier,
            cache,
            config.negative_cache_ttl,
        ));

        Ok(Self::new(
            validator,
            Arc::new(ConnectionCredentialRegistry::new()),
            backend,
            config.scope_target(),
            config.auth_commands.iter().cloned(),
        ))
    }

    #[must_use]
    pub fn validator(&self) -> &TokenValidator {
        &self.validator
    }

    #[must_use]
    pub fn registry(&self) -> &ConnectionCredentialRegistry {
        &self.registry
    }

    #[must_use]
    pub fn is_gated(&self, command: &str) -> bool {
        self.gated_commands.contains(&command.to_ascii_uppercase())
    }

    /// Handle one request from `connection`.
    #[instrument(skip_all, fields(connection_id = %connection))]
    pub async fn handle(&self, connection: ConnectionId, args: &[Bytes]) -> GateResponse {
        let started = Instant::now();
        let name = args
            .first()
            .map(|n| String::from_utf8_lossy(n).into_owned())
            .unwrap_or_default();

        match self.dispatch(connection, args).await {
            Ok(response) => {
                metrics::record_command(&name, "ok", started.elapsed());
                response
            }
            Err(e) => {
                match &e {
                    GatewayError::Backend(_) => {
                        tracing::warn!(target: "keygate.gate", command = %name, error = %e, "Backend request failed");
                    }
                    _ => {
                        tracing::debug!(target: "keygate.gate", command = %name, error = %e, "Command rejected");
                    }
                }
                metrics::record_command(&name, e.kind(), started.elapsed());
                GateResponse::reply(Reply::from(&e))
            }
        }
    }

    async fn dispatch(
        &self,
        connection: ConnectionId,
        args: &[Bytes],
    ) -> Result<GateResponse, GatewayError> {
        let command = Command::parse(args)?;

        if self.gated_commands.contains(command.name()) {
            self.authorize(connection)?;
        }

        match command {
            Command::Ping => Ok(GateResponse::reply(Reply::pong())),
            Command::Quit => {
                self.registry.unbind(connection);
                Ok(GateResponse {
                    reply: Reply::ok(),
                    close: true,
                })
            }
            Command::Auth(token) => {
                self.authenticate(connection, token)?;
                Ok(GateResponse::reply(Reply::ok()))
            }
            Command::Set { key, value } => {
                self.backend.write(&key, &value).await?;
                Ok(GateResponse::reply(Reply::ok()))
            }
            Command::Get { key } => {
                let reply = match self.backend.read(&key).await? {
                    Some(value) => Reply::Bulk(value),
                    None => Reply::Null,
                };
                Ok(GateResponse::reply(reply))
            }
        }
    }

    /// Full check, then bind on success. A failed `AUTH` leaves any previous
    /// binding in place.
    fn authenticate(&self, connection: ConnectionId, token: BearerToken) -> Result<(), GatewayError> {
        self.validator
            .full_check(&token, self.target.organization(), self.target.namespace())
            .map_err(GatewayError::Auth)?;

        self.registry.bind(connection, token);
        tracing::info!(target: "keygate.gate", connection_id = %connection, "Connection authenticated");
        Ok(())
    }

    fn authorize(&self, connection: ConnectionId) -> Result<(), GatewayError> {
        let token = self
            .registry
            .lookup(connection)
            .ok_or(GatewayError::NoCredential)?;

        self.validator
            .liveness_check(&token)
            .map_err(GatewayError::CredentialInvalid)
    }

    /// Forget any credential bound to `connection`.
    pub fn disconnect(&self, connection: ConnectionId) {
        self.registry.unbind(connection);
    }
}

impl std::fmt::Debug for CommandAuthorizationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut gated: Vec<_> = self.gated_commands.iter().collect();
        gated.sort();
        f.debug_struct("CommandAuthorizationGate")
            .field("target", &self.target.to_string())
            .field("gated_commands", &gated)
            .finish_non_exhaustive()
    }
}
