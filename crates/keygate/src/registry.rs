//! Per-connection credential registry.
//!
//! Records which bearer token, if any, each live connection has bound with a
//! successful `AUTH`. At most one token per connection; a later successful
//! `AUTH` replaces the earlier one. Entries are removed when the connection
//! closes.

use common::types::{BearerToken, ConnectionId};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
pub struct ConnectionCredentialRegistry {
    bindings: Mutex<HashMap<ConnectionId, BearerToken>>,
}

impl ConnectionCredentialRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, BearerToken>> {
        self.bindings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind `token` to `connection`, replacing any previous binding.
    pub fn bind(&self, connection: ConnectionId, token: BearerToken) {
        let replaced = self.lock().insert(connection, token).is_some();
        tracing::debug!(
            target: "keygate.registry",
            connection_id = %connection,
            replaced,
            "Credential bound"
        );
    }

    #[must_use]
    pub fn lookup(&self, connection: ConnectionId) -> Option<BearerToken> {
        self.lock().get(&connection).cloned()
    }

    /// Drop the binding for `connection`. Unknown connections are ignored.
    pub fn unbind(&self, connection: ConnectionId) {
        if self.lock().remove(&connection).is_some() {
            tracing::debug!(target: "keygate.registry", connection_id = %connection, "Credential unbound");
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_and_lookup() {
        let registry = ConnectionCredentialRegistry::new();
        let conn = ConnectionId::new();

        registry.bind(conn, BearerToken::from("t1"));

        assert_eq!(registry.lookup(conn), Some(BearerToken::from("t1")));
    }

    #[test]
    fn test_rebind_replaces() {
        let registry = ConnectionCredentialRegistry::new();
        let conn = ConnectionId::new();

        registry.bind(conn, BearerToken::from("t1"));
        registry.bind(conn, BearerToken::from("t2"));

        assert_eq!(registry.lookup(conn), Some(BearerToken::from("t2")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_connections_are_isolated() {
        let registry = ConnectionCredentialRegistry::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();

        registry.bind(a, BearerToken::from("t1"));

        assert_eq!(registry.lookup(b), None);
    }

    #[test]
    fn test_unbind() {
        let registry = ConnectionCredentialRegistry::new();
        let conn = ConnectionId::new();

        registry.bind(conn, BearerToken::from("t1"));
        registry.unbind(conn);
        registry.unbind(conn);

        assert_eq!(registry.lookup(conn), None);
        assert!(registry.is_empty());
    }
}
