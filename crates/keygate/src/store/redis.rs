//! Redis-backed store.
//!
//! Uses a redis-rs `MultiplexedConnection`, which is cheap to clone and safe to
//! use concurrently: each operation clones it instead of locking.
//!
//! The connection URL may embed a password (`redis://:password@host:port`) and
//! is never logged.

use super::{Backend, StoreError};
use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use tracing::{error, instrument, warn};

#[derive(Clone)]
pub struct RedisStore {
    connection: MultiplexedConnection,
}

impl RedisStore {
    /// Connect to the Redis server at `redis_url`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the URL is invalid or the server
    /// cannot be reached.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url).map_err(|e| {
            error!(target: "keygate.store.redis", error = %e, "Failed to open Redis client");
            StoreError::Unavailable(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(target: "keygate.store.redis", error = %e, "Failed to connect to Redis");
                StoreError::Unavailable(format!("Failed to connect to Redis: {e}"))
            })?;

        Ok(Self { connection })
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

fn map_redis_error(operation: &'static str, e: &redis::RedisError) -> StoreError {
    warn!(
        target: "keygate.store.redis",
        operation,
        error = %e,
        "Redis operation failed"
    );
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
        StoreError::Unavailable(format!("{operation}: {e}"))
    } else {
        StoreError::Operation(format!("{operation}: {e}"))
    }
}

#[async_trait]
impl Backend for RedisStore {
    #[instrument(skip_all, fields(key_len = key.len()))]
    async fn read(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError> {
        let mut conn = self.connection.clone();
        let value: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| map_redis_error("GET", &e))?;
        Ok(value.map(Bytes::from))
    }

    #[instrument(skip_all, fields(key_len = key.len(), value_len = value.len()))]
    async fn write(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        conn.set::<_, _, ()>(key, value)
            .await
            .map_err(|e| map_redis_error("SET", &e))
    }
}
