//! Key-value storage behind the gateway.
//!
//! The gate only needs two operations from its backend: read a key and write
//! a key. [`MemoryStore`] keeps data in process; [`RedisStore`] forwards to a
//! real Redis server.

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Could not reach the backend.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The backend was reached but the operation failed.
    #[error("Backend operation failed: {0}")]
    Operation(String),
}

/// Storage collaborator used by `GET` and `SET`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Value stored under `key`, or `None` if absent.
    async fn read(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn write(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;
}
