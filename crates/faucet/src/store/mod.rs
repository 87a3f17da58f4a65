//! Key-value store backends.
//!
//! Every record the faucet keeps (cooldown stamps, claim counters, probe keys)
//! is a plain string value in a TTL-capable key-value store. The store is
//! injected into the service as an `Arc<dyn KvStore>`, so request handlers
//! share one connection owner instead of a process-global handle.
//!
//! ## Backends
//!
//! - **redis** - shared Redis instance, required when several faucet
//!   processes run behind a load balancer
//! - **memory** - in-process cache for a single instance or local development
//!
//! ## Key Patterns
//!
//! ```text
//! {prefix}:ip:{ip}            → unix seconds of last claim (expires after cooldown)
//! {prefix}:addr:{address}     → unix seconds of last claim (expires after cooldown)
//! {prefix}:totalClaims        → integer counter
//! {prefix}:dailyClaims        → integer counter
//! {prefix}:lastReset          → unix seconds of last daily reset
//! health:test:{unix_millis}   → "ok" (30 s)
//! debug:test                  → probe value (60 s)
//! ```

mod memory;
mod redis_store;

#[cfg(test)]
pub(crate) mod faulty;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Command failed: {0}")]
    Command(String),

    #[error("Value at {key} is not an integer: {value}")]
    NotAnInteger { key: String, value: String },

    #[error("Unsupported store URL: {0}")]
    UnsupportedUrl(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Minimal TTL-capable key-value interface.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Current value, `None` when absent or expired.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Overwrite `key`. `Some(ttl)` sets an expiry, `None` persists the key.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Atomically create `key` with an expiry. Returns `false` when the key
    /// already exists, leaving it untouched.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// Atomically increment an integer value. A missing key counts as zero
    /// and an existing expiry is preserved.
    async fn incr(&self, key: &str) -> StoreResult<i64>;

    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Round trip to the backend.
    async fn ping(&self) -> StoreResult<()>;

    /// Backend name for logs and health output.
    fn backend(&self) -> &'static str;
}

/// Open the store described by `url`.
///
/// `memory://` selects the in-process backend; `redis://` and `rediss://`
/// connect to Redis.
pub async fn connect(url: &str) -> StoreResult<Arc<dyn KvStore>> {
    if url.starts_with("memory://") {
        return Ok(Arc::new(MemoryStore::new()));
    }
    if url.starts_with("redis://") || url.starts_with("rediss://") {
        let store = RedisStore::connect(url).await?;
        return Ok(Arc::new(store));
    }
    // Only the scheme is reported; the rest may carry credentials.
    let scheme = url.split("://").next().unwrap_or_default();
    Err(StoreError::UnsupportedUrl(scheme.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_memory_url() {
        let store = connect("memory://").await.unwrap();
        assert_eq!(store.backend(), "memory");
        store.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_rejects_unknown_scheme() {
        let err = connect("postgres://localhost/faucet").await.err().unwrap();
        assert!(matches!(err, StoreError::UnsupportedUrl(ref scheme) if scheme == "postgres"));
    }
}
