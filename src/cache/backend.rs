//! The uniform contract shared by every cache backend.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use super::keys::CacheKey;
use super::value::CacheValue;

/// Failures inside a backend. Reads and writes swallow these; only
/// invalidation reports them so writers can log that staleness is TTL-bounded.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache pool unavailable: {0}")]
    Pool(#[from] deadpool_redis::PoolError),
    #[error("failed to create cache pool: {0}")]
    CreatePool(#[from] deadpool_redis::CreatePoolError),
    #[error("cache command failed: {0}")]
    Command(#[from] redis::RedisError),
    #[error("cache value could not be encoded: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, Serialize)]
pub struct KindStats {
    pub kind: &'static str,
    pub size: usize,
    /// `None` when the backend is not bounded per kind.
    pub capacity: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub backend: &'static str,
    pub connected: bool,
    pub kinds: Vec<KindStats>,
}

impl CacheStats {
    pub fn size_of(&self, kind: &str) -> Option<usize> {
        self.kinds
            .iter()
            .find(|stats| stats.kind == kind)
            .map(|stats| stats.size)
    }
}

/// A cache backend. Implementations must never fail a read or a write:
/// errors degrade to a miss or a no-op.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get(&self, key: &CacheKey) -> Option<CacheValue>;

    async fn set(&self, key: &CacheKey, value: CacheValue, ttl: Duration);

    async fn invalidate_all(&self) -> Result<(), CacheError>;

    async fn stats(&self) -> CacheStats;

    async fn is_connected(&self) -> bool;
}
