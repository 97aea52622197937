//! Host cache
//!
//! Caches netloc-to-alias lookups, including negative results. Entries never
//! expire; every write to sites or aliases clears the whole cache. The
//! in-memory backend is size-bounded so arbitrary Host headers cannot grow
//! it without limit.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use async_trait::async_trait;
use lru::LruCache;
use multisite_shared::Alias;
use redis::{aio::ConnectionManager, AsyncCommands};
use sha2::{Digest, Sha256};

use crate::error::{MultisiteError, MultisiteResult};

/// Cache key for a lowercase netloc
///
/// Hashed so arbitrary host headers stay within backend key limits.
pub fn cache_key(prefix: &str, netloc: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("multisite.alias.{prefix}.{netloc}").as_bytes());
    hex::encode(hasher.finalize())
}

/// Backend storing resolved aliases by cache key
#[async_trait]
pub trait HostCache: Send + Sync {
    /// Returns Some(Some(alias)) for a cached match,
    /// Some(None) for a cached "no match",
    /// None when the key is not cached
    async fn get(&self, key: &str) -> MultisiteResult<Option<Option<Alias>>>;

    async fn set(&self, key: &str, alias: Option<&Alias>) -> MultisiteResult<()>;

    async fn delete(&self, key: &str) -> MultisiteResult<()>;

    async fn clear(&self) -> MultisiteResult<()>;
}

// =============================================================================
// In-memory
// =============================================================================

/// Entries kept by `DomainCache::new`
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Thread-safe in-memory host cache
///
/// Holds at most `capacity` entries; the least recently used one is evicted
/// first.
pub struct DomainCache {
    /// Maps cache key -> alias (None means the host matched no alias)
    cache: Mutex<LruCache<String, Option<Alias>>>,
}

impl DomainCache {
    pub fn new() -> Self {
        Self::with_capacity(NonZeroUsize::new(DEFAULT_CAPACITY).unwrap_or(NonZeroUsize::MIN))
    }

    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.cache.lock().map(|cache| cache.cap().get()).unwrap_or(0)
    }

    pub fn stats(&self) -> CacheStats {
        if let Ok(cache) = self.cache.lock() {
            let total = cache.len();
            let negative = cache.iter().filter(|(_, e)| e.is_none()).count();
            CacheStats {
                total_entries: total,
                negative_entries: negative,
                positive_entries: total - negative,
            }
        } else {
            CacheStats::default()
        }
    }
}

impl Default for DomainCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostCache for DomainCache {
    async fn get(&self, key: &str) -> MultisiteResult<Option<Option<Alias>>> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| MultisiteError::Cache("domain cache lock poisoned".to_string()))?;
        Ok(cache.get(key).cloned())
    }

    async fn set(&self, key: &str, alias: Option<&Alias>) -> MultisiteResult<()> {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key.to_string(), alias.cloned());
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> MultisiteResult<()> {
        if let Ok(mut cache) = self.cache.lock() {
            cache.pop(key);
        }
        Ok(())
    }

    async fn clear(&self) -> MultisiteResult<()> {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
        Ok(())
    }
}

/// Cache statistics
#[derive(Default, Debug)]
pub struct CacheStats {
    pub total_entries: usize,
    pub negative_entries: usize,
    pub positive_entries: usize,
}

// =============================================================================
// Redis
// =============================================================================

/// Host cache shared between processes through one Redis hash
#[derive(Clone)]
pub struct RedisDomainCache {
    conn: ConnectionManager,
    hash_key: String,
}

impl RedisDomainCache {
    pub async fn connect(url: &str, prefix: &str) -> MultisiteResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| MultisiteError::Cache(format!("Failed to create Redis client: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| MultisiteError::Cache(format!("Failed to connect to Redis: {e}")))?;
        Ok(Self::new(conn, prefix))
    }

    pub fn new(conn: ConnectionManager, prefix: &str) -> Self {
        Self {
            conn,
            hash_key: format!("multisite:{prefix}:aliases"),
        }
    }
}

#[async_trait]
impl HostCache for RedisDomainCache {
    async fn get(&self, key: &str) -> MultisiteResult<Option<Option<Alias>>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.hget(&self.hash_key, key).await?;
        match value {
            Some(v) => {
                let parsed = serde_json::from_str(&v)
                    .map_err(|e| MultisiteError::Cache(format!("Cache deserialize error: {e}")))?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, alias: Option<&Alias>) -> MultisiteResult<()> {
        let mut conn = self.conn.clone();
        let serialized = serde_json::to_string(&alias)
            .map_err(|e| MultisiteError::Cache(format!("Cache serialize error: {e}")))?;
        let _: () = conn.hset(&self.hash_key, key, serialized).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> MultisiteResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.hdel(&self.hash_key, key).await?;
        Ok(())
    }

    async fn clear(&self) -> MultisiteResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(&self.hash_key).await?;
        Ok(())
    }
}

// =============================================================================
// Disabled
// =============================================================================

/// Caches nothing; every lookup goes to the store
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

#[async_trait]
impl HostCache for NoopCache {
    async fn get(&self, _key: &str) -> MultisiteResult<Option<Option<Alias>>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _alias: Option<&Alias>) -> MultisiteResult<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> MultisiteResult<()> {
        Ok(())
    }

    async fn clear(&self) -> MultisiteResult<()> {
        Ok(())
    }
}
