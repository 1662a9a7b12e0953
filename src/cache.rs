//! # Cache Abstraction
//!
//! This module provides the shared key/value store with TTL that every other
//! component (sessions, rate limits, OTP codes, CSRF tokens) is built on.
//!
//! ## Backends
//!
//! - [`MemoryCache`]: in-process bounded LRU with per-entry TTL, for
//!   single-instance deployments and tests
//! - [`RedisCache`]: the same contract over redis, for multi-instance
//!   deployments
//!
//! The backend is selected by configuration (presence of a redis URL) and the
//! switch is transparent to every caller — see [`connect`].
//!
//! ## Fail-open
//!
//! The redis backend never propagates a connection failure to the caller:
//! reads degrade to a miss, writes to a no-op, and the failure is logged at
//! warn level. Callers must treat cache unavailability as a cache miss. This
//! deliberately trades strict rate-limit and session-revocation enforcement
//! for availability during a cache outage.
//!
//! ## Keys
//!
//! Keys are namespaced strings of the form `kind:discriminator:id`, e.g.
//! `user:session:42` or `otp:code:a@b.com`.

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{Result, config::CacheConfig, error::AuthError};

// ==================== Cache Contract ====================

/// Uniform key/value store with TTL.
///
/// All operations are key-scoped and either atomic (`increment`) or
/// last-writer-wins (`set`), so the store is safe for concurrent access from
/// many request-handling workers.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up a value. A read past the entry's expiry returns `None`,
    /// never stale data.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value. `ttl = None` means the entry does not expire on its
    /// own (it can still be evicted under capacity pressure).
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Remove a key. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Whether a live (non-expired) entry exists for the key.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Atomically add `delta` to an integer counter, creating it at zero
    /// first if absent, and return the new value.
    ///
    /// This is the one primitive where plain read-modify-write is unsafe:
    /// rate limiting depends on two concurrent requests never both observing
    /// the pre-increment count.
    async fn increment(&self, key: &str, delta: i64) -> Result<i64>;

    /// Set or replace the TTL on an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// List live keys matching a glob-style pattern (`*` wildcard).
    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>>;

    /// Remove every entry.
    async fn clear(&self) -> Result<()>;
}

/// Select a backend from configuration.
///
/// A configured redis URL selects [`RedisCache`]; otherwise the in-process
/// [`MemoryCache`] is used. Every component takes the store as
/// `Arc<dyn CacheStore>` at construction, so the choice is invisible above
/// this function.
pub fn connect(config: &CacheConfig) -> Result<Arc<dyn CacheStore>> {
    match &config.redis_url {
        Some(url) => {
            let cache = RedisCache::connect(url)?;
            debug!("cache backend: redis");
            Ok(Arc::new(cache))
        }
        None => {
            debug!(capacity = config.memory_capacity, "cache backend: in-process");
            Ok(Arc::new(MemoryCache::new(config.memory_capacity)))
        }
    }
}

// ==================== Typed Helpers ====================

/// Fetch a JSON-encoded record.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn CacheStore,
    key: &str,
) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Store a record JSON-encoded.
pub async fn set_json<T: Serialize>(
    store: &dyn CacheStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw, ttl).await
}

/// Compute-or-fetch: return the cached value for `key`, or run `producer`,
/// cache its output under `ttl`, and return it.
///
/// This is the explicit replacement for method-level caching decorators: the
/// key, the TTL, and the producer are all spelled out at the call site.
pub async fn get_or_compute<T, F, Fut>(
    store: &dyn CacheStore,
    key: &str,
    ttl: Duration,
    producer: F,
) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if let Some(cached) = get_json(store, key).await? {
        return Ok(cached);
    }

    let value = producer().await?;
    set_json(store, key, &value, Some(ttl)).await?;
    Ok(value)
}

// ==================== In-Process Backend ====================

struct MemoryEntry {
    value: String,
    /// Absolute expiry as a unix timestamp; `None` means no TTL
    expires_at: Option<i64>,
    /// Monotonic recency stamp for LRU eviction
    last_used: u64,
}

impl MemoryEntry {
    fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

struct MemoryCacheInner {
    entries: HashMap<String, MemoryEntry>,
    /// Recency counter, bumped on every touch
    tick: u64,
}

/// Bounded in-process cache with per-entry TTL and LRU eviction.
///
/// Eviction on capacity pressure is least-recently-used, independent of TTL.
/// All operations run inside a single async mutex, which also makes
/// `increment` atomic.
pub struct MemoryCache {
    inner: Mutex<MemoryCacheInner>,
    capacity: usize,
}

impl MemoryCache {
    /// Create a cache bounded to `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(MemoryCacheInner {
                entries: HashMap::new(),
                tick: 0,
            }),
            capacity: capacity.max(1),
        }
    }

    /// Number of live entries (expired entries may still be counted until
    /// their next touch).
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    /// Whether the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.entries.is_empty()
    }
}

impl MemoryCacheInner {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Evict the least-recently-used entry. O(n) scan; capacities here are
    /// thousands of entries, not millions.
    fn evict_lru(&mut self) {
        if let Some(key) = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone())
        {
            self.entries.remove(&key);
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let now = OffsetDateTime::now_utc().unix_timestamp();

        let expired = inner.entries.get(key).map(|entry| entry.is_expired(now));
        match expired {
            Some(true) => {
                inner.entries.remove(key);
                Ok(None)
            }
            Some(false) => {
                inner.tick += 1;
                let tick = inner.tick;
                Ok(inner.entries.get_mut(key).map(|entry| {
                    entry.last_used = tick;
                    entry.value.clone()
                }))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let now = OffsetDateTime::now_utc().unix_timestamp();

        if !inner.entries.contains_key(key) && inner.entries.len() >= self.capacity {
            inner.evict_lru();
        }

        let tick = inner.next_tick();
        inner.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| now + ttl.as_secs() as i64),
                last_used: tick,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.lock().await.entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let now = OffsetDateTime::now_utc().unix_timestamp();

        let expired = inner.entries.get(key).map(|entry| entry.is_expired(now));
        match expired {
            Some(true) => {
                inner.entries.remove(key);
                Ok(false)
            }
            Some(false) => Ok(true),
            None => Ok(false),
        }
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64> {
        let mut inner = self.inner.lock().await;
        let now = OffsetDateTime::now_utc().unix_timestamp();

        // A fresh counter key is an insert like any other and counts
        // against the capacity bound
        if !inner.entries.contains_key(key) && inner.entries.len() >= self.capacity {
            inner.evict_lru();
        }

        let tick = inner.next_tick();

        let (current, expires_at) = match inner.entries.get(key) {
            Some(entry) if entry.is_expired(now) => (0, None),
            Some(entry) => (entry.value.parse::<i64>().unwrap_or(0), entry.expires_at),
            None => (0, None),
        };

        let next = current + delta;
        inner.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: next.to_string(),
                expires_at,
                last_used: tick,
            },
        );
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let now = OffsetDateTime::now_utc().unix_timestamp();

        if let Some(entry) = inner.entries.get_mut(key) {
            entry.expires_at = Some(now + ttl.as_secs() as i64);
        }
        Ok(())
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>> {
        let mut inner = self.inner.lock().await;
        let now = OffsetDateTime::now_utc().unix_timestamp();

        inner
            .entries
            .retain(|_, entry| !entry.is_expired(now));

        Ok(inner
            .entries
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect())
    }

    async fn clear(&self) -> Result<()> {
        self.inner.lock().await.entries.clear();
        Ok(())
    }
}

/// Minimal glob matcher supporting `*` wildcards, enough for the
/// `kind:discriminator:*` patterns used across the crate.
fn glob_match(pattern: &str, candidate: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return pattern == candidate;
    }

    let mut rest = candidate;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(segment) {
                Some(stripped) => rest = stripped,
                None => return false,
            }
        } else if i == segments.len() - 1 && !pattern.ends_with('*') {
            return rest.ends_with(segment);
        } else {
            match rest.find(segment) {
                Some(pos) => rest = &rest[pos + segment.len()..],
                None => return false,
            }
        }
    }
    true
}

// ==================== Redis Backend ====================

/// Networked cache backend over redis.
///
/// Uses a multiplexed async connection per operation. Every operation fails
/// open: an unreachable backend degrades to a miss/no-op with a warn log,
/// never an error to the caller.
pub struct RedisCache {
    client: redis::Client,
}

impl RedisCache {
    /// Create a redis-backed cache. The connection is established lazily on
    /// first use.
    pub fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self { client })
    }

    async fn connection(&self) -> std::result::Result<redis::aio::MultiplexedConnection, AuthError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(AuthError::from)
    }

    /// Run a redis operation, converting any backend failure into the
    /// fail-open `fallback` value.
    async fn fail_open<T, F, Fut>(&self, op_name: &str, fallback: T, op: F) -> Result<T>
    where
        F: FnOnce(redis::aio::MultiplexedConnection) -> Fut,
        Fut: Future<Output = std::result::Result<T, redis::RedisError>>,
    {
        let conn = match self.connection().await {
            Ok(conn) => conn,
            Err(err) => {
                warn!(op = op_name, error = %err, "cache unavailable, failing open");
                return Ok(fallback);
            }
        };

        match op(conn).await {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(op = op_name, error = %err, "cache operation failed, failing open");
                Ok(fallback)
            }
        }
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.fail_open("get", None, |mut conn| async move {
            conn.get::<_, Option<String>>(key).await
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.fail_open("set", (), |mut conn| async move {
            match ttl {
                Some(ttl) => conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await,
                None => conn.set::<_, _, ()>(key, value).await,
            }
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.fail_open("delete", (), |mut conn| async move {
            conn.del::<_, ()>(key).await
        })
        .await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.fail_open("exists", false, |mut conn| async move {
            conn.exists::<_, bool>(key).await
        })
        .await
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64> {
        // INCRBY is a single atomic round-trip on the server. On outage the
        // counter is reported as if freshly seeded, which matches the
        // fail-open contract (rate limiting degrades, requests still pass).
        let key = key.to_string();
        self.fail_open("increment", delta, |mut conn| async move {
            conn.incr::<_, _, i64>(key, delta).await
        })
        .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let key = key.to_string();
        self.fail_open("expire", (), |mut conn| async move {
            conn.expire::<_, ()>(key, ttl.as_secs() as i64).await
        })
        .await
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>> {
        let pattern = pattern.to_string();
        self.fail_open("keys_matching", Vec::new(), |mut conn| async move {
            conn.keys::<_, Vec<String>>(pattern).await
        })
        .await
    }

    async fn clear(&self) -> Result<()> {
        self.fail_open("clear", (), |mut conn| async move {
            redis::cmd("FLUSHDB").query_async::<()>(&mut conn).await
        })
        .await
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let cache = MemoryCache::new(16);
        cache.set("user:session:1", "hello", None).await.unwrap();

        assert_eq!(
            cache.get("user:session:1").await.unwrap(),
            Some("hello".to_string())
        );
        assert!(cache.exists("user:session:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let cache = MemoryCache::new(16);
        assert_eq!(cache.get("nope").await.unwrap(), None);
        assert!(!cache.exists("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_read_returns_absent() {
        let cache = MemoryCache::new(16);
        cache
            .set("k", "v", Some(Duration::ZERO))
            .await
            .unwrap();

        // TTL of zero means the entry is already past its expiry
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(!cache.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete() {
        let cache = MemoryCache::new(16);
        cache.set("k", "v", None).await.unwrap();
        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);

        // Deleting an absent key is not an error
        cache.delete("k").await.unwrap();
    }

    #[tokio::test]
    async fn test_increment_from_absent() {
        let cache = MemoryCache::new(16);
        assert_eq!(cache.increment("counter", 1).await.unwrap(), 1);
        assert_eq!(cache.increment("counter", 1).await.unwrap(), 2);
        assert_eq!(cache.increment("counter", 5).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_increment_preserves_ttl() {
        let cache = MemoryCache::new(16);
        cache
            .set("counter", "1", Some(Duration::from_secs(60)))
            .await
            .unwrap();
        cache.increment("counter", 1).await.unwrap();

        // Entry still expires: its expiry survived the increment
        let inner = cache.inner.lock().await;
        assert!(inner.entries.get("counter").unwrap().expires_at.is_some());
    }

    #[tokio::test]
    async fn test_lru_eviction_on_capacity() {
        let cache = MemoryCache::new(2);
        cache.set("a", "1", None).await.unwrap();
        cache.set("b", "2", None).await.unwrap();

        // Touch "a" so "b" becomes least recently used
        cache.get("a").await.unwrap();
        cache.set("c", "3", None).await.unwrap();

        assert_eq!(cache.get("a").await.unwrap(), Some("1".to_string()));
        assert_eq!(cache.get("b").await.unwrap(), None);
        assert_eq!(cache.get("c").await.unwrap(), Some("3".to_string()));
    }

    #[tokio::test]
    async fn test_increment_respects_capacity_bound() {
        let cache = MemoryCache::new(2);

        // Fresh counter keys, as created by cycling rate-limit identifiers,
        // must evict rather than grow the map past its bound
        for i in 0..10 {
            cache.increment(&format!("ratelimit:{i}:login"), 1).await.unwrap();
        }

        assert!(cache.len().await <= 2);
        // The newest counter survived with its count intact
        assert_eq!(cache.increment("ratelimit:9:login", 1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_expire_applies_ttl() {
        let cache = MemoryCache::new(16);
        cache.set("k", "v", None).await.unwrap();
        cache.expire("k", Duration::ZERO).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_keys_matching() {
        let cache = MemoryCache::new(16);
        cache.set("otp:code:a@b.com", "1", None).await.unwrap();
        cache.set("otp:code:c@d.com", "2", None).await.unwrap();
        cache.set("user:session:1", "3", None).await.unwrap();

        let mut keys = cache.keys_matching("otp:code:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["otp:code:a@b.com", "otp:code:c@d.com"]);
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = MemoryCache::new(16);
        cache.set("a", "1", None).await.unwrap();
        cache.set("b", "2", None).await.unwrap();
        cache.clear().await.unwrap();
        assert!(cache.is_empty().await);
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("otp:code:*", "otp:code:a@b.com"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
        assert!(!glob_match("otp:code:*", "user:session:1"));
        assert!(glob_match("*:session:*", "user:session:1"));
    }

    #[tokio::test]
    async fn test_get_or_compute_caches_producer_output() {
        let cache = MemoryCache::new(16);

        let first: i64 = get_or_compute(&cache, "calc", Duration::from_secs(60), || async {
            Ok(41 + 1)
        })
        .await
        .unwrap();
        assert_eq!(first, 42);

        // Second call must come from the cache, not the producer
        let second: i64 = get_or_compute(&cache, "calc", Duration::from_secs(60), || async {
            panic!("producer must not run on a cache hit")
        })
        .await
        .unwrap();
        assert_eq!(second, 42);
    }

    #[tokio::test]
    async fn test_unreachable_redis_fails_open() {
        // Nothing listens on this port; every operation must degrade to a
        // miss/no-op instead of erroring.
        let cache = RedisCache::connect("redis://127.0.0.1:1/").unwrap();

        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(!cache.exists("k").await.unwrap());
        cache.set("k", "v", Some(Duration::from_secs(1))).await.unwrap();
        cache.delete("k").await.unwrap();
        assert_eq!(cache.keys_matching("*").await.unwrap(), Vec::<String>::new());
        assert_eq!(cache.increment("c", 1).await.unwrap(), 1);
    }
}
