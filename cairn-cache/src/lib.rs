//! Redis-backed memoization cache.
//!
//! One Redis hash per wrapped function: field names are argument
//! fingerprints, field values are canonically encoded return values. Two
//! reserved fields in the same hash hold the cumulative hit and miss
//! counters, so every process sharing the cache key shares the statistics
//! too.
//!
//! Only cache pure functions. Two concurrent misses may both compute and
//! both write; the last write wins and each caller is served the value it
//! computed, which is indistinguishable for a pure function.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use serde_json::Value;
use tracing::debug;

use cairn_core::{encode_value, CallArgs, Error, Result};
use cairn_redis::{create_pool, RedisConfig};

/// Reserved hash field holding the cumulative hit counter.
const HITS_FIELD: &str = "__hits__";

/// Reserved hash field holding the cumulative miss counter.
///
/// Fingerprint fields are 32 hex characters, so the reserved names cannot
/// collide with them.
const MISSES_FIELD: &str = "__misses__";

/// The wrapped function behind a cache.
#[async_trait]
pub trait Compute: Send + Sync {
    /// Invoke the function with the given arguments.
    ///
    /// Errors propagate to the caller and are never cached.
    async fn invoke(&self, args: &CallArgs) -> Result<Value>;
}

/// [`Compute`] adapter for a plain synchronous closure.
pub struct FnCompute<F>(F);

impl<F> FnCompute<F>
where
    F: Fn(&CallArgs) -> Result<Value> + Send + Sync,
{
    /// Wrap the closure.
    pub fn new(func: F) -> Self {
        Self(func)
    }
}

#[async_trait]
impl<F> Compute for FnCompute<F>
where
    F: Fn(&CallArgs) -> Result<Value> + Send + Sync,
{
    async fn invoke(&self, args: &CallArgs) -> Result<Value> {
        (self.0)(args)
    }
}

/// Cache effectiveness counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheInfo {
    /// Calls served from the hash.
    pub hits: u64,
    /// Calls that invoked the wrapped function.
    pub misses: u64,
    /// User entries currently in the hash (the counter fields are not
    /// counted).
    pub size: u64,
}

/// Redis-backed cache around one wrapped function.
pub struct RedisCache {
    pool: Pool,
    key: String,
    timeout: Option<Duration>,
    func: Arc<dyn Compute>,
}

impl RedisCache {
    /// Create a cache over an existing pool.
    #[must_use]
    pub fn new(pool: Pool, key: impl Into<String>, func: Arc<dyn Compute>) -> Self {
        Self {
            pool,
            key: key.into(),
            timeout: None,
            func,
        }
    }

    /// Create a cache with its own pool from the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the pool cannot be created.
    pub fn connect(
        config: &RedisConfig,
        key: impl Into<String>,
        func: Arc<dyn Compute>,
    ) -> Result<Self> {
        Ok(Self::new(create_pool(config)?, key, func))
    }

    /// Expire the whole hash this long after the most recent write.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The Redis hash name backing this cache.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Look the arguments up in the cache, invoking the wrapped function on
    /// a miss and caching its result for future calls.
    pub async fn call(&self, args: &CallArgs) -> Result<Value> {
        let field = args.fingerprint();
        let mut conn = self.conn().await?;

        let cached: Option<String> = conn
            .hget(&self.key, &field)
            .await
            .map_err(|e| Error::Backend(e.to_string()))?;

        if let Some(raw) = cached {
            let value = cairn_core::decode(&raw)?;
            let _: i64 = conn
                .hincr(&self.key, HITS_FIELD, 1)
                .await
                .map_err(|e| Error::Backend(e.to_string()))?;
            return Ok(value);
        }

        debug!(key = %self.key, field = %field, "cache miss");
        let value = self.func.invoke(args).await?;
        self.store(&mut conn, &field, &value, true).await?;
        Ok(value)
    }

    /// Invoke the wrapped function unconditionally and refresh the cached
    /// entry, without touching the hit/miss counters.
    pub async fn bypass(&self, args: &CallArgs) -> Result<Value> {
        let field = args.fingerprint();
        let value = self.func.invoke(args).await?;
        let mut conn = self.conn().await?;
        self.store(&mut conn, &field, &value, false).await?;
        Ok(value)
    }

    /// Current hit/miss counters and entry count.
    pub async fn info(&self) -> Result<CacheInfo> {
        let mut conn = self.conn().await?;
        let (hits, misses, len, has_hits, has_misses): (Option<u64>, Option<u64>, u64, bool, bool) =
            redis::pipe()
                .hget(&self.key, HITS_FIELD)
                .hget(&self.key, MISSES_FIELD)
                .hlen(&self.key)
                .hexists(&self.key, HITS_FIELD)
                .hexists(&self.key, MISSES_FIELD)
                .query_async(&mut conn)
                .await
                .map_err(|e| Error::Backend(e.to_string()))?;

        let counter_fields = u64::from(has_hits) + u64::from(has_misses);
        Ok(CacheInfo {
            hits: hits.unwrap_or(0),
            misses: misses.unwrap_or(0),
            size: len.saturating_sub(counter_fields),
        })
    }

    /// Drop every cached entry and reset the counters to zero.
    pub async fn clear(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn
            .del(&self.key)
            .await
            .map_err(|e| Error::Backend(e.to_string()))?;
        Ok(())
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::Connection(e.to_string()))
    }

    /// Write one entry, bump the miss counter if asked, and refresh the
    /// hash TTL, in a single round trip.
    async fn store(
        &self,
        conn: &mut deadpool_redis::Connection,
        field: &str,
        value: &Value,
        count_miss: bool,
    ) -> Result<()> {
        let encoded = encode_value(value);
        let mut pipe = redis::pipe();
        pipe.hset(&self.key, field, encoded).ignore();
        if count_miss {
            pipe.hincr(&self.key, MISSES_FIELD, 1).ignore();
        }
        if let Some(timeout) = self.timeout {
            let ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
            pipe.pexpire(&self.key, ms).ignore();
        }
        pipe.query_async::<()>(conn)
            .await
            .map_err(|e| Error::Backend(e.to_string()))
    }
}


#[cfg(all(test, feature = "integration"))]
mod integration_tests {
    use super::*;

    fn test_cache(func: Arc<dyn Compute>) -> RedisCache {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let key = format!("cairn-test-cache-{}", uuid::Uuid::new_v4());
        RedisCache::connect(&RedisConfig::from_url(url), key, func).expect("pool should build")
    }

    fn identity() -> Arc<dyn Compute> {
        Arc::new(FnCompute::new(|args: &CallArgs| {
            Ok(args.positional()[0].clone())
        }))
    }

    #[tokio::test]
    async fn hit_and_miss_counters_accumulate() {
        let cache = test_cache(identity());

        let five = CallArgs::new().arg(5).unwrap();
        let six = CallArgs::new().arg(6).unwrap();

        assert_eq!(cache.call(&five).await.unwrap(), Value::from(5));
        let info = cache.info().await.unwrap();
        assert_eq!((info.hits, info.misses, info.size), (0, 1, 1));

        assert_eq!(cache.call(&five).await.unwrap(), Value::from(5));
        let info = cache.info().await.unwrap();
        assert_eq!((info.hits, info.misses, info.size), (1, 1, 1));

        assert_eq!(cache.call(&six).await.unwrap(), Value::from(6));
        let info = cache.info().await.unwrap();
        assert_eq!((info.hits, info.misses, info.size), (1, 2, 2));

        cache.clear().await.unwrap();
        assert_eq!(cache.info().await.unwrap(), CacheInfo::default());
    }

    #[tokio::test]
    async fn bypass_recomputes_without_counting() {
        let cache = test_cache(identity());
        let args = CallArgs::new().arg("rajiv").unwrap();

        assert_eq!(cache.bypass(&args).await.unwrap(), Value::from("rajiv"));
        let info = cache.info().await.unwrap();
        assert_eq!((info.hits, info.misses, info.size), (0, 0, 1));

        // The bypassed write serves later calls as a hit.
        assert_eq!(cache.call(&args).await.unwrap(), Value::from("rajiv"));
        let info = cache.info().await.unwrap();
        assert_eq!((info.hits, info.misses), (1, 0));

        cache.clear().await.unwrap();
    }

    #[tokio::test]
    async fn callable_errors_are_not_cached() {
        let failing: Arc<dyn Compute> =
            Arc::new(FnCompute::new(|_args: &CallArgs| {
                Err(Error::Callable("flaky".into()))
            }));
        let cache = test_cache(failing);
        let args = CallArgs::new().arg(1).unwrap();

        assert!(cache.call(&args).await.is_err());
        let info = cache.info().await.unwrap();
        assert_eq!(info.size, 0);

        cache.clear().await.unwrap();
    }
}
