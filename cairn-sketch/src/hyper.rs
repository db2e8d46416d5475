//! Redis-backed HyperLogLog façade.
//!
//! Thin wrapper over Redis's native HyperLogLog commands. Elements pass
//! through the canonical encoding so any encodable value can be counted.

use deadpool_redis::Pool;
use redis::AsyncCommands;
use serde::Serialize;

use cairn_core::{encode, Error, Result};
use cairn_redis::{create_pool, RedisConfig};

/// Approximate-cardinality estimator over one Redis key.
pub struct HyperLogLog {
    pool: Pool,
    key: String,
}

impl HyperLogLog {
    /// Create an estimator over an existing pool.
    #[must_use]
    pub fn new(pool: Pool, key: impl Into<String>) -> Self {
        Self {
            pool,
            key: key.into(),
        }
    }

    /// Create an estimator with its own pool from the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the pool cannot be created.
    pub fn connect(config: &RedisConfig, key: impl Into<String>) -> Result<Self> {
        Ok(Self::new(create_pool(config)?, key))
    }

    /// The Redis key backing this estimator.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Count an element.
    pub async fn add<T: Serialize>(&self, value: &T) -> Result<()> {
        self.add_many(std::slice::from_ref(value)).await
    }

    /// Count every element in `values`, in a single command.
    pub async fn add_many<T: Serialize>(&self, values: &[T]) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let mut encoded = Vec::with_capacity(values.len());
        for value in values {
            encoded.push(encode(value)?);
        }

        let mut conn = self.conn().await?;
        let _: i64 = conn
            .pfadd(&self.key, encoded)
            .await
            .map_err(|e| Error::Backend(e.to_string()))?;
        Ok(())
    }

    /// The approximate number of distinct elements counted so far.
    pub async fn len(&self) -> Result<u64> {
        let mut conn = self.conn().await?;
        conn.pfcount(&self.key)
            .await
            .map_err(|e| Error::Backend(e.to_string()))
    }

    /// Whether nothing has been counted yet.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Fold another estimator's elements into this one.
    pub async fn merge(&self, other: &HyperLogLog) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .pfmerge(&self.key, &other.key)
            .await
            .map_err(|e| Error::Backend(e.to_string()))?;
        Ok(())
    }

    /// Merge this estimator with `others` into a new one at `key`, leaving
    /// the sources untouched.
    pub async fn union(&self, others: &[&HyperLogLog], key: impl Into<String>) -> Result<Self> {
        let union = Self::new(self.pool.clone(), key);

        let mut sources = vec![self.key.clone()];
        sources.extend(others.iter().map(|hll| hll.key.clone()));

        let mut conn = self.conn().await?;
        let _: () = conn
            .pfmerge(&union.key, sources)
            .await
            .map_err(|e| Error::Backend(e.to_string()))?;
        Ok(union)
    }

    /// Forget every counted element.
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
}

#[cfg(all(test, feature = "integration"))]
mod integration_tests {
    use super::*;

    fn test_hll(suffix: &str) -> HyperLogLog {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let key = format!("cairn-test-hll-{}-{suffix}", uuid::Uuid::new_v4());
        HyperLogLog::connect(&RedisConfig::from_url(url), key).expect("pool should build")
    }

    #[tokio::test]
    async fn counts_distinct_elements() {
        let hll = test_hll("count");

        assert!(hll.is_empty().await.unwrap());
        hll.add_many(&["rajiv", "raj", "dan", "rajiv"]).await.unwrap();
        assert_eq!(hll.len().await.unwrap(), 3);

        hll.clear().await.unwrap();
        assert!(hll.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn union_counts_across_estimators() {
        let left = test_hll("left");
        let right = test_hll("right");

        left.add_many(&[1, 2, 3]).await.unwrap();
        right.add_many(&[3, 4]).await.unwrap();

        let union_key = format!("cairn-test-hll-{}-union", uuid::Uuid::new_v4());
        let union = left.union(&[&right], union_key).await.unwrap();
        assert_eq!(union.len().await.unwrap(), 4);

        left.clear().await.unwrap();
        right.clear().await.unwrap();
        union.clear().await.unwrap();
    }
}
