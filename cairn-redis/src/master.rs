use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::Script;

use cairn_core::{Error, Result};
use cairn_quorum::Master;

use crate::config::RedisConfig;
use crate::pool::create_pool;
use crate::scripts;
use crate::txn::{self, Staged, TxnOptions};

/// [`Master`] backed by one Redis endpoint.
///
/// Lock operations run as Lua scripts so the compare step and the mutation
/// are atomic on the server; the counter increment runs as an optimistic
/// WATCH/MULTI/EXEC scope so a concurrent writer aborts the commit instead
/// of being overwritten.
pub struct RedisMaster {
    name: String,
    pool: Pool,
    txn_options: TxnOptions,
}

impl RedisMaster {
    /// Create a new `RedisMaster` from the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the pool cannot be created.
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let pool = create_pool(config)?;
        Ok(Self {
            name: config.url.clone(),
            pool,
            txn_options: TxnOptions::default(),
        })
    }

    /// Override the retry policy used by counter increments.
    #[must_use]
    pub fn with_txn_options(mut self, options: TxnOptions) -> Self {
        self.txn_options = options;
        self
    }

    /// The underlying connection pool, shared with the single-endpoint
    /// primitives (cache, sketches).
    #[must_use]
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::Connection(e.to_string()))
    }
}

fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

#[async_trait]
impl Master for RedisMaster {
    fn name(&self) -> &str {
        &self.name
    }

    async fn acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn().await?;
        let script = Script::new(scripts::ACQUIRE);
        let result: i64 = script
            .key(key)
            .arg(token)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Error::Backend(e.to_string()))?;
        Ok(result == 1)
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let script = Script::new(scripts::RELEASE);
        let result: i64 = script
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Error::Backend(e.to_string()))?;
        Ok(result == 1)
    }

    async fn extend(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn().await?;
        let script = Script::new(scripts::EXTEND);
        let result: i64 = script
            .key(key)
            .arg(token)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Error::Backend(e.to_string()))?;
        Ok(result == 1)
    }

    async fn held_ttl(&self, key: &str, token: &str) -> Result<Duration> {
        let mut conn = self.conn().await?;
        let script = Script::new(scripts::HELD_TTL);
        let remaining: i64 = script
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Error::Backend(e.to_string()))?;
        Ok(Duration::from_millis(remaining.max(0) as u64))
    }

    async fn fetch_increment(&self, key: &str) -> Result<u64> {
        let keys = [key.to_owned()];
        txn::optimistic(&self.pool, &keys, &self.txn_options, |current| {
            let base = match current[0].as_deref() {
                Some(raw) => raw
                    .parse::<u64>()
                    .map_err(|e| Error::Backend(format!("counter '{key}' is corrupt: {e}")))?,
                None => 0,
            };
            let next = base + 1;
            Ok(Staged {
                writes: vec![(key.to_owned(), next.to_string())],
                output: next,
            })
        })
        .await
    }

    async fn raise_to(&self, key: &str, target: u64) -> Result<()> {
        let mut conn = self.conn().await?;
        let script = Script::new(scripts::RAISE_TO);
        let _: i64 = script
            .key(key)
            .arg(target)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Error::Backend(e.to_string()))?;
        Ok(())
    }
}

#[cfg(all(test, feature = "integration"))]
mod integration_tests {
    use std::sync::Arc;

    use super::*;

    fn test_master() -> RedisMaster {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        RedisMaster::new(&RedisConfig::from_url(url)).expect("pool creation should succeed")
    }

    #[tokio::test]
    async fn acquire_release_cycle() {
        let master = test_master();
        let key = format!("cairn-test-lock-{}", uuid::Uuid::new_v4());

        assert!(master
            .acquire(&key, "token-a", Duration::from_secs(10))
            .await
            .unwrap());
        // A second acquire with a different token must fail.
        assert!(!master
            .acquire(&key, "token-b", Duration::from_secs(10))
            .await
            .unwrap());
        // The wrong token cannot release.
        assert!(!master.release(&key, "token-b").await.unwrap());
        assert!(master.release(&key, "token-a").await.unwrap());
    }

    #[tokio::test]
    async fn held_ttl_reports_remaining_lease() {
        let master = test_master();
        let key = format!("cairn-test-lock-{}", uuid::Uuid::new_v4());

        master
            .acquire(&key, "token", Duration::from_secs(10))
            .await
            .unwrap();
        let remaining = master.held_ttl(&key, "token").await.unwrap();
        assert!(remaining > Duration::from_secs(9));
        assert_eq!(
            master.held_ttl(&key, "other").await.unwrap(),
            Duration::ZERO
        );
        master.release(&key, "token").await.unwrap();
    }

    #[tokio::test]
    async fn fetch_increment_and_raise() {
        let master = Arc::new(test_master());
        let key = format!("cairn-test-counter-{}", uuid::Uuid::new_v4());

        assert_eq!(master.fetch_increment(&key).await.unwrap(), 1);
        assert_eq!(master.fetch_increment(&key).await.unwrap(), 2);

        master.raise_to(&key, 10).await.unwrap();
        assert_eq!(master.fetch_increment(&key).await.unwrap(), 11);
        // Raising to a lower value must not lower the counter.
        master.raise_to(&key, 3).await.unwrap();
        assert_eq!(master.fetch_increment(&key).await.unwrap(), 12);

        let mut conn = master.pool().get().await.unwrap();
        let _: () = redis::cmd("DEL")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .unwrap();
    }
}
