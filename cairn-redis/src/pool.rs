use deadpool_redis::{Config, Pool, Runtime};

use cairn_core::{Error, Result};

use crate::config::RedisConfig;

/// Build a `deadpool-redis` pool from the provided configuration.
///
/// # Errors
///
/// Returns [`Error::Connection`] if the pool cannot be created.
pub fn create_pool(config: &RedisConfig) -> Result<Pool> {
    let cfg = Config::from_url(&config.url);
    cfg.builder()
        .map(|b| {
            b.max_size(config.pool_size)
                .wait_timeout(Some(config.connection_timeout))
                .runtime(Runtime::Tokio1)
                .build()
        })
        .map_err(|e| Error::Connection(e.to_string()))?
        .map_err(|e| Error::Connection(e.to_string()))
}
