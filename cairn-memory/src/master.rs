use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use cairn_core::{Error, Result};
use cairn_quorum::Master;

/// Internal entry representing a held lock key.
#[derive(Debug, Clone)]
struct LockEntry {
    token: String,
    expires_at: Instant,
}

impl LockEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

/// In-process [`Master`] backed by [`DashMap`]s.
///
/// Lock expiry is lazy: expired entries are evicted when the same key is
/// next touched. Uses the tokio clock, so tests can drive lease expiry with
/// `tokio::time::advance`.
#[derive(Debug, Clone, Default)]
pub struct MemoryMaster {
    name: String,
    locks: Arc<DashMap<String, LockEntry>>,
    counters: Arc<DashMap<String, u64>>,
}

impl MemoryMaster {
    /// Create a new in-memory master with the given endpoint label.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Build `n` independent in-memory masters.
    #[must_use]
    pub fn cluster(n: usize) -> Vec<Arc<dyn Master>> {
        (0..n)
            .map(|i| Arc::new(Self::new(format!("memory-{i}"))) as Arc<dyn Master>)
            .collect()
    }
}

#[async_trait]
impl Master for MemoryMaster {
    fn name(&self) -> &str {
        &self.name
    }

    async fn acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        // Remove expired entries lazily.
        self.locks.remove_if(key, |_, entry| entry.is_expired());

        match self.locks.entry(key.to_owned()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(LockEntry {
                    token: token.to_owned(),
                    expires_at: Instant::now() + ttl,
                });
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool> {
        let removed = self
            .locks
            .remove_if(key, |_, entry| !entry.is_expired() && entry.token == token);
        Ok(removed.is_some())
    }

    async fn extend(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        match self.locks.get_mut(key) {
            Some(mut entry) if entry.token == token && !entry.is_expired() => {
                entry.expires_at = Instant::now() + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn held_ttl(&self, key: &str, token: &str) -> Result<Duration> {
        match self.locks.get(key) {
            Some(entry) if entry.token == token && !entry.is_expired() => Ok(entry.remaining()),
            _ => Ok(Duration::ZERO),
        }
    }

    async fn fetch_increment(&self, key: &str) -> Result<u64> {
        let mut entry = self.counters.entry(key.to_owned()).or_insert(0);
        *entry += 1;
        Ok(*entry)
    }

    async fn raise_to(&self, key: &str, target: u64) -> Result<()> {
        let mut entry = self.counters.entry(key.to_owned()).or_insert(0);
        if *entry < target {
            *entry = target;
        }
        Ok(())
    }
}

/// A [`Master`] that fails every call, standing in for an unreachable
/// endpoint in quorum-loss tests.
#[derive(Debug, Clone)]
pub struct FailingMaster {
    name: String,
}

impl FailingMaster {
    /// Create a new failing master with the given endpoint label.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn unreachable(&self) -> Error {
        Error::Connection(format!("master '{}' is unreachable", self.name))
    }
}

#[async_trait]
impl Master for FailingMaster {
    fn name(&self) -> &str {
        &self.name
    }

    async fn acquire(&self, _key: &str, _token: &str, _ttl: Duration) -> Result<bool> {
        Err(self.unreachable())
    }

    async fn release(&self, _key: &str, _token: &str) -> Result<bool> {
        Err(self.unreachable())
    }

    async fn extend(&self, _key: &str, _token: &str, _ttl: Duration) -> Result<bool> {
        Err(self.unreachable())
    }

    async fn held_ttl(&self, _key: &str, _token: &str) -> Result<Duration> {
        Err(self.unreachable())
    }

    async fn fetch_increment(&self, _key: &str) -> Result<u64> {
        Err(self.unreachable())
    }

    async fn raise_to(&self, _key: &str, _target: u64) -> Result<()> {
        Err(self.unreachable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_is_exclusive_per_key() {
        let master = MemoryMaster::new("m");
        assert!(master
            .acquire("printer", "t1", Duration::from_secs(10))
            .await
            .unwrap());
        assert!(!master
            .acquire("printer", "t2", Duration::from_secs(10))
            .await
            .unwrap());
        // A different key is independent.
        assert!(master
            .acquire("scanner", "t2", Duration::from_secs(10))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn release_requires_matching_token() {
        let master = MemoryMaster::new("m");
        master
            .acquire("printer", "t1", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(!master.release("printer", "t2").await.unwrap());
        assert!(master.release("printer", "t1").await.unwrap());
        // Releasing again reports not held.
        assert!(!master.release("printer", "t1").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn lease_expires_after_ttl() {
        let master = MemoryMaster::new("m");
        master
            .acquire("printer", "t1", Duration::from_secs(2))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(3)).await;

        assert_eq!(
            master.held_ttl("printer", "t1").await.unwrap(),
            Duration::ZERO
        );
        // The key is free again for another token.
        assert!(master
            .acquire("printer", "t2", Duration::from_secs(2))
            .await
            .unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn extend_resets_the_lease() {
        let master = MemoryMaster::new("m");
        master
            .acquire("printer", "t1", Duration::from_secs(2))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(master
            .extend("printer", "t1", Duration::from_secs(2))
            .await
            .unwrap());

        let remaining = master.held_ttl("printer", "t1").await.unwrap();
        assert!(remaining > Duration::from_secs(1));

        // The wrong token cannot extend.
        assert!(!master
            .extend("printer", "t2", Duration::from_secs(2))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn counters_increment_and_raise() {
        let master = MemoryMaster::new("m");
        assert_eq!(master.fetch_increment("seq").await.unwrap(), 1);
        assert_eq!(master.fetch_increment("seq").await.unwrap(), 2);

        master.raise_to("seq", 10).await.unwrap();
        assert_eq!(master.fetch_increment("seq").await.unwrap(), 11);

        master.raise_to("seq", 3).await.unwrap();
        assert_eq!(master.fetch_increment("seq").await.unwrap(), 12);
    }

    #[tokio::test]
    async fn failing_master_errors_on_everything() {
        let master = FailingMaster::new("down");
        assert!(master
            .acquire("k", "t", Duration::from_secs(1))
            .await
            .is_err());
        assert!(master.fetch_increment("k").await.is_err());
        assert!(master.held_ttl("k", "t").await.is_err());
    }
}
