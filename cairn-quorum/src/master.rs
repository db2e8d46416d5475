use std::time::Duration;

use async_trait::async_trait;

use cairn_core::Result;

/// The per-endpoint operations the quorum primitives are built from.
///
/// One `Master` wraps one independent Redis-compatible endpoint. The lock
/// and the ID generator never talk to an endpoint except through this trait,
/// which is what lets tests substitute in-process masters for real servers.
///
/// Implementations must be `Send + Sync`; every operation must be atomic on
/// its endpoint (server-side scripts or equivalent).
#[async_trait]
pub trait Master: Send + Sync {
    /// A short label for this endpoint, used in log output.
    fn name(&self) -> &str;

    /// Set `key` to `token` with the given TTL, only if the key is absent.
    /// Returns `true` if the key was newly set.
    async fn acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool>;

    /// Delete `key` only if its current value equals `token`.
    /// Returns `true` if the key was deleted.
    async fn release(&self, key: &str, token: &str) -> Result<bool>;

    /// Reset the TTL of `key` only if its current value equals `token`.
    /// Returns `true` if the TTL was reset.
    async fn extend(&self, key: &str, token: &str, ttl: Duration) -> Result<bool>;

    /// The remaining TTL of `key` if its current value equals `token`,
    /// [`Duration::ZERO`] otherwise.
    async fn held_ttl(&self, key: &str, token: &str) -> Result<Duration>;

    /// Atomically increment the counter at `key` (absent counts as 0) and
    /// return the new value. The increment must fail, not overwrite, when a
    /// concurrent writer commits between read and write.
    async fn fetch_increment(&self, key: &str) -> Result<u64>;

    /// Raise the counter at `key` to `target` if its current value is lower.
    /// Never lowers the counter.
    async fn raise_to(&self, key: &str, target: u64) -> Result<()>;
}
