use std::time::Duration;

use tracing::warn;

use cairn_core::Result;

use crate::redlock::Redlock;

/// A held acquisition, scoped to a borrow of its [`Redlock`] handle.
///
/// Release explicitly with [`release`](Self::release). Dropping the guard
/// without releasing is safe; the lease expires on its own. Explicit
/// release is preferred for prompt cleanup.
pub struct RedlockGuard<'a> {
    lock: &'a mut Redlock,
    released: bool,
}

impl<'a> RedlockGuard<'a> {
    pub(crate) fn new(lock: &'a mut Redlock) -> Self {
        Self {
            lock,
            released: false,
        }
    }

    /// The validity window reported at acquisition (or last extension).
    #[must_use]
    pub fn validity(&self) -> Duration {
        self.lock.validity().unwrap_or_default()
    }

    /// How much longer the lock is held, in the masters' view.
    pub async fn locked(&self) -> Result<Duration> {
        self.lock.locked().await
    }

    /// Extend the hold on the lock.
    pub async fn extend(&mut self) -> Result<bool> {
        self.lock.extend().await
    }

    /// Unlock the lock and consume the guard.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        self.lock.release().await
    }
}

impl Drop for RedlockGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                key = %self.lock.key(),
                "lock guard dropped without release, the lease will expire on its own"
            );
        }
    }
}
