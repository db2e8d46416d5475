use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use cairn_core::quorum::{drift, has_quorum, quorum, validity_window};
use cairn_core::{Error, Result};
use cairn_quorum::{fan_out, Master};

use crate::config::RedlockConfig;
use crate::guard::RedlockGuard;

/// A successful acquisition held by this handle.
#[derive(Debug, Clone)]
pub(crate) struct Held {
    pub(crate) token: String,
    pub(crate) acquired_at: Instant,
    pub(crate) validity: Duration,
    pub(crate) extensions_used: u32,
}

impl Held {
    fn deadline_lapsed(&self) -> bool {
        self.acquired_at.elapsed() >= self.validity
    }
}

/// Quorum-based distributed lock over N independent masters.
///
/// Each handle is independent and tracks one acquisition at a time:
/// acquiring an already-held handle, or releasing or extending an unheld
/// one, is a caller error. The masters themselves only ever honor the
/// fencing token minted at acquisition, so a crashed holder cannot wedge
/// the resource past its lease.
pub struct Redlock {
    config: RedlockConfig,
    masters: Vec<Arc<dyn Master>>,
    state: Option<Held>,
    last_granted: usize,
}

impl Redlock {
    /// Create a lock handle over the given masters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] unless the master count is odd and
    /// at least 1.
    pub fn new(config: RedlockConfig, masters: Vec<Arc<dyn Master>>) -> Result<Self> {
        if masters.is_empty() {
            return Err(Error::Configuration(
                "a Redlock needs at least one master".into(),
            ));
        }
        if masters.len() % 2 == 0 {
            return Err(Error::Configuration(format!(
                "the master count must be odd, got {}",
                masters.len()
            )));
        }
        Ok(Self {
            config,
            masters,
            state: None,
            last_granted: 0,
        })
    }

    /// The resource name this handle locks.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.config.key
    }

    /// Whether this handle currently holds an unexpired acquisition.
    ///
    /// This is the handle's local view; [`locked`](Self::locked) asks the
    /// masters.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.state
            .as_ref()
            .is_some_and(|held| !held.deadline_lapsed())
    }

    /// The validity window reported by the most recent successful
    /// acquisition or extension.
    #[must_use]
    pub fn validity(&self) -> Option<Duration> {
        self.state.as_ref().map(|held| held.validity)
    }

    /// Lock the lock, using the configured blocking mode and timeout.
    ///
    /// Returns `true` once acquired; `false` if the lock could not be
    /// acquired within the configured constraints.
    pub async fn acquire(&mut self) -> Result<bool> {
        let blocking = self.config.blocking;
        let timeout = self.config.timeout;
        self.acquire_with(blocking, timeout).await
    }

    /// Try just once, right now, to lock the lock.
    pub async fn try_acquire(&mut self) -> Result<bool> {
        self.acquire_with(false, None).await
    }

    /// Lock the lock with explicit blocking mode and timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when a timeout is combined with a
    /// non-blocking call, and [`Error::AlreadyAcquired`] when this handle
    /// already holds the lock.
    pub async fn acquire_with(
        &mut self,
        blocking: bool,
        timeout: Option<Duration>,
    ) -> Result<bool> {
        if !blocking {
            if timeout.is_some() {
                return Err(Error::Configuration(
                    "a timeout makes no sense for a non-blocking acquire".into(),
                ));
            }
            return self.attempt().await;
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.attempt().await? {
                return Ok(true);
            }

            let delay = self.random_retry_delay();
            match deadline {
                Some(deadline) if Instant::now() + delay >= deadline => return Ok(false),
                _ => tokio::time::sleep(delay).await,
            }
        }
    }

    /// Acquire and hand back a guard for scoped use.
    ///
    /// Uses the `context_manager_blocking` / `context_manager_timeout`
    /// options rather than the plain `acquire` ones.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QuorumNotAchieved`] if the lock was not acquired.
    pub async fn acquire_guard(&mut self) -> Result<RedlockGuard<'_>> {
        let blocking = self.config.context_manager_blocking;
        let timeout = self.config.context_manager_timeout;
        if self.acquire_with(blocking, timeout).await? {
            Ok(RedlockGuard::new(self))
        } else {
            Err(Error::QuorumNotAchieved {
                key: self.config.key.clone(),
                granted: self.last_granted,
                required: quorum(self.masters.len()),
            })
        }
    }

    /// Unlock the lock.
    ///
    /// The release fan-out is best-effort: masters that cannot be reached
    /// will drop the key when its lease expires. The handle transitions to
    /// released either way.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReleaseUnlocked`] when this handle holds nothing.
    pub async fn release(&mut self) -> Result<()> {
        let Some(held) = self.state.take() else {
            return Err(Error::ReleaseUnlocked(self.config.key.clone()));
        };

        let released = self.release_token(&held.token).await;
        if !has_quorum(released, self.masters.len()) {
            warn!(
                key = %self.config.key,
                released,
                masters = self.masters.len(),
                "release confirmed below quorum, lease will expire on the rest"
            );
        }
        Ok(())
    }

    /// Extend our hold on the lock, resetting the lease on every master
    /// that still honors our token.
    ///
    /// Returns `true` if a quorum confirmed the reset and the recomputed
    /// validity window is still positive.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExtendUnlocked`] when this handle holds nothing and
    /// [`Error::TooManyExtensions`] when the extension budget is spent.
    pub async fn extend(&mut self) -> Result<bool> {
        let num_extensions = self.config.num_extensions;
        let auto_release_time = self.config.auto_release_time;
        let clock_drift_factor = self.config.clock_drift_factor;
        let key = self.config.key.clone();

        let Some(held) = &self.state else {
            return Err(Error::ExtendUnlocked(key));
        };
        if held.extensions_used >= num_extensions {
            return Err(Error::TooManyExtensions {
                key,
                limit: num_extensions,
            });
        }
        let token = held.token.clone();

        let start = Instant::now();
        let results = fan_out(&self.masters, |master| {
            let key = key.clone();
            let token = token.clone();
            async move { master.extend(&key, &token, auto_release_time).await }
        })
        .await;

        let extended = results.iter().filter(|r| matches!(r, Ok(true))).count();
        let validity = validity_window(auto_release_time, start.elapsed(), clock_drift_factor);

        if has_quorum(extended, self.masters.len()) && !validity.is_zero() {
            // Checked above that the state is present.
            if let Some(held) = self.state.as_mut() {
                held.acquired_at = start;
                held.validity = validity;
                held.extensions_used += 1;
            }
            Ok(true)
        } else {
            debug!(key = %self.config.key, extended, "extension did not reach quorum");
            Ok(false)
        }
    }

    /// How much longer we hold the lock, in the masters' view.
    ///
    /// Returns the remaining validity, computed from the quorum-th largest
    /// per-master TTL minus the probe round-trip and the drift allowance.
    /// Returns zero when fewer than a quorum still honor our token, or when
    /// this handle holds nothing.
    pub async fn locked(&self) -> Result<Duration> {
        let Some(held) = &self.state else {
            return Ok(Duration::ZERO);
        };
        let key = self.config.key.clone();
        let token = held.token.clone();

        let start = Instant::now();
        let results = fan_out(&self.masters, |master| {
            let key = key.clone();
            let token = token.clone();
            async move { master.held_ttl(&key, &token).await }
        })
        .await;

        let mut ttls: Vec<Duration> = results.into_iter().filter_map(std::result::Result::ok).collect();
        let holding = ttls.iter().filter(|ttl| !ttl.is_zero()).count();
        if !has_quorum(holding, self.masters.len()) {
            return Ok(Duration::ZERO);
        }

        // The quorum-th largest TTL: the lease is only guaranteed on the
        // best majority of masters.
        ttls.sort_unstable_by(|a, b| b.cmp(a));
        let quorum_ttl = ttls[self.masters.len() / 2];

        Ok(quorum_ttl
            .saturating_sub(start.elapsed())
            .saturating_sub(drift(
                self.config.auto_release_time,
                self.config.clock_drift_factor,
            )))
    }

    /// One full acquisition attempt across all masters.
    async fn attempt(&mut self) -> Result<bool> {
        if let Some(held) = &self.state {
            if held.deadline_lapsed() {
                // The lease ran out from under us; the handle is effectively
                // released and may acquire again.
                self.state = None;
            } else {
                return Err(Error::AlreadyAcquired(self.config.key.clone()));
            }
        }

        let token = Uuid::new_v4().simple().to_string();
        let key = self.config.key.clone();
        let auto_release_time = self.config.auto_release_time;
        // A slow master must not consume the whole lease.
        let per_master_budget = auto_release_time / self.masters.len() as u32;

        let start = Instant::now();
        let results = fan_out(&self.masters, |master| {
            let key = key.clone();
            let token = token.clone();
            async move {
                match tokio::time::timeout(
                    per_master_budget,
                    master.acquire(&key, &token, auto_release_time),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout(per_master_budget)),
                }
            }
        })
        .await;

        let granted = results.iter().filter(|r| matches!(r, Ok(true))).count();
        self.last_granted = granted;
        let validity = validity_window(
            auto_release_time,
            start.elapsed(),
            self.config.clock_drift_factor,
        );

        if has_quorum(granted, self.masters.len()) && !validity.is_zero() {
            self.state = Some(Held {
                token,
                acquired_at: start,
                validity,
                extensions_used: 0,
            });
            Ok(true)
        } else {
            debug!(
                key = %self.config.key,
                granted,
                validity_ms = validity.as_millis() as u64,
                "acquisition attempt failed"
            );
            // Masters that did grant must not keep the token pinned for the
            // whole lease.
            self.release_token(&token).await;
            Ok(false)
        }
    }

    /// Best-effort release fan-out. Returns how many masters confirmed.
    async fn release_token(&self, token: &str) -> usize {
        let key = self.config.key.clone();
        let token = token.to_owned();
        let results = fan_out(&self.masters, |master| {
            let key = key.clone();
            let token = token.clone();
            async move { master.release(&key, &token).await }
        })
        .await;
        results.iter().filter(|r| matches!(r, Ok(true))).count()
    }

    fn random_retry_delay(&self) -> Duration {
        let ceiling = self.config.retry_delay.as_secs_f64();
        if ceiling <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..ceiling))
    }
}
