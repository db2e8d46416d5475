//! Distributed Redis-powered monotonically increasing ID generator.
//!
//! Each master keeps a per-sequence counter; a round increments the counter
//! on every master and the returned ID is the maximum committed by a
//! majority. Holes in the sequence are expected when callers race or when a
//! round only partially commits. The design scales to roughly 5,000 IDs per
//! second with 5 masters; beyond that, use a different technique.

use std::sync::Arc;

use tracing::{debug, warn};

use cairn_core::quorum::{has_quorum, quorum};
use cairn_core::{Error, Result, RetryStrategy};
use cairn_quorum::{fan_out, Master};

/// Namespace prepended to every sequence key.
const KEY_PREFIX: &str = "nextid";

/// Configuration for a [`NextId`] sequence.
#[derive(Debug, Clone)]
pub struct NextIdConfig {
    /// Sequence name. The masters store the counter at `nextid:<key>`.
    pub key: String,

    /// How many full rounds to attempt before giving up.
    pub num_tries: u32,

    /// Delay curve between rounds.
    pub backoff: RetryStrategy,
}

impl NextIdConfig {
    /// Configuration for the given sequence with default settings.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            num_tries: 3,
            backoff: RetryStrategy::default(),
        }
    }
}

/// Distributed monotonically increasing ID generator.
///
/// Within a single process's sequence of successful [`next`](Self::next)
/// calls the returned integers strictly increase. No gap-free numbering is
/// promised.
pub struct NextId {
    key: String,
    config: NextIdConfig,
    masters: Vec<Arc<dyn Master>>,
}

impl NextId {
    /// Create a generator handle over the given masters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] unless the master count is odd and
    /// at least 1.
    pub fn new(config: NextIdConfig, masters: Vec<Arc<dyn Master>>) -> Result<Self> {
        if masters.is_empty() {
            return Err(Error::Configuration(
                "a NextId sequence needs at least one master".into(),
            ));
        }
        if masters.len() % 2 == 0 {
            return Err(Error::Configuration(format!(
                "the master count must be odd, got {}",
                masters.len()
            )));
        }
        Ok(Self {
            key: format!("{KEY_PREFIX}:{}", config.key),
            config,
            masters,
        })
    }

    /// The namespaced Redis key holding this sequence's counters.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Produce the next identifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QuorumNotAchieved`] when fewer than a majority of
    /// masters commit an increment in every round.
    pub async fn next(&self) -> Result<u64> {
        let n = self.masters.len();
        let mut last_granted = 0;

        for attempt in 0..self.config.num_tries {
            let results = fan_out(&self.masters, |master| {
                let key = self.key.clone();
                async move { master.fetch_increment(&key).await }
            })
            .await;

            let committed: Vec<Option<u64>> =
                results.into_iter().map(std::result::Result::ok).collect();
            let granted = committed.iter().flatten().count();
            last_granted = granted;

            if has_quorum(granted, n) {
                // The committed values may disagree when masters have seen
                // different rounds; the quorum maximum wins.
                let id = committed.iter().flatten().copied().max().unwrap_or(0);
                self.propagate(id, &committed);
                return Ok(id);
            }

            debug!(
                key = %self.key,
                granted,
                attempt,
                "increment round missed quorum"
            );
            if attempt + 1 < self.config.num_tries {
                tokio::time::sleep(self.config.backoff.delay_for(attempt)).await;
            }
        }

        Err(Error::QuorumNotAchieved {
            key: self.key.clone(),
            granted: last_granted,
            required: quorum(n),
        })
    }

    /// Bring lagging masters up to `id` in the background, so later rounds
    /// observe it. Raising never lowers a counter, so a stale propagation
    /// is harmless.
    fn propagate(&self, id: u64, committed: &[Option<u64>]) {
        for (master, value) in self.masters.iter().zip(committed) {
            if value.is_some_and(|v| v >= id) {
                continue;
            }
            let master = Arc::clone(master);
            let key = self.key.clone();
            tokio::spawn(async move {
                if let Err(err) = master.raise_to(&key, id).await {
                    warn!(
                        master = master.name(),
                        key = %key,
                        error = %err,
                        "forward propagation failed"
                    );
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use cairn_memory::{FailingMaster, MemoryMaster};

    use super::*;

    fn generator(key: &str, masters: Vec<Arc<dyn Master>>) -> NextId {
        NextId::new(NextIdConfig::new(key), masters).expect("valid config")
    }

    #[test]
    fn master_count_must_be_odd_and_nonzero() {
        assert!(matches!(
            NextId::new(NextIdConfig::new("user-ids"), Vec::new()),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            NextId::new(NextIdConfig::new("user-ids"), MemoryMaster::cluster(4)),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn keys_are_namespaced() {
        let ids = generator("user-ids", MemoryMaster::cluster(1));
        assert_eq!(ids.key(), "nextid:user-ids");
    }

    #[tokio::test]
    async fn fresh_sequence_counts_from_one() {
        let ids = generator("user-ids", MemoryMaster::cluster(3));
        assert_eq!(ids.next().await.unwrap(), 1);
        assert_eq!(ids.next().await.unwrap(), 2);
        assert_eq!(ids.next().await.unwrap(), 3);
        assert_eq!(ids.next().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn two_handles_interleave_strictly_increasing() {
        let masters = MemoryMaster::cluster(3);
        let ids1 = generator("user-ids", masters.clone());
        let ids2 = generator("user-ids", masters);

        let mut last = 0;
        for round in 0..5 {
            let handle = if round % 2 == 0 { &ids1 } else { &ids2 };
            let id = handle.next().await.unwrap();
            assert!(id > last, "id {id} should exceed {last}");
            last = id;
        }
    }

    #[tokio::test]
    async fn survives_a_minority_of_failed_masters() {
        let mut masters = MemoryMaster::cluster(2);
        masters.push(Arc::new(FailingMaster::new("down-0")));
        let ids = generator("user-ids", masters);

        assert_eq!(ids.next().await.unwrap(), 1);
        assert_eq!(ids.next().await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn quorum_loss_surfaces_after_retries() {
        let mut masters = MemoryMaster::cluster(2);
        for i in 0..3 {
            masters.push(Arc::new(FailingMaster::new(format!("down-{i}"))));
        }
        let ids = generator("user-ids", masters);

        match ids.next().await {
            Err(Error::QuorumNotAchieved {
                granted, required, ..
            }) => {
                assert_eq!(granted, 2);
                assert_eq!(required, 3);
            }
            other => panic!("expected QuorumNotAchieved, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn lagging_masters_catch_up() {
        let leader = Arc::new(MemoryMaster::new("memory-0"));
        let follower = Arc::new(MemoryMaster::new("memory-1"));
        let third = Arc::new(MemoryMaster::new("memory-2"));
        let masters: Vec<Arc<dyn Master>> = vec![
            Arc::clone(&leader) as Arc<dyn Master>,
            Arc::clone(&follower) as Arc<dyn Master>,
            Arc::clone(&third) as Arc<dyn Master>,
        ];
        let ids = generator("user-ids", masters);

        // Skew the leader ahead, as if earlier rounds only committed there.
        for _ in 0..5 {
            leader.fetch_increment("nextid:user-ids").await.unwrap();
        }

        assert_eq!(ids.next().await.unwrap(), 6);

        // Let the background propagation tasks run.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(follower.fetch_increment("nextid:user-ids").await.unwrap() >= 7);

        assert_eq!(ids.next().await.unwrap(), 8);
    }
}
