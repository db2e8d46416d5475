use std::time::Duration;

/// Configuration for a [`Redlock`](crate::Redlock) handle.
#[derive(Debug, Clone)]
pub struct RedlockConfig {
    /// Resource name. Used verbatim as the key on every master.
    pub key: String,

    /// Lease length. Also bounds the per-master attempt budget
    /// (`auto_release_time / N`).
    pub auto_release_time: Duration,

    /// Whether `acquire` retries on contention.
    pub blocking: bool,

    /// Maximum wall time to wait when blocking. `None` retries forever.
    pub timeout: Option<Duration>,

    /// Whether the guard idiom blocks on contention.
    pub context_manager_blocking: bool,

    /// Maximum wall time the guard idiom waits when blocking.
    pub context_manager_timeout: Option<Duration>,

    /// Upper bound on how many times one acquisition may be extended.
    pub num_extensions: u32,

    /// Fractional allowance for clock skew between masters.
    pub clock_drift_factor: f64,

    /// Upper bound of the randomized delay between blocking retries.
    pub retry_delay: Duration,
}

impl RedlockConfig {
    /// Configuration for the given resource with default settings.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            auto_release_time: Duration::from_millis(10_000),
            blocking: true,
            timeout: None,
            context_manager_blocking: true,
            context_manager_timeout: None,
            num_extensions: 3,
            clock_drift_factor: 0.01,
            retry_delay: Duration::from_millis(200),
        }
    }
}
