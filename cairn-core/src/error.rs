use thiserror::Error;

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from cairn primitives.
///
/// Transport-level failures (`Connection`, `Backend`, `Timeout`) are absorbed
/// by the quorum layer and counted as per-master failures; they only surface
/// from single-endpoint primitives such as the cache and the sketches.
#[derive(Debug, Error)]
pub enum Error {
    #[error("value cannot be canonically encoded: {0}")]
    Encoding(String),

    #[error("quorum not achieved for '{key}': {granted} of {required} masters")]
    QuorumNotAchieved {
        key: String,
        granted: usize,
        required: usize,
    },

    #[error("optimistic transaction on '{key}' aborted {attempts} times")]
    Contention { key: String, attempts: u32 },

    #[error("released a lock that is not held: '{0}'")]
    ReleaseUnlocked(String),

    #[error("extended a lock that is not held: '{0}'")]
    ExtendUnlocked(String),

    #[error("lock '{0}' is already held by this handle")]
    AlreadyAcquired(String),

    #[error("lock '{key}' has already been extended {limit} times")]
    TooManyExtensions { key: String, limit: u32 },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("wrapped callable failed: {0}")]
    Callable(String),
}
