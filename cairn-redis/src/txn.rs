//! Scoped optimistic transactions.
//!
//! A scope WATCHes a set of keys on one pooled connection, reads their
//! current values, lets a pure closure compute the writes to stage and a
//! result to hand back, then commits with MULTI/EXEC. Redis aborts the EXEC
//! (nil reply) if any watched key changed after the WATCH, in which case the
//! whole scope is retried from the top under the configured backoff.

use deadpool_redis::Pool;
use tracing::debug;

use cairn_core::{Error, Result, RetryStrategy};

/// Retry policy for an optimistic scope.
#[derive(Debug, Clone)]
pub struct TxnOptions {
    /// How many times an aborted scope is retried before giving up.
    pub max_retries: u32,
    /// Delay curve between retries.
    pub backoff: RetryStrategy,
}

impl Default for TxnOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: RetryStrategy::default(),
        }
    }
}

/// The outcome of one scope computation: the writes to commit atomically
/// and the value to return to the caller once they commit.
#[derive(Debug)]
pub struct Staged<T> {
    /// Key/value pairs staged as plain SETs.
    pub writes: Vec<(String, String)>,
    /// Returned from [`optimistic`] when the commit succeeds.
    pub output: T,
}

/// Run `scope` against the current values of `keys`, committing its staged
/// writes only if none of the keys changed in between.
///
/// The closure receives the watched keys' values in key order (`None` for
/// absent keys). It is pure: all I/O happens around it. A closure error
/// aborts the scope immediately (UNWATCH) without retrying.
///
/// # Errors
///
/// Returns [`Error::Contention`] when every attempt was invalidated by a
/// concurrent writer, or the closure's own error verbatim.
pub async fn optimistic<T, F>(
    pool: &Pool,
    keys: &[String],
    options: &TxnOptions,
    mut scope: F,
) -> Result<T>
where
    F: FnMut(&[Option<String>]) -> Result<Staged<T>>,
{
    let attempts = options.max_retries + 1;

    for attempt in 0..attempts {
        let mut conn = pool
            .get()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        redis::cmd("WATCH")
            .arg(keys)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| Error::Backend(e.to_string()))?;

        let current: Vec<Option<String>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Backend(e.to_string()))?;

        let staged = match scope(&current) {
            Ok(staged) => staged,
            Err(err) => {
                // Clear the watch before handing the connection back.
                let _ = redis::cmd("UNWATCH").query_async::<()>(&mut conn).await;
                return Err(err);
            }
        };

        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in &staged.writes {
            pipe.set(key, value).ignore();
        }

        // A nil EXEC reply means a watched key changed under us.
        let committed: Option<()> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Backend(e.to_string()))?;

        if committed.is_some() {
            return Ok(staged.output);
        }

        debug!(keys = ?keys, attempt, "optimistic scope aborted, retrying");
        if attempt + 1 < attempts {
            tokio::time::sleep(options.backoff.delay_for(attempt)).await;
        }
    }

    Err(Error::Contention {
        key: keys.join(","),
        attempts,
    })
}
