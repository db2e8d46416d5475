use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tracing::debug;

use cairn_core::Result;

use crate::master::Master;

/// Issue one operation per master concurrently and join the results.
///
/// The returned vector is in master order. Per-master transport errors are
/// logged at debug level and handed back as `Err` entries; quorum callers
/// count them as failed masters rather than surfacing them.
pub async fn fan_out<T, F, Fut>(masters: &[Arc<dyn Master>], op: F) -> Vec<Result<T>>
where
    F: Fn(Arc<dyn Master>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let results = join_all(masters.iter().map(|master| op(Arc::clone(master)))).await;

    for (master, result) in masters.iter().zip(&results) {
        if let Err(err) = result {
            debug!(master = master.name(), error = %err, "master call failed");
        }
    }

    results
}
