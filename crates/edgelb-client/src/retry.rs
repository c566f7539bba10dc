//! Polling helper
//!
//! Used to wait for EdgeLB to converge (e.g. until a pool being torn down is
//! really gone) without hammering the API.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Why [`with_timeout`] gave up
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The condition did not hold before the deadline
    #[error("timed out after {0:?} waiting for condition")]
    Timeout(Duration),

    /// The condition itself failed
    #[error(transparent)]
    Condition(E),
}

/// Evaluate `condition` every `interval` until it returns `Ok(true)`.
///
/// Returns as soon as the condition reports an error. The first evaluation
/// happens immediately.
pub async fn with_timeout<F, Fut, E>(
    timeout: Duration,
    interval: Duration,
    mut condition: F,
) -> Result<(), RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let poll = async {
        loop {
            if condition().await.map_err(RetryError::Condition)? {
                return Ok(());
            }
            tokio::time::sleep(interval).await;
        }
    };

    match tokio::time::timeout(timeout, poll).await {
        Ok(result) => result,
        Err(_) => Err(RetryError::Timeout(timeout)),
    }
}
