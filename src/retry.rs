//! Bounded retry with exponential back-off

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::GitError;

const BACKOFF_FACTOR: u32 = 2;

/// Runs `op` up to `max_attempts` times, sleeping between attempts with an
/// exponentially growing delay. `recoverable` decides per failure whether
/// another attempt is worth it; the last error is returned otherwise.
pub async fn with_backoff<T, F, Fut, R>(
    max_attempts: u32,
    initial_delay: Duration,
    mut op: F,
    mut recoverable: R,
) -> Result<T, GitError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, GitError>>,
    R: FnMut(&GitError, u32, u32) -> bool,
{
    let max_attempts = max_attempts.max(1);
    let mut delay = initial_delay;

    for attempt in 1..=max_attempts {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !recoverable(&err, attempt, max_attempts) {
                    if attempt == max_attempts && max_attempts > 1 {
                        warn!(attempts = max_attempts, error = %err, "giving up after final attempt");
                    }
                    return Err(err);
                }
                info!(attempt, delay_ms = delay.as_millis() as u64, error = %err,
                    "attempt failed, will repeat");
                tokio::time::sleep(delay).await;
                // back off starting from the second wait
                delay *= BACKOFF_FACTOR;
            }
        }
    }

    Err(GitError::Config(
        "retry loop exhausted without a terminal result".into(),
    ))
}
