//! Optimistic retry for retryable storage conflicts.
//!
//! Jittered exponential backoff, max 3 attempts by default. Only
//! `StorageUnavailable` is retried — everything else propagates on the
//! first failure.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use vg_domain::error::ErrorKind;
use vg_domain::Result;

/// Run `op` until it succeeds, the error is non-retryable, or
/// `max_attempts` is exhausted.
pub async fn with_storage_retries<T, F, Fut>(
    max_attempts: u32,
    base: Duration,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.kind == ErrorKind::StorageUnavailable && attempt < max_attempts => {
                let delay = backoff_with_jitter(base, attempt);
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "storage conflict, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// `base * 2^(attempt-1)` plus up to 50% random jitter.
pub fn backoff_with_jitter(base: Duration, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let scaled = base.as_millis() as u64 * (1u64 << exp);
    let jitter = rand::thread_rng().gen_range(0..=scaled / 2);
    Duration::from_millis(scaled + jitter)
}
