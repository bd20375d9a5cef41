//! Retry policy for store writes.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::store::StoreError;

/// Total attempts per operation, the first one included.
pub const MAX_ATTEMPTS: u32 = 5;
/// Delay before the first retry; doubled after every failed attempt.
pub const INITIAL_DELAY: Duration = Duration::from_secs(1);
/// Upper bound on the backoff delay.
pub const MAX_DELAY: Duration = Duration::from_secs(30);

/// Runs `attempt` until it succeeds, it fails permanently, or the attempt
/// budget is spent. Only errors classified retryable are retried. The sleeps
/// between attempts are plain awaits, so dropping the returned future (a
/// disconnected client, for instance) interrupts them.
pub async fn with_retry<F, Fut>(operation: &'static str, mut attempt: F) -> Result<(), StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), StoreError>>,
{
    let mut delay = INITIAL_DELAY;
    let mut attempts = 1;
    loop {
        match attempt().await {
            Ok(()) => return Ok(()),
            Err(error) if error.is_retryable() && attempts < MAX_ATTEMPTS => {
                warn!(
                    %error,
                    attempt = attempts,
                    max_attempts = MAX_ATTEMPTS,
                    retry_in_secs = delay.as_secs(),
                    operation,
                    "Store operation failed; backing off.",
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
                attempts += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_until_success_with_doubling_delays() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        with_retry("test op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StoreError::retryable("transient"))
                } else {
                    Ok(())
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1 s + 2 s of backoff before the third attempt.
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_short_circuit() {
        let calls = AtomicU32::new(0);

        let result = with_retry("test op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::permanent("rejected")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_the_attempt_budget() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let result = with_retry("test op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::retryable("still down")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
        // 1 + 2 + 4 + 8 seconds of backoff across five attempts.
        assert!(started.elapsed() >= Duration::from_secs(15));
    }
}
