//! Retry with exponential backoff.

use std::future::Future;

use tokio::time::{sleep, Duration};

/// Delay before the attempt following failure number `attempt` (1-indexed).
///
/// The k-th inter-attempt delay is `min(base * 2^(k-1), cap)`.
pub fn backoff_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(cap)
}

/// Run `op` up to `max_attempts` times with exponential backoff between
/// attempts. The final attempt's error is propagated unchanged.
pub async fn retry_with_backoff<T, E, F, Fut>(
    mut op: F,
    max_attempts: u32,
    base: Duration,
    cap: Duration,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max_attempts => return Err(e),
            Err(_) => {
                let delay = backoff_delay(base, cap, attempt);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying");
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
