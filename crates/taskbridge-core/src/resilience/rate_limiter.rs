//! Token-bucket rate limiter.
//!
//! Tokens refill continuously based on elapsed wall time, capped at the
//! bucket capacity. `acquire` removes one token, waiting for the next
//! refill when the bucket is empty.

use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket limiter shared by all calls to one upstream.
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a limiter with `capacity` tokens refilling at
    /// `refill_per_sec` tokens per second. The bucket starts full.
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity: f64::from(capacity),
            refill_per_sec,
            bucket: Mutex::new(Bucket {
                tokens: f64::from(capacity),
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token, waiting for a refill when none is available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                self.refill(&mut bucket);

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                // Time until the deficit is refilled.
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.refill_per_sec)
            };
            sleep(wait).await;
        }
    }

    /// Tokens currently available (after applying elapsed refill).
    pub async fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);
        bucket.tokens
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn back_to_back_calls_are_spaced_by_the_refill_rate() {
        let limiter = RateLimiter::new(1, 1.0);
        let start = Instant::now();

        for _ in 0..4 {
            limiter.acquire().await;
        }

        // Capacity 1 at 1/s: three of the four calls each wait a full second.
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn burst_up_to_capacity_does_not_wait() {
        let limiter = RateLimiter::new(3, 1.0);
        let start = Instant::now();

        for _ in 0..3 {
            limiter.acquire().await;
        }

        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn bucket_is_capped_at_capacity() {
        let limiter = RateLimiter::new(2, 10.0);

        // Long idle period must not accumulate more than capacity.
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(limiter.available().await <= 2.0);
    }
}
