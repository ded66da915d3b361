use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Clone, Debug)]
pub struct Limits {
    pub requests_per_min: u64,
    /// Bucket capacity: how many requests may go out back to back after idling.
    pub burst: u64,
}

/// Token bucket shared by every caller of the oracle. Requests are serialized:
/// the lock is held while waiting, so callers queue in arrival order.
#[derive(Debug)]
pub struct RateLimiter {
    limits: Limits,
    // token buckets are modeled by the time of last refill and the current tokens
    bucket: Mutex<(f64, Instant)>,
}

impl RateLimiter {
    pub fn new(limits: Limits) -> Self {
        let capacity = limits.burst.max(1) as f64;
        Self {
            limits,
            bucket: Mutex::new((capacity, Instant::now())),
        }
    }

    /// Wait until one request may be sent.
    pub async fn acquire(&self) {
        let capacity = self.limits.burst.max(1) as f64;
        let refill_rate = self.limits.requests_per_min.max(1) as f64 / 60.0; // tokens per second

        let mut guard = self.bucket.lock().await;
        loop {
            let (ref mut tokens, ref mut last) = *guard;
            let now = Instant::now();
            let elapsed = now.duration_since(*last).as_secs_f64();
            *tokens = (*tokens + elapsed * refill_rate).min(capacity);
            *last = now;
            if *tokens >= 1.0 {
                *tokens -= 1.0;
                return;
            }
            let need = 1.0 - *tokens;
            tokio::time::sleep(Duration::from_secs_f64((need / refill_rate).max(0.001))).await;
        }
    }
}
