//! Token-bucket rate limiting for provider calls

use parking_lot::Mutex;
use std::time::Instant;

use crate::error::{Error, Result};

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A simple token bucket: `capacity` calls per minute, refilled continuously.
/// A capacity of zero disables limiting.
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn per_minute(calls: u32) -> Self {
        let capacity = calls as f64;
        Self {
            capacity,
            refill_per_sec: capacity / 60.0,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token, or fail with `ProviderBusy` when the bucket is dry.
    pub fn acquire(&self, provider: &str) -> Result<()> {
        if self.capacity == 0.0 {
            return Ok(());
        }
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            Err(Error::ProviderBusy(format!(
                "{provider} rate limit exceeded"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_never_limits() {
        let bucket = TokenBucket::per_minute(0);
        for _ in 0..1000 {
            bucket.acquire("test").unwrap();
        }
    }

    #[test]
    fn exhausted_bucket_reports_busy() {
        let bucket = TokenBucket::per_minute(2);
        bucket.acquire("test").unwrap();
        bucket.acquire("test").unwrap();
        let err = bucket.acquire("test").unwrap_err();
        assert!(matches!(err, Error::ProviderBusy(_)));
    }
}
