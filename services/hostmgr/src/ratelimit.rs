//! Token-bucket rate limiting for the kill and shutdown paths.

use std::sync::Mutex;
use std::time::Instant;

/// A token bucket refilled at a fixed rate.
///
/// `try_acquire` never blocks: a caller that finds the bucket empty gets a
/// rejection to surface as a resource-exhausted error.
#[derive(Debug)]
pub struct TokenBucket {
    inner: Mutex<BucketState>,
    rate_per_sec: f64,
    burst: f64,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a bucket that refills `rate_per_sec` tokens per second and
    /// holds at most `burst` tokens.
    pub fn new(rate_per_sec: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            inner: Mutex::new(BucketState {
                tokens: burst,
                last_refill: Instant::now(),
            }),
            rate_per_sec: rate_per_sec.max(0.0),
            burst,
        }
    }

    /// Takes `n` tokens if available; returns false when the bucket cannot
    /// cover the request right now.
    pub fn try_acquire(&self, n: u32) -> bool {
        let mut state = self.inner.lock().expect("bucket lock poisoned");
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.burst);
        state.last_refill = now;

        let needed = f64::from(n);
        if state.tokens >= needed {
            state.tokens -= needed;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_empty() {
        let bucket = TokenBucket::new(0.0, 3);
        assert!(bucket.try_acquire(2));
        assert!(bucket.try_acquire(1));
        assert!(!bucket.try_acquire(1));
    }

    #[test]
    fn test_oversized_request_rejected() {
        let bucket = TokenBucket::new(1.0, 2);
        assert!(!bucket.try_acquire(5));
        // The failed request consumed nothing.
        assert!(bucket.try_acquire(2));
    }

    #[test]
    fn test_refill() {
        let bucket = TokenBucket::new(1000.0, 5);
        assert!(bucket.try_acquire(5));
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(bucket.try_acquire(1));
    }
}
