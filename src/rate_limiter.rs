//! Token-bucket throttle applied before remote routing calls.
//!
//! Tokens refill continuously at `rate_per_sec` up to `burst`. A request
//! takes one token. Safe to share via `Arc<TokenBucket>` across threads.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

/// Slowest supported refill rate. Lower configured rates are raised to it.
pub const MIN_RATE_PER_SEC: f64 = 0.01;

/// Upper bound for a single computed wait.
const MAX_WAIT: Duration = Duration::from_secs(100);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    pub rate_per_sec: f64,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rate_per_sec: 10.0,
            burst: 10,
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct TokenBucket {
    rate_per_sec: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl TokenBucket {
    /// Rates below `MIN_RATE_PER_SEC` (or NaN) are raised to it; the bucket
    /// starts full.
    pub fn new(config: RateLimitConfig) -> Self {
        Self::new_at(config, Instant::now())
    }

    pub fn new_at(config: RateLimitConfig, now: Instant) -> Self {
        let burst = f64::from(config.burst.max(1));
        Self {
            rate_per_sec: config.rate_per_sec.max(MIN_RATE_PER_SEC),
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: now,
            }),
        }
    }

    /// Takes a token if one is available.
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    pub fn allow_at(&self, now: Instant) -> bool {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket, now);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Time until the next token is available.
    pub fn wait_time(&self) -> Duration {
        self.wait_time_at(Instant::now())
    }

    pub fn wait_time_at(&self, now: Instant) -> Duration {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket, now);
        self.deficit(&bucket)
    }

    /// Blocks until a token is taken.
    pub fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock();
                self.refill(&mut bucket, Instant::now());
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                self.deficit(&bucket)
            };
            debug!(wait_ms = wait.as_millis() as u64, "rate limited, waiting for token");
            std::thread::sleep(wait);
        }
    }

    fn deficit(&self, bucket: &Bucket) -> Duration {
        if bucket.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64((1.0 - bucket.tokens) / self.rate_per_sec)
                .map_or(MAX_WAIT, |wait| wait.min(MAX_WAIT))
        }
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(self.burst);
            bucket.last_refill = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(rate: f64, burst: u32) -> RateLimitConfig {
        RateLimitConfig {
            rate_per_sec: rate,
            burst,
        }
    }

    #[test]
    fn test_burst_then_limited() {
        let t0 = Instant::now();
        let bucket = TokenBucket::new_at(config(1.0, 3), t0);
        assert!(bucket.allow_at(t0));
        assert!(bucket.allow_at(t0));
        assert!(bucket.allow_at(t0));
        assert!(!bucket.allow_at(t0));
    }

    #[test]
    fn test_refills_over_time() {
        let t0 = Instant::now();
        let bucket = TokenBucket::new_at(config(2.0, 1), t0);
        assert!(bucket.allow_at(t0));
        assert!(!bucket.allow_at(t0 + Duration::from_millis(200)));
        assert!(bucket.allow_at(t0 + Duration::from_millis(600)));
    }

    #[test]
    fn test_refill_capped_at_burst() {
        let t0 = Instant::now();
        let bucket = TokenBucket::new_at(config(100.0, 2), t0);
        let later = t0 + Duration::from_secs(60);
        assert!(bucket.allow_at(later));
        assert!(bucket.allow_at(later));
        assert!(!bucket.allow_at(later));
    }

    #[test]
    fn test_wait_time() {
        let t0 = Instant::now();
        let bucket = TokenBucket::new_at(config(4.0, 1), t0);
        assert_eq!(bucket.wait_time_at(t0), Duration::ZERO);
        assert!(bucket.allow_at(t0));
        let wait = bucket.wait_time_at(t0);
        assert!((wait.as_secs_f64() - 0.25).abs() < 1e-9, "wait was {:?}", wait);
    }

    #[test]
    fn test_acquire_blocks_until_refill() {
        let bucket = TokenBucket::new(config(50.0, 1));
        bucket.acquire();
        let started = Instant::now();
        bucket.acquire();
        assert!(started.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_tiny_rate_is_raised_to_minimum() {
        let t0 = Instant::now();
        let bucket = TokenBucket::new_at(config(1e-300, 1), t0);
        assert!(bucket.allow_at(t0));
        let wait = bucket.wait_time_at(t0);
        assert!(wait >= Duration::from_secs(99) && wait <= Duration::from_secs(100));

        let nan = TokenBucket::new_at(config(f64::NAN, 1), t0);
        assert!(nan.allow_at(t0));
        assert!(nan.wait_time_at(t0) <= Duration::from_secs(100));
    }
}
