//! Token-bucket rate limiting

use parking_lot::Mutex;
use sluice_core::Clock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Whole tokens left after the check
    pub remaining: u64,
}

/// Per-key request admission
pub trait RateLimiter: Send + Sync + fmt::Debug {
    /// Take one token from the bucket for `key`
    fn allow(&self, key: &str) -> Decision;
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_update: Instant,
}

/// Fixed-rate bucket with a burst cap; starts full
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    clock: Arc<dyn Clock>,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Bucket refilling `rate` tokens per second up to `burst`
    pub fn new(rate: f64, burst: u64, clock: Arc<dyn Clock>) -> Self {
        let burst = burst as f64;
        let last_update = clock.now();
        Self {
            rate,
            burst,
            clock,
            state: Mutex::new(BucketState {
                tokens: burst,
                last_update,
            }),
        }
    }

    /// Refill by elapsed time, then try to take one token
    pub fn allow(&self) -> Decision {
        let mut state = self.state.lock();
        let now = self.clock.now();
        let elapsed = now.saturating_duration_since(state.last_update).as_secs_f64();

        state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
        state.last_update = now;

        let allowed = state.tokens >= 1.0;
        if allowed {
            state.tokens -= 1.0;
        }
        Decision {
            allowed,
            remaining: state.tokens.floor() as u64,
        }
    }

    /// Current fractional token count, without refilling
    pub fn tokens(&self) -> f64 {
        self.state.lock().tokens
    }
}

impl fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBucket")
            .field("rate", &self.rate)
            .field("burst", &self.burst)
            .field("tokens", &self.tokens())
            .finish()
    }
}

/// One token bucket per key, created on first use and never evicted
pub struct InMemoryLimiter {
    rate: f64,
    burst: u64,
    clock: Arc<dyn Clock>,
    buckets: Mutex<HashMap<String, Arc<TokenBucket>>>,
}

impl InMemoryLimiter {
    /// Limiter whose buckets refill `rate` tokens per second up to `burst`
    pub fn new(rate: f64, burst: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            rate,
            burst,
            clock,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Number of keys seen so far
    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().len()
    }

    fn bucket(&self, key: &str) -> Arc<TokenBucket> {
        let mut buckets = self.buckets.lock();
        if let Some(bucket) = buckets.get(key) {
            return bucket.clone();
        }
        let bucket = Arc::new(TokenBucket::new(self.rate, self.burst, self.clock.clone()));
        buckets.insert(key.to_string(), bucket.clone());
        bucket
    }
}

impl RateLimiter for InMemoryLimiter {
    fn allow(&self, key: &str) -> Decision {
        self.bucket(key).allow()
    }
}

impl fmt::Debug for InMemoryLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryLimiter")
            .field("rate", &self.rate)
            .field("burst", &self.burst)
            .field("buckets", &self.bucket_count())
            .finish()
    }
}
