//! Per-caller token-bucket rate limiting. Buckets live in process; the
//! only durable state in this platform is the cluster object store, so
//! limits are per-replica by design.

use std::{
    collections::HashMap,
    ops::Deref,
    sync::{Arc, Mutex},
    time::Instant,
};

use crate::args::RateLimiterArgs;

pub mod middleware;

#[derive(Clone, Debug)]
pub struct RateLimiterConfig {
    /// Sustained requests per second per caller.
    pub rps: f64,
    /// Bucket capacity; short bursts above `rps` up to this many.
    pub burst: f64,
}

impl From<RateLimiterArgs> for RateLimiterConfig {
    fn from(args: RateLimiterArgs) -> Self {
        Self {
            rps: args.rate_limit_rps,
            burst: args.rate_limit_burst,
        }
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            rps: 100.0,
            burst: 200.0,
        }
    }
}

struct Bucket {
    tokens: f64,
    refilled: Instant,
}

pub struct RateLimiterInner {
    buckets: Mutex<HashMap<String, Bucket>>,
    config: RateLimiterConfig,
}

#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<RateLimiterInner>,
}

impl Deref for RateLimiter {
    type Target = RateLimiterInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

// Bound on tracked callers before stale buckets get swept.
const MAX_BUCKETS: usize = 10_000;

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            inner: Arc::new(RateLimiterInner {
                buckets: Mutex::new(HashMap::new()),
                config,
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RateLimiterConfig::default())
    }

    /// Returns true if the request is allowed, false if limited.
    pub fn check(&self, key: &str) -> bool {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> bool {
        // A poisoned lock only means some other thread panicked while
        // holding it; the map itself is still usable.
        let mut buckets = self
            .buckets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if buckets.len() >= MAX_BUCKETS && !buckets.contains_key(key) {
            let burst = self.config.burst;
            let rps = self.config.rps;
            buckets.retain(|_, b| {
                b.tokens + now.duration_since(b.refilled).as_secs_f64() * rps < burst
            });
        }
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.config.burst,
            refilled: now,
        });
        let elapsed = now.duration_since(bucket.refilled).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.config.rps).min(self.config.burst);
        bucket.refilled = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limiter(rps: f64, burst: f64) -> RateLimiter {
        RateLimiter::new(RateLimiterConfig { rps, burst })
    }

    #[test]
    fn allows_up_to_burst_then_denies() {
        let rl = limiter(10.0, 3.0);
        let now = Instant::now();
        assert!(rl.check_at("a", now));
        assert!(rl.check_at("a", now));
        assert!(rl.check_at("a", now));
        assert!(!rl.check_at("a", now));
    }

    #[test]
    fn refills_at_configured_rate() {
        let rl = limiter(10.0, 1.0);
        let now = Instant::now();
        assert!(rl.check_at("a", now));
        assert!(!rl.check_at("a", now));
        // 100ms at 10 rps refills exactly one token.
        assert!(rl.check_at("a", now + Duration::from_millis(100)));
        assert!(!rl.check_at("a", now + Duration::from_millis(100)));
    }

    #[test]
    fn callers_do_not_share_buckets() {
        let rl = limiter(1.0, 1.0);
        let now = Instant::now();
        assert!(rl.check_at("a", now));
        assert!(rl.check_at("b", now));
        assert!(!rl.check_at("a", now));
    }

    #[test]
    fn refill_never_exceeds_burst() {
        let rl = limiter(100.0, 2.0);
        let now = Instant::now();
        assert!(rl.check_at("a", now));
        let later = now + Duration::from_secs(60);
        assert!(rl.check_at("a", later));
        assert!(rl.check_at("a", later));
        assert!(!rl.check_at("a", later));
    }
}
