//! Rate Limiting - token bucket per resource key
//!
//! Buckets refill in discrete intervals: `refill` tokens every
//! `interval`, capped at `capacity`. Completed requests in any window of
//! length W for a key are bounded by `capacity + ceil(W / interval) * refill`.
//!
//! Acquisition is cooperative: `acquire` waits (without holding any
//! scheduler slot) up to `max_wait`, `try_acquire` never waits.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StrandError};

/// Token bucket parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum tokens (burst)
    pub capacity: u32,
    /// Tokens added per interval
    pub refill: u32,
    /// Refill interval in milliseconds
    pub interval_ms: u64,
    /// Maximum time `acquire` will wait
    #[serde(default = "default_max_wait")]
    pub max_wait_ms: u64,
}

fn default_max_wait() -> u64 {
    30_000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 20,
            refill: 10,
            interval_ms: 1_000,
            max_wait_ms: default_max_wait(),
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

/// Token-bucket rate limiter for one resource key
pub struct RateLimiter {
    key: String,
    config: RateLimitConfig,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(key: impl Into<String>, config: RateLimitConfig) -> Self {
        let tokens = config.capacity;
        Self {
            key: key.into(),
            config,
            bucket: Mutex::new(Bucket {
                tokens,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current tokens after refill accounting
    pub fn available(&self) -> u32 {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        bucket.tokens
    }

    /// Take one token without waiting
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Take one token, waiting for refills up to `max_wait_ms`
    pub async fn acquire(&self) -> Result<()> {
        let start = Instant::now();
        let max_wait = Duration::from_millis(self.config.max_wait_ms);
        let interval = Duration::from_millis(self.config.interval_ms.max(1));

        loop {
            if self.try_acquire() {
                return Ok(());
            }
            if start.elapsed() >= max_wait {
                return Err(StrandError::RateLimitExceeded {
                    resource: self.key.clone(),
                    reason: format!("waited {}ms for a token", max_wait.as_millis()),
                });
            }
            // Sleep until the next refill boundary, but stay responsive
            let sleep = interval.min(Duration::from_millis(50)).max(Duration::from_millis(1));
            tokio::time::sleep(sleep).await;
        }
    }

    /// Discrete refill: whole intervals only
    fn refill(&self, bucket: &mut Bucket) {
        let interval = Duration::from_millis(self.config.interval_ms.max(1));
        let elapsed = bucket.last_refill.elapsed();
        let intervals = (elapsed.as_millis() / interval.as_millis()) as u32;
        if intervals == 0 {
            return;
        }
        let added = intervals.saturating_mul(self.config.refill);
        bucket.tokens = bucket.tokens.saturating_add(added).min(self.config.capacity);
        bucket.last_refill += interval * intervals;
    }

    /// Restore full capacity (testing)
    pub fn reset(&self) {
        let mut bucket = self.bucket.lock();
        bucket.tokens = self.config.capacity;
        bucket.last_refill = Instant::now();
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("key", &self.key)
            .field("capacity", &self.config.capacity)
            .field("refill", &self.config.refill)
            .field("interval_ms", &self.config.interval_ms)
            .finish()
    }
}

/// Per-key limiter registry. Keys without a configured limit get no
/// limiter at all (unlimited).
#[derive(Default)]
pub struct RateLimiterRegistry {
    limiters: DashMap<String, Arc<RateLimiter>>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a limit for a resource key
    pub fn configure(&self, key: &str, config: RateLimitConfig) {
        self.limiters
            .insert(key.to_string(), Arc::new(RateLimiter::new(key, config)));
    }

    /// Limiter for a key, if one is configured
    pub fn get(&self, key: &str) -> Option<Arc<RateLimiter>> {
        self.limiters.get(key).map(|l| Arc::clone(&l))
    }
}
