//! Circuit Breaker - per-resource failure detector
//!
//! # States
//!
//! - **Closed**: normal operation; failures are counted within a rolling
//!   window, reaching the threshold opens the breaker
//! - **Open**: calls rejected immediately with `CircuitOpen` (no wait,
//!   the adapter is never invoked)
//! - **Half-Open**: after the cooldown, exactly one probe call is let
//!   through; success closes the breaker, failure re-opens it
//!
//! One breaker per resource key (`agent:<id>`, `tool:<id>`, provider);
//! keys are resolved through `BreakerRegistry`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{Result, StrandError};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures within the rolling window that open the circuit
    pub failure_threshold: u32,
    /// Rolling window for failure counting
    pub window: Duration,
    /// Time to stay open before allowing a probe
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// Failure timestamps within the rolling window
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    /// Half-open: a probe is already in flight
    probing: bool,
}

/// Circuit breaker for one resource key
pub struct CircuitBreaker {
    key: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(key: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            key: key.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                opened_at: None,
                probing: false,
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Gate a call. `Ok` admits it (and in half-open claims the single
    /// probe slot); `Err(CircuitOpen)` rejects without waiting.
    pub fn try_acquire(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let opened = inner.opened_at.unwrap_or_else(Instant::now);
                if opened.elapsed() >= self.config.cooldown {
                    inner.state = CircuitState::HalfOpen;
                    inner.probing = true;
                    Ok(())
                } else {
                    Err(StrandError::CircuitOpen {
                        resource: self.key.clone(),
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.probing {
                    Err(StrandError::CircuitOpen {
                        resource: self.key.clone(),
                    })
                } else {
                    inner.probing = true;
                    Ok(())
                }
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.failures.clear();
                inner.opened_at = None;
                inner.probing = false;
            }
            CircuitState::Closed => {
                inner.failures.clear();
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        match inner.state {
            CircuitState::Closed => {
                inner.failures.push_back(now);
                let window = self.config.window;
                while inner
                    .failures
                    .front()
                    .is_some_and(|t| now.duration_since(*t) > window)
                {
                    inner.failures.pop_front();
                }
                if inner.failures.len() as u32 >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.probing = false;
            }
            CircuitState::Open => {}
        }
    }

    /// Reset to closed (admin/testing)
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failures.clear();
        inner.opened_at = None;
        inner.probing = false;
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("key", &self.key)
            .field("state", &self.state())
            .finish()
    }
}

/// Per-key breaker registry; breakers are created on first use
#[derive(Default)]
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: CircuitBreakerConfig,
}

impl BreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
        }
    }

    /// Get or create the breaker for a resource key (atomic)
    pub fn get(&self, key: &str) -> Arc<CircuitBreaker> {
        use dashmap::mapref::entry::Entry;
        match self.breakers.entry(key.to_string()) {
            Entry::Occupied(e) => Arc::clone(e.get()),
            Entry::Vacant(e) => {
                let breaker = Arc::new(CircuitBreaker::new(key, self.config.clone()));
                e.insert(Arc::clone(&breaker));
                breaker
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, cooldown: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "k1",
            CircuitBreakerConfig::default()
                .with_failure_threshold(threshold)
                .with_cooldown(cooldown),
        )
    }

    #[test]
    fn starts_closed_and_admits() {
        let b = breaker(5, Duration::from_secs(30));
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(b.try_acquire().is_ok());
    }

    #[test]
    fn opens_at_exact_threshold() {
        let b = breaker(5, Duration::from_secs(30));
        for _ in 0..4 {
            b.record_failure();
            assert_eq!(b.state(), CircuitState::Closed);
        }
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[test]
    fn open_rejects_without_waiting() {
        let b = breaker(1, Duration::from_secs(60));
        b.record_failure();

        let start = Instant::now();
        let err = b.try_acquire().unwrap_err();
        assert!(start.elapsed() < Duration::from_millis(10));
        assert!(err.to_string().contains("STRAND-041"));
    }

    #[test]
    fn success_in_closed_clears_window() {
        let b = breaker(3, Duration::from_secs(30));
        b.record_failure();
        b.record_failure();
        b.record_success();
        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn cooldown_allows_single_probe() {
        let b = breaker(1, Duration::from_millis(50));
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(60)).await;

        // First caller claims the probe slot
        assert!(b.try_acquire().is_ok());
        assert_eq!(b.state(), CircuitState::HalfOpen);
        // Second caller is rejected while the probe is in flight
        assert!(b.try_acquire().is_err());
    }

    #[tokio::test]
    async fn probe_success_closes() {
        let b = breaker(1, Duration::from_millis(10));
        b.record_failure();
        tokio::time::sleep(Duration::from_millis(20)).await;

        b.try_acquire().unwrap();
        b.record_success();
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(b.try_acquire().is_ok());
    }

    #[tokio::test]
    async fn probe_failure_reopens() {
        let b = breaker(1, Duration::from_millis(10));
        b.record_failure();
        tokio::time::sleep(Duration::from_millis(20)).await;

        b.try_acquire().unwrap();
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Open);
        assert!(b.try_acquire().is_err());
    }

    #[test]
    fn rolling_window_expires_old_failures() {
        let b = CircuitBreaker::new(
            "k",
            CircuitBreakerConfig::default()
                .with_failure_threshold(3)
                .with_window(Duration::from_millis(20)),
        );
        b.record_failure();
        b.record_failure();
        std::thread::sleep(Duration::from_millis(30));
        // Old failures fell out of the window; this is 1-of-3, not 3-of-3
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn registry_returns_same_breaker_per_key() {
        let registry = BreakerRegistry::new(CircuitBreakerConfig::default());
        let a = registry.get("agent:gpt");
        let b = registry.get("agent:gpt");
        let c = registry.get("tool:mail");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn reset_closes_breaker() {
        let b = breaker(1, Duration::from_secs(60));
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Open);
        b.reset();
        assert_eq!(b.state(), CircuitState::Closed);
    }
}
