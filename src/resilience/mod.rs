//! Resilience patterns for fault-tolerant node execution
//!
//! This module provides:
//! - [`retry`]: backoff delay calculation and retry eligibility
//! - [`circuit_breaker`]: per-resource-key breaker with rolling window
//! - [`rate_limiter`]: token-bucket limiting per resource key
//! - [`handler`]: ordered error-handler chain (pattern + kind → policy)

mod circuit_breaker;
mod handler;
mod rate_limiter;
mod retry;

pub use circuit_breaker::{BreakerRegistry, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use handler::HandlerChain;
pub use rate_limiter::{RateLimitConfig, RateLimiter, RateLimiterRegistry};
pub use retry::{backoff_delay, should_retry};
