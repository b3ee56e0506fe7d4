//! Retry Backoff - delay calculation and eligibility
//!
//! The engine drives the retry loop itself (it owns the node records and
//! event emission); this module answers the two pure questions:
//! how long to wait before attempt N+1, and whether the error qualifies.
//!
//! Delays:
//! - fixed:       `base`
//! - linear:      `base * attempt`
//! - exponential: `min(max_delay, base * 2^(attempt-1))`
//!
//! with optional jitter multiplying the delay by `1 ± j`.

use std::time::Duration;

use crate::ast::{Backoff, RetryPolicyDef};
use crate::error::StrandError;

/// Delay before the retry that follows `attempt` (1-based: attempt 1 is
/// the first, failed, call).
pub fn backoff_delay(policy: &RetryPolicyDef, attempt: u32) -> Duration {
    let attempt = attempt.max(1);
    let base = policy.base_delay_ms as f64;
    let raw = match policy.backoff {
        Backoff::Fixed => base,
        Backoff::Linear => base * attempt as f64,
        Backoff::Exponential => base * 2f64.powi(attempt as i32 - 1),
    };
    let capped = raw.min(policy.max_delay_ms as f64);

    let jittered = match policy.jitter {
        Some(j) if j > 0.0 => {
            let offset = (rand::random::<f64>() * 2.0 - 1.0) * j;
            (capped * (1.0 + offset)).max(0.0)
        }
        _ => capped,
    };

    Duration::from_millis(jittered as u64)
}

/// Whether another attempt is allowed after `attempt` failures.
///
/// `max_attempts` counts every attempt including the first; 0 and 1 both
/// mean "no retry". An explicit `retryable_errors` list overrides the
/// error's own retryable flag.
pub fn should_retry(policy: &RetryPolicyDef, error: &StrandError, attempt: u32) -> bool {
    if attempt >= policy.max_attempts.max(1) {
        return false;
    }
    if policy.retryable_errors.is_empty() {
        error.is_retryable()
    } else {
        policy.retryable_errors.contains(&error.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AgentErrorKind, ErrorKind};

    fn policy(backoff: Backoff, base: u64, max: u64) -> RetryPolicyDef {
        RetryPolicyDef {
            max_attempts: 3,
            backoff,
            base_delay_ms: base,
            max_delay_ms: max,
            jitter: None,
            retryable_errors: vec![],
        }
    }

    fn retryable_error() -> StrandError {
        StrandError::Agent {
            kind: AgentErrorKind::Execution,
            agent_id: "a".into(),
            reason: "transient".into(),
        }
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let p = policy(Backoff::Fixed, 100, 10_000);
        assert_eq!(backoff_delay(&p, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(&p, 5), Duration::from_millis(100));
    }

    #[test]
    fn linear_backoff_scales_with_attempt() {
        let p = policy(Backoff::Linear, 100, 10_000);
        assert_eq!(backoff_delay(&p, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(&p, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(&p, 3), Duration::from_millis(300));
    }

    #[test]
    fn exponential_backoff_doubles() {
        let p = policy(Backoff::Exponential, 100, 10_000);
        assert_eq!(backoff_delay(&p, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(&p, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(&p, 3), Duration::from_millis(400));
        assert_eq!(backoff_delay(&p, 4), Duration::from_millis(800));
    }

    #[test]
    fn exponential_respects_max_delay() {
        let p = policy(Backoff::Exponential, 100, 500);
        assert_eq!(backoff_delay(&p, 3), Duration::from_millis(400));
        assert_eq!(backoff_delay(&p, 4), Duration::from_millis(500));
        assert_eq!(backoff_delay(&p, 10), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut p = policy(Backoff::Fixed, 100, 10_000);
        p.jitter = Some(0.5);
        for _ in 0..100 {
            let d = backoff_delay(&p, 1);
            assert!(d >= Duration::from_millis(50), "got {:?}", d);
            assert!(d <= Duration::from_millis(150), "got {:?}", d);
        }
    }

    #[test]
    fn retry_stops_at_max_attempts() {
        let p = policy(Backoff::Fixed, 1, 10);
        let err = retryable_error();
        assert!(should_retry(&p, &err, 1));
        assert!(should_retry(&p, &err, 2));
        assert!(!should_retry(&p, &err, 3));
    }

    #[test]
    fn zero_max_attempts_means_no_retry() {
        let mut p = policy(Backoff::Fixed, 1, 10);
        p.max_attempts = 0;
        assert!(!should_retry(&p, &retryable_error(), 1));
    }

    #[test]
    fn non_retryable_error_is_not_retried() {
        let p = policy(Backoff::Fixed, 1, 10);
        let err = StrandError::Validation {
            reason: "bad".into(),
        };
        assert!(!should_retry(&p, &err, 1));
    }

    #[test]
    fn explicit_kinds_override_retryable_flag() {
        let mut p = policy(Backoff::Fixed, 1, 10);
        p.retryable_errors = vec![ErrorKind::Tool];

        // Tool error with retryable=false still retried: the list rules
        let tool_err = StrandError::Tool {
            tool_id: "t".into(),
            reason: "x".into(),
            retryable: false,
        };
        assert!(should_retry(&p, &tool_err, 1));

        // Retryable agent error excluded by the list
        assert!(!should_retry(&p, &retryable_error(), 1));
    }
}
