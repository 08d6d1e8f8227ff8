// =============================================================================
// Retry policy — exponential backoff with jitter for provider attempts
// =============================================================================
//
// Applied per adapter inside the composite chain. Validation errors are
// never retried; rate limits are retried only when the upstream's
// retry-after hint fits inside the policy's maximum delay, otherwise the
// chain moves on to the next adapter immediately.
// =============================================================================

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::contracts::EngineError;

/// Backoff tuning for one adapter's retry loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first (1 = no retries).
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_base: f64,
    /// Uniform random jitter added on top of the computed delay.
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 250,
            max_delay_ms: 5_000,
            exponential_base: 2.0,
            jitter_ms: 100,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based: the delay after the
    /// first failed attempt is `delay_for(1)`).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.exponential_base.powi(attempt.saturating_sub(1) as i32);
        let base = (self.initial_delay_ms as f64 * exp) as u64;
        let capped = base.min(self.max_delay_ms);
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(capped + jitter)
    }

    /// Decide how to proceed after `err` on attempt `attempt` (1-based).
    pub fn next_step(&self, err: &EngineError, attempt: u32) -> RetryStep {
        if attempt >= self.max_attempts {
            return RetryStep::GiveUp;
        }
        match err {
            EngineError::ProviderRateLimit { retry_after_secs } => {
                match retry_after_secs {
                    Some(secs) if *secs * 1000 <= self.max_delay_ms => {
                        RetryStep::After(Duration::from_secs(*secs))
                    }
                    // Hint too long (or absent): do not stall the chain.
                    _ => RetryStep::GiveUp,
                }
            }
            e if e.is_retryable() => RetryStep::After(self.delay_for(attempt)),
            _ => RetryStep::GiveUp,
        }
    }
}

/// Outcome of the retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStep {
    /// Sleep this long, then retry the same adapter.
    After(Duration),
    /// Stop retrying this adapter and advance the chain.
    GiveUp,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            exponential_base: 2.0,
            jitter_ms: 0,
        }
    }

    #[test]
    fn delays_grow_exponentially_and_cap() {
        let p = policy();
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(400));
        // 100 * 2^9 far exceeds the cap.
        assert_eq!(p.delay_for(10), Duration::from_millis(1_000));
    }

    #[test]
    fn jitter_stays_within_bound() {
        let p = RetryPolicy {
            jitter_ms: 50,
            ..policy()
        };
        for _ in 0..50 {
            let d = p.delay_for(1);
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(150));
        }
    }

    #[test]
    fn transport_errors_retry_until_exhausted() {
        let p = policy();
        let err = EngineError::transport("connection reset");
        assert!(matches!(p.next_step(&err, 1), RetryStep::After(_)));
        assert!(matches!(p.next_step(&err, 2), RetryStep::After(_)));
        assert_eq!(p.next_step(&err, 3), RetryStep::GiveUp);
    }

    #[test]
    fn validation_never_retried() {
        let p = policy();
        let err = EngineError::validation("bad symbol");
        assert_eq!(p.next_step(&err, 1), RetryStep::GiveUp);
    }

    #[test]
    fn rate_limit_respects_small_retry_after() {
        let p = policy();
        let err = EngineError::ProviderRateLimit {
            retry_after_secs: Some(1),
        };
        assert_eq!(
            p.next_step(&err, 1),
            RetryStep::After(Duration::from_secs(1))
        );
    }

    #[test]
    fn rate_limit_with_long_hint_advances_chain() {
        let p = policy();
        let err = EngineError::ProviderRateLimit {
            retry_after_secs: Some(60),
        };
        assert_eq!(p.next_step(&err, 1), RetryStep::GiveUp);

        let no_hint = EngineError::ProviderRateLimit {
            retry_after_secs: None,
        };
        assert_eq!(p.next_step(&no_hint, 1), RetryStep::GiveUp);
    }

    #[test]
    fn cancelled_never_retried() {
        let p = policy();
        assert_eq!(p.next_step(&EngineError::Cancelled, 1), RetryStep::GiveUp);
    }
}
