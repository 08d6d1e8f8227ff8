// =============================================================================
// Webhook rate limiting — per-source sliding windows
// =============================================================================
//
// Two sliding windows per source IP: one minute and one hour. A request is
// admitted only when both windows have room; on rejection the caller gets
// the seconds until the oldest blocking event leaves its window, suitable
// for a Retry-After header.
//
// Expired events are swept opportunistically on access; idle sources are
// dropped entirely once both their windows drain.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub per_minute: usize,
    pub per_hour: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: 30,
            per_hour: 600,
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    /// Rejected; retry after this many seconds.
    Limited { retry_after_secs: u64 },
}

#[derive(Default)]
struct SourceWindows {
    minute: Vec<DateTime<Utc>>,
    hour: Vec<DateTime<Utc>>,
}

/// Process-wide sliding-window limiter keyed by source identifier.
pub struct RateLimiter {
    config: RateLimitConfig,
    sources: Mutex<HashMap<String, SourceWindows>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            sources: Mutex::new(HashMap::new()),
        }
    }

    /// Check and record one event for `source` at `now`.
    pub fn check(&self, source: &str, now: DateTime<Utc>) -> RateDecision {
        let minute_ago = now - Duration::minutes(1);
        let hour_ago = now - Duration::hours(1);

        let mut sources = self.sources.lock();
        let windows = sources.entry(source.to_string()).or_default();

        // Opportunistic sweep of expired events.
        windows.minute.retain(|t| *t > minute_ago);
        windows.hour.retain(|t| *t > hour_ago);

        if windows.minute.len() >= self.config.per_minute {
            let retry = windows
                .minute
                .first()
                .map(|t| (*t - minute_ago).num_seconds().max(1) as u64)
                .unwrap_or(60);
            warn!(source, window = "minute", retry_after = retry, "rate limit exceeded");
            return RateDecision::Limited {
                retry_after_secs: retry,
            };
        }
        if windows.hour.len() >= self.config.per_hour {
            let retry = windows
                .hour
                .first()
                .map(|t| (*t - hour_ago).num_seconds().max(1) as u64)
                .unwrap_or(3_600);
            warn!(source, window = "hour", retry_after = retry, "rate limit exceeded");
            return RateDecision::Limited {
                retry_after_secs: retry,
            };
        }

        windows.minute.push(now);
        windows.hour.push(now);
        debug!(
            source,
            minute_count = windows.minute.len(),
            hour_count = windows.hour.len(),
            "request admitted"
        );
        RateDecision::Allowed
    }

    /// Drop sources whose windows have fully drained. Called opportunistically
    /// by the handler; keeps the map from growing with one-shot senders.
    pub fn sweep(&self, now: DateTime<Utc>) {
        let hour_ago = now - Duration::hours(1);
        let mut sources = self.sources.lock();
        sources.retain(|_, w| {
            w.hour.retain(|t| *t > hour_ago);
            !w.hour.is_empty()
        });
    }

    pub fn tracked_sources(&self) -> usize {
        self.sources.lock().len()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 8, 12, 0, 0).unwrap()
    }

    fn limiter(per_minute: usize, per_hour: usize) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            per_minute,
            per_hour,
        })
    }

    #[test]
    fn admits_until_minute_window_full() {
        let rl = limiter(3, 100);
        for i in 0..3 {
            assert_eq!(
                rl.check("1.2.3.4", t0() + Duration::seconds(i)),
                RateDecision::Allowed
            );
        }
        match rl.check("1.2.3.4", t0() + Duration::seconds(3)) {
            RateDecision::Limited { retry_after_secs } => {
                assert!(retry_after_secs >= 1 && retry_after_secs <= 60);
            }
            RateDecision::Allowed => panic!("fourth request should be limited"),
        }
    }

    #[test]
    fn window_slides_and_readmits() {
        let rl = limiter(2, 100);
        assert_eq!(rl.check("ip", t0()), RateDecision::Allowed);
        assert_eq!(rl.check("ip", t0() + Duration::seconds(1)), RateDecision::Allowed);
        assert!(matches!(
            rl.check("ip", t0() + Duration::seconds(2)),
            RateDecision::Limited { .. }
        ));
        // 61 seconds later the first two events left the window.
        assert_eq!(
            rl.check("ip", t0() + Duration::seconds(61)),
            RateDecision::Allowed
        );
    }

    #[test]
    fn hour_window_caps_independently() {
        let rl = limiter(1_000, 3);
        for i in 0..3 {
            assert_eq!(
                rl.check("ip", t0() + Duration::minutes(i * 5)),
                RateDecision::Allowed
            );
        }
        match rl.check("ip", t0() + Duration::minutes(20)) {
            RateDecision::Limited { retry_after_secs } => {
                assert!(retry_after_secs > 60, "hour window retry: {retry_after_secs}");
            }
            RateDecision::Allowed => panic!("hour cap should trip"),
        }
    }

    #[test]
    fn sources_are_independent() {
        let rl = limiter(1, 100);
        assert_eq!(rl.check("a", t0()), RateDecision::Allowed);
        assert_eq!(rl.check("b", t0()), RateDecision::Allowed);
        assert!(matches!(rl.check("a", t0()), RateDecision::Limited { .. }));
    }

    #[test]
    fn sweep_drops_idle_sources() {
        let rl = limiter(10, 10);
        rl.check("a", t0());
        rl.check("b", t0());
        assert_eq!(rl.tracked_sources(), 2);
        rl.sweep(t0() + Duration::hours(2));
        assert_eq!(rl.tracked_sources(), 0);
    }
}
