// =============================================================================
// Alert deduplication — keyed suppression window
// =============================================================================
//
// Key = `{symbol}|{type}|{timeframe}|{floor(timestamp_ms / 1000)}`, so the
// same alert re-sent inside the window (TradingView retries, duplicate
// webhook deliveries) is acknowledged without re-processing. Expired keys
// are swept opportunistically on insert.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::debug;

/// Build the dedup key for an alert.
pub fn dedup_key(symbol: &str, alert_type: &str, timeframe: &str, timestamp_ms: i64) -> String {
    format!(
        "{symbol}|{alert_type}|{timeframe}|{}",
        timestamp_ms.div_euclid(1_000)
    )
}

/// Process-wide dedup store.
pub struct DedupStore {
    window: Duration,
    seen: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl DedupStore {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window: Duration::milliseconds(window_ms as i64),
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Record `key` at `now`. Returns `true` when the key was already seen
    /// inside the window (a duplicate).
    pub fn check_and_insert(&self, key: &str, now: DateTime<Utc>) -> bool {
        let mut seen = self.seen.lock();

        // Opportunistic sweep of expired entries.
        let cutoff = now - self.window;
        seen.retain(|_, at| *at > cutoff);

        match seen.get(key) {
            Some(at) if *at > cutoff => {
                debug!(key, "duplicate alert suppressed");
                true
            }
            _ => {
                seen.insert(key.to_string(), now);
                false
            }
        }
    }

    pub fn tracked_keys(&self) -> usize {
        self.seen.lock().len()
    }
}

// =============================================================================
// Tests
// =============================================================================
