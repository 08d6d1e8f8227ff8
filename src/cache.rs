// =============================================================================
// Time-Series Cache — TTL store with per-timeframe lifetimes
// =============================================================================
//
// In-memory store keyed by opaque strings. Expired entries are deleted on
// first access after expiry (lazy sweep), so the map never needs a timer
// task. Hit/miss/eviction counters are atomic and lock-free to read, in the
// manner of the upstream rate-limit tracker.
//
// Cache failures must never block the user path: `get` errors degrade to a
// miss, `set` errors are logged and swallowed by callers.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::contracts::{Bar, Timeframe};

// ---------------------------------------------------------------------------
// Keys & TTLs
// ---------------------------------------------------------------------------

/// Build the canonical composite-bars cache key.
///
/// `composite:bars:{symbol}:{timeframe}:{from|null}:{to|null}:{limit|null}`
pub fn bars_key(
    symbol: &str,
    timeframe: Timeframe,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    limit: Option<usize>,
) -> String {
    let fmt_ts = |ts: Option<DateTime<Utc>>| {
        ts.map(|t| t.timestamp().to_string())
            .unwrap_or_else(|| "null".to_string())
    };
    let fmt_limit = |l: Option<usize>| l.map(|v| v.to_string()).unwrap_or_else(|| "null".to_string());
    format!(
        "composite:bars:{symbol}:{timeframe}:{}:{}:{}",
        fmt_ts(from),
        fmt_ts(to),
        fmt_limit(limit)
    )
}

/// Build a report cache key: `{kind}:{symbol}:{timeframe}:{date}:{hash}:v1`.
pub fn report_key(
    kind: &str,
    symbol: &str,
    timeframe: Timeframe,
    date: chrono::NaiveDate,
    config_hash: &str,
) -> String {
    format!("{kind}:{symbol}:{timeframe}:{date}:{config_hash}:v1")
}

/// Default TTL for a timeframe. Overridable per-timeframe via config.
pub fn ttl_for_timeframe(tf: Timeframe, overrides: &HashMap<String, u64>) -> Duration {
    if let Some(ms) = overrides.get(&tf.to_string()) {
        return Duration::milliseconds(*ms as i64);
    }
    match tf {
        Timeframe::M1 => Duration::seconds(60),
        Timeframe::M5 => Duration::minutes(5),
        Timeframe::M10 => Duration::minutes(10),
        Timeframe::H1 => Duration::hours(1),
        Timeframe::H4 => Duration::hours(4),
        Timeframe::D1 => Duration::hours(24),
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

struct Entry {
    value: Vec<u8>,
    expires_at: DateTime<Utc>,
}

/// Serialisable counter snapshot for the metrics endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

/// Thread-safe TTL cache. Values are opaque serialized bytes so one store
/// serves both bar windows and assembled reports.
pub struct TtlCache {
    entries: RwLock<HashMap<String, Entry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl TtlCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Fetch a value. An entry whose TTL has elapsed is removed and reported
    /// as a miss.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = Utc::now();

        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(e) if now < e.expires_at => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(e.value.clone());
                }
                Some(_) => {} // expired; fall through to the write path
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        // Expired: delete on first access after expiry.
        let mut entries = self.entries.write();
        if let Some(e) = entries.get(key) {
            if now >= e.expires_at {
                entries.remove(key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key, "cache entry expired on access");
            } else {
                // Another writer refreshed it between our locks.
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(e.value.clone());
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert or replace a value. Last writer wins on concurrent sets.
    pub fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        let mut entries = self.entries.write();
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Utc::now() + ttl,
            },
        );
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    pub fn flush_all(&self) {
        let mut entries = self.entries.write();
        let n = entries.len();
        entries.clear();
        debug!(flushed = n, "cache flushed");
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.entries.read().len(),
        }
    }

    // -------------------------------------------------------------------------
    // Typed helpers for bar windows
    // -------------------------------------------------------------------------

    /// Fetch and deserialize a cached bar window. Decode failures are treated
    /// as a miss (the entry is dropped) so a corrupt write can never poison
    /// the read path.
    pub fn get_bars(&self, key: &str) -> Option<Vec<Bar>> {
        let raw = self.get(key)?;
        match serde_json::from_slice::<Vec<Bar>>(&raw) {
            Ok(bars) => Some(bars),
            Err(e) => {
                debug!(key, error = %e, "cached bars failed to decode — dropping entry");
                self.delete(key);
                None
            }
        }
    }

    /// Serialize and store a bar window. Serialization errors are logged and
    /// swallowed: cache writes never surface to the caller.
    pub fn set_bars(&self, key: &str, bars: &[Bar], ttl: Duration) {
        match serde_json::to_vec(bars) {
            Ok(raw) => self.set(key, raw, ttl),
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to serialize bars for cache — skipping write");
            }
        }
    }
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Range coverage
// ---------------------------------------------------------------------------

/// Decide whether a cached window is good enough to serve a range query.
///
/// Coverage = bars present / bars expected for `[from, to]` at `tf`. A window
/// also fails when any internal gap exceeds one bucket, which would otherwise
/// serve a range with a hole in the middle.
pub fn range_is_covered(
    bars: &[Bar],
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    tf: Timeframe,
    coverage_ratio: f64,
) -> bool {
    if to <= from {
        return false;
    }
    let expected = ((to - from).num_seconds() / tf.seconds()).max(1) as f64;
    let present = bars
        .iter()
        .filter(|b| b.timestamp >= from && b.timestamp <= to)
        .count() as f64;

    if present / expected < coverage_ratio {
        return false;
    }

    let max_gap = 2 * tf.seconds();
    let in_range: Vec<&Bar> = bars
        .iter()
        .filter(|b| b.timestamp >= from && b.timestamp <= to)
        .collect();
    for pair in in_range.windows(2) {
        if (pair[1].timestamp - pair[0].timestamp).num_seconds() > max_gap {
            return false;
        }
    }
    true
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(secs: i64) -> Bar {
        Bar {
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 10.0,
        }
    }

    #[test]
    fn set_then_get_hits() {
        let cache = TtlCache::new();
        cache.set("k", b"v".to_vec(), Duration::seconds(60));
        assert_eq!(cache.get("k"), Some(b"v".to_vec()));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn missing_key_is_miss() {
        let cache = TtlCache::new();
        assert!(cache.get("nope").is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn expired_entry_deleted_on_access() {
        let cache = TtlCache::new();
        cache.set("k", b"v".to_vec(), Duration::milliseconds(-1));
        assert!(cache.get("k").is_none());
        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.entries, 0, "expired entry should be gone");
    }

    #[test]
    fn delete_and_flush() {
        let cache = TtlCache::new();
        cache.set("a", vec![1], Duration::seconds(60));
        cache.set("b", vec![2], Duration::seconds(60));
        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));
        cache.flush_all();
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn last_writer_wins() {
        let cache = TtlCache::new();
        cache.set("k", vec![1], Duration::seconds(60));
        cache.set("k", vec![2], Duration::seconds(60));
        assert_eq!(cache.get("k"), Some(vec![2]));
    }

    #[test]
    fn bars_roundtrip_through_cache() {
        let cache = TtlCache::new();
        let bars = vec![bar(0), bar(60), bar(120)];
        cache.set_bars("bars", &bars, Duration::seconds(60));
        let out = cache.get_bars("bars").unwrap();
        assert_eq!(out, bars);
    }

    #[test]
    fn corrupt_entry_degrades_to_miss() {
        let cache = TtlCache::new();
        cache.set("bars", b"not json".to_vec(), Duration::seconds(60));
        assert!(cache.get_bars("bars").is_none());
        assert_eq!(cache.stats().entries, 0, "corrupt entry should be dropped");
    }

    #[test]
    fn bars_key_format() {
        let from = Utc.timestamp_opt(1000, 0).unwrap();
        let key = bars_key("ES", Timeframe::M5, Some(from), None, Some(50));
        assert_eq!(key, "composite:bars:ES:5m:1000:null:50");
    }

    #[test]
    fn report_key_format() {
        let key = report_key(
            "confluence",
            "SPY",
            Timeframe::M5,
            chrono::NaiveDate::from_ymd_opt(2024, 3, 8).unwrap(),
            "a1b2c3d4",
        );
        assert_eq!(key, "confluence:SPY:5m:2024-03-08:a1b2c3d4:v1");
    }

    #[test]
    fn ttl_defaults_and_overrides() {
        let none = HashMap::new();
        assert_eq!(ttl_for_timeframe(Timeframe::M1, &none), Duration::seconds(60));
        assert_eq!(ttl_for_timeframe(Timeframe::D1, &none), Duration::hours(24));

        let mut overrides = HashMap::new();
        overrides.insert("1m".to_string(), 5_000u64);
        assert_eq!(
            ttl_for_timeframe(Timeframe::M1, &overrides),
            Duration::milliseconds(5_000)
        );
    }

    #[test]
    fn full_coverage_passes() {
        let bars: Vec<Bar> = (0..10).map(|i| bar(i * 300)).collect();
        let from = Utc.timestamp_opt(0, 0).unwrap();
        let to = Utc.timestamp_opt(9 * 300, 0).unwrap();
        assert!(range_is_covered(&bars, from, to, Timeframe::M5, 0.9));
    }

    #[test]
    fn sparse_coverage_fails() {
        // Only 3 of ~10 expected bars.
        let bars = vec![bar(0), bar(300), bar(2700)];
        let from = Utc.timestamp_opt(0, 0).unwrap();
        let to = Utc.timestamp_opt(3000, 0).unwrap();
        assert!(!range_is_covered(&bars, from, to, Timeframe::M5, 0.9));
    }

    #[test]
    fn internal_gap_fails_even_with_count_coverage() {
        // Enough bars overall but a 4-bucket hole in the middle.
        let mut bars: Vec<Bar> = (0..20).map(|i| bar(i * 300)).collect();
        bars.retain(|b| {
            let s = b.timestamp.timestamp();
            !(1500..3000).contains(&s)
        });
        let from = Utc.timestamp_opt(0, 0).unwrap();
        let to = Utc.timestamp_opt(19 * 300, 0).unwrap();
        assert!(!range_is_covered(&bars, from, to, Timeframe::M5, 0.7));
    }

    #[test]
    fn inverted_range_is_not_covered() {
        let bars = vec![bar(0)];
        let from = Utc.timestamp_opt(100, 0).unwrap();
        let to = Utc.timestamp_opt(0, 0).unwrap();
        assert!(!range_is_covered(&bars, from, to, Timeframe::M5, 0.9));
    }
}
