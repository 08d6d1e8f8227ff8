// =============================================================================
// OHLCV Bar and Timeframe — the fundamental market-data records
// =============================================================================
//
// A Bar is immutable once fetched. Its identity across the engine is the
// triple (symbol, timeframe, timestamp); everything downstream (cache keys,
// aggregation buckets, zone origin indices) derives from that.
// =============================================================================

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::contracts::error::EngineError;

// ---------------------------------------------------------------------------
// Timeframe
// ---------------------------------------------------------------------------

/// Closed set of bar durations the engine understands, ordered by duration.
///
/// The string form matches upstream provider API conventions (`"1m"`, `"5m"`,
/// `"10m"`, `"1h"`, `"4h"`, `"1d"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "10m")]
    M10,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    /// All timeframes, finest first.
    pub const ALL: [Timeframe; 6] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M10,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    /// Duration of one bar at this timeframe.
    pub fn duration(self) -> Duration {
        match self {
            Timeframe::M1 => Duration::minutes(1),
            Timeframe::M5 => Duration::minutes(5),
            Timeframe::M10 => Duration::minutes(10),
            Timeframe::H1 => Duration::hours(1),
            Timeframe::H4 => Duration::hours(4),
            Timeframe::D1 => Duration::days(1),
        }
    }

    /// Duration in whole seconds (used for epoch-floored bucketing).
    pub fn seconds(self) -> i64 {
        self.duration().num_seconds()
    }

    /// `true` when `self` divides evenly into `coarser` (strictly finer).
    pub fn divides(self, coarser: Timeframe) -> bool {
        coarser.seconds() > self.seconds() && coarser.seconds() % self.seconds() == 0
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M10 => "10m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Timeframe {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1m" | "m1" => Ok(Timeframe::M1),
            "5m" | "m5" => Ok(Timeframe::M5),
            "10m" | "m10" => Ok(Timeframe::M10),
            "1h" | "h1" | "60m" => Ok(Timeframe::H1),
            "4h" | "h4" | "240m" => Ok(Timeframe::H4),
            "1d" | "d1" | "d" => Ok(Timeframe::D1),
            other => Err(EngineError::validation(format!(
                "unknown timeframe '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Bar
// ---------------------------------------------------------------------------

/// A single immutable OHLCV bar.
///
/// Timestamps are the bar **open** time in UTC and serialize as ISO-8601
/// strings. Invariants (checked by [`Bar::validate`]):
///   high >= max(open, close, low)
///   low  <= min(open, close, high)
///   volume >= 0, all fields finite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Check the OHLCV invariants, returning a Validation error naming the
    /// first violated constraint.
    pub fn validate(&self) -> Result<(), EngineError> {
        let fields = [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("volume", self.volume),
        ];
        for (name, v) in fields {
            if !v.is_finite() {
                return Err(EngineError::validation(format!(
                    "bar field '{name}' is not finite at {}",
                    self.timestamp
                )));
            }
        }
        if self.high < self.open.max(self.close).max(self.low) {
            return Err(EngineError::validation(format!(
                "bar high {} below body/low at {}",
                self.high, self.timestamp
            )));
        }
        if self.low > self.open.min(self.close).min(self.high) {
            return Err(EngineError::validation(format!(
                "bar low {} above body/high at {}",
                self.low, self.timestamp
            )));
        }
        if self.volume < 0.0 {
            return Err(EngineError::validation(format!(
                "bar volume {} negative at {}",
                self.volume, self.timestamp
            )));
        }
        Ok(())
    }

    /// `true` when the close is at or above the open.
    pub fn is_bullish(&self) -> bool {
        self.close >= self.open
    }

    /// Full bar range (high - low).
    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

/// Validate an entire series: every bar's invariants plus strictly increasing
/// unique timestamps.
pub fn validate_series(bars: &[Bar]) -> Result<(), EngineError> {
    for bar in bars {
        bar.validate()?;
    }
    for pair in bars.windows(2) {
        if pair[1].timestamp <= pair[0].timestamp {
            return Err(EngineError::validation(format!(
                "bar timestamps not strictly increasing: {} then {}",
                pair[0].timestamp, pair[1].timestamp
            )));
        }
    }
    Ok(())
}

/// Sort ascending by timestamp and drop duplicates, keeping the first
/// occurrence of each timestamp. Providers and the cache both run their
/// output through this before returning bars to callers.
pub fn sort_dedup(mut bars: Vec<Bar>) -> Vec<Bar> {
    bars.sort_by_key(|b| b.timestamp);
    bars.dedup_by_key(|b| b.timestamp);
    bars
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn bar(secs: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            timestamp: ts(secs),
            open,
            high,
            low,
            close,
            volume: 100.0,
        }
    }

    #[test]
    fn timeframe_ordering_by_duration() {
        assert!(Timeframe::M1 < Timeframe::M5);
        assert!(Timeframe::H1 < Timeframe::H4);
        assert!(Timeframe::H4 < Timeframe::D1);
    }

    #[test]
    fn timeframe_string_roundtrip() {
        for tf in Timeframe::ALL {
            let parsed: Timeframe = tf.to_string().parse().unwrap();
            assert_eq!(parsed, tf);
        }
    }

    #[test]
    fn timeframe_parse_rejects_unknown() {
        assert!("7m".parse::<Timeframe>().is_err());
        assert!("".parse::<Timeframe>().is_err());
    }

    #[test]
    fn timeframe_divides() {
        assert!(Timeframe::M1.divides(Timeframe::M5));
        assert!(Timeframe::M5.divides(Timeframe::H1));
        assert!(!Timeframe::M10.divides(Timeframe::M5));
        // 4h does not divide 1d? 86400 % 14400 == 0, so it does.
        assert!(Timeframe::H4.divides(Timeframe::D1));
        // A timeframe never divides itself.
        assert!(!Timeframe::H1.divides(Timeframe::H1));
    }

    #[test]
    fn valid_bar_passes() {
        assert!(bar(0, 100.0, 105.0, 95.0, 102.0).validate().is_ok());
    }

    #[test]
    fn high_below_close_rejected() {
        let b = bar(0, 100.0, 101.0, 95.0, 103.0);
        assert!(b.validate().is_err());
    }

    #[test]
    fn low_above_open_rejected() {
        let b = bar(0, 100.0, 105.0, 101.0, 104.0);
        assert!(b.validate().is_err());
    }

    #[test]
    fn negative_volume_rejected() {
        let mut b = bar(0, 100.0, 105.0, 95.0, 102.0);
        b.volume = -1.0;
        assert!(b.validate().is_err());
    }

    #[test]
    fn nan_field_rejected() {
        let mut b = bar(0, 100.0, 105.0, 95.0, 102.0);
        b.close = f64::NAN;
        assert!(b.validate().is_err());
    }

    #[test]
    fn series_requires_strictly_increasing_timestamps() {
        let bars = vec![
            bar(0, 100.0, 105.0, 95.0, 102.0),
            bar(60, 102.0, 106.0, 100.0, 104.0),
        ];
        assert!(validate_series(&bars).is_ok());

        let dup = vec![
            bar(60, 100.0, 105.0, 95.0, 102.0),
            bar(60, 102.0, 106.0, 100.0, 104.0),
        ];
        assert!(validate_series(&dup).is_err());
    }

    #[test]
    fn sort_dedup_orders_and_removes_duplicates() {
        let bars = vec![
            bar(120, 1.0, 2.0, 0.5, 1.5),
            bar(0, 1.0, 2.0, 0.5, 1.5),
            bar(120, 9.0, 9.0, 9.0, 9.0),
            bar(60, 1.0, 2.0, 0.5, 1.5),
        ];
        let out = sort_dedup(bars);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].timestamp, ts(0));
        assert_eq!(out[2].timestamp, ts(120));
        // First occurrence wins on duplicate timestamps.
        assert!((out[2].open - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn timestamp_serializes_as_iso8601() {
        let b = bar(1_700_000_000, 100.0, 105.0, 95.0, 102.0);
        let json = serde_json::to_string(&b).unwrap();
        assert!(json.contains("2023-11-14T22:13:20Z"), "got {json}");
    }
}
