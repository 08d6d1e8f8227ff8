// =============================================================================
// Session Calendar — holiday-aware, DST-aware session boundaries per symbol
// =============================================================================
//
// All session templates are wall-clock times in the symbol's exchange
// timezone. Boundaries are materialized per calendar date: the local times
// are resolved to absolute UTC instants through chrono-tz, so two runs of the
// same symbol across a DST transition produce sessions with identical
// durations but different wall-clock-to-UTC offsets.
//
// A template whose end is at or before its start denotes a session that
// crosses midnight; its end materializes on the following calendar day.
// =============================================================================

pub mod holidays;

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::contracts::{Bar, EngineError, Symbol};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A named trading session materialized to absolute UTC instants.
/// The interval is half-open: `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionBoundary {
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SessionBoundary {
    /// `true` when `ts` falls inside the half-open `[start, end)` interval.
    pub fn is_within(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// A session template: local wall-clock start/end in the exchange timezone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTemplate {
    pub name: String,
    /// Local start time, `HH:MM` wall clock in the exchange timezone.
    pub start: NaiveTime,
    /// Local end time. End <= start means the session crosses midnight.
    pub end: NaiveTime,
}

/// Per-session high/low reached inside a boundary window.
#[derive(Debug, Clone, Serialize)]
pub struct SessionExtremes {
    pub name: String,
    pub high: f64,
    pub low: f64,
    /// Number of bars that fell inside the window.
    pub bar_count: usize,
}

/// Calendar configuration: session templates plus the regular-hours window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    pub sessions: Vec<SessionTemplate>,
    /// Regular trading hours, local wall clock.
    pub rth_start: NaiveTime,
    pub rth_end: NaiveTime,
}

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).expect("static time is valid")
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            sessions: vec![
                SessionTemplate {
                    name: "asia".to_string(),
                    start: t(18, 0),
                    end: t(2, 0),
                },
                SessionTemplate {
                    name: "london".to_string(),
                    start: t(2, 0),
                    end: t(8, 30),
                },
                SessionTemplate {
                    name: "newyork".to_string(),
                    start: t(8, 30),
                    end: t(16, 0),
                },
            ],
            rth_start: t(8, 30),
            rth_end: t(15, 0),
        }
    }
}

// ---------------------------------------------------------------------------
// Exchange timezone resolution
// ---------------------------------------------------------------------------

/// Resolve the exchange timezone from a symbol's root. Case-insensitive,
/// whitespace-trimmed, futures month-code suffix ignored (normalization
/// strips it before we see the root).
pub fn exchange_tz(symbol: &Symbol) -> Tz {
    match symbol.root() {
        "ES" | "NQ" | "YM" | "RTY" | "GC" | "SI" | "HG" | "CL" | "ZB" | "ZN" | "ZF" | "ZT"
        | "VX" => chrono_tz::America::Chicago,
        "SPY" | "QQQ" => chrono_tz::America::New_York,
        "EURUSD" | "GBPUSD" => chrono_tz::Europe::London,
        "BTCUSD" | "ETHUSD" => chrono_tz::UTC,
        _ => chrono_tz::America::New_York,
    }
}

// ---------------------------------------------------------------------------
// Local-time resolution
// ---------------------------------------------------------------------------

/// Resolve a local date + wall-clock time to a UTC instant.
///
/// Ambiguous local times (fall-back hour) take the earliest mapping.
/// Nonexistent local times (spring-forward gap) walk forward in one-minute
/// steps to the first instant that exists.
fn resolve_local(tz: Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    let mut naive = date.and_time(time);
    loop {
        match tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => return dt.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => return earliest.with_timezone(&Utc),
            LocalResult::None => {
                naive += Duration::minutes(1);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Public contract
// ---------------------------------------------------------------------------

/// Materialize the session boundaries for a target date, sorted by start.
///
/// Returns an empty list on full-closure holidays. `date` is the local
/// calendar date in the exchange timezone.
pub fn boundaries_for(
    date: NaiveDate,
    symbol: &Symbol,
    config: &CalendarConfig,
) -> Vec<SessionBoundary> {
    if is_holiday(date, symbol) {
        return Vec::new();
    }

    let tz = exchange_tz(symbol);
    let mut boundaries: Vec<SessionBoundary> = config
        .sessions
        .iter()
        .map(|tpl| {
            let start = resolve_local(tz, date, tpl.start);
            // End at or before start: the session runs into the next day.
            let end_date = if tpl.end <= tpl.start {
                date + Duration::days(1)
            } else {
                date
            };
            let end = resolve_local(tz, end_date, tpl.end);
            SessionBoundary {
                name: tpl.name.clone(),
                start,
                end,
            }
        })
        .collect();

    boundaries.sort_by_key(|b| b.start);
    boundaries
}

/// `true` when the exchange is fully closed on this date. Crypto venues
/// (UTC exchange) never observe holidays.
pub fn is_holiday(date: NaiveDate, symbol: &Symbol) -> bool {
    if exchange_tz(symbol) == chrono_tz::UTC {
        return false;
    }
    holidays::is_full_closure(date)
}

/// The regular-trading-hours window for the date, shortened on early-close
/// days. Errors on full-closure holidays.
pub fn rth_window(
    date: NaiveDate,
    symbol: &Symbol,
    config: &CalendarConfig,
) -> Result<SessionBoundary, EngineError> {
    if is_holiday(date, symbol) {
        return Err(EngineError::validation(format!(
            "market closed on {date} for {symbol}"
        )));
    }

    let tz = exchange_tz(symbol);
    let end_time = match holidays::early_close_time(date) {
        Some(early) if tz != chrono_tz::UTC && early < config.rth_end => early,
        _ => config.rth_end,
    };

    Ok(SessionBoundary {
        name: "rth".to_string(),
        start: resolve_local(tz, date, config.rth_start),
        end: resolve_local(tz, date, end_time),
    })
}

/// Compute the high/low reached inside each boundary window. Sessions with
/// no bars are omitted.
pub fn session_extremes(bars: &[Bar], boundaries: &[SessionBoundary]) -> Vec<SessionExtremes> {
    boundaries
        .iter()
        .filter_map(|b| {
            let mut high = f64::NEG_INFINITY;
            let mut low = f64::INFINITY;
            let mut count = 0usize;
            for bar in bars.iter().filter(|bar| b.is_within(bar.timestamp)) {
                high = high.max(bar.high);
                low = low.min(bar.low);
                count += 1;
            }
            if count == 0 {
                return None;
            }
            Some(SessionExtremes {
                name: b.name.clone(),
                high,
                low,
                bar_count: count,
            })
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
