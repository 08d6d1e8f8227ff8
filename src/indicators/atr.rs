// =============================================================================
// Average True Range
// =============================================================================
//
// The true range of a bar widens its plain high-low span to absorb any
// opening gap against the prior close:
//
//   TR = max(range, |high − prev_close|, |low − prev_close|)
//
// The ATR here is Wilder's running average of that series: seeded with the
// plain mean of the first `period` true ranges, after which every newer
// range nudges the average by 1/period of its distance. The confluence
// engine prices its gap thresholds in these units; the risk engine derives
// stop and target distances from them.
// =============================================================================

use crate::contracts::Bar;

/// Standard look-back used across the engine.
pub const DEFAULT_PERIOD: usize = 14;

/// True range of `bar` given the bar before it.
fn true_range(prev: &Bar, bar: &Bar) -> f64 {
    let gap_up = (bar.high - prev.close).abs();
    let gap_down = (bar.low - prev.close).abs();
    bar.range().max(gap_up).max(gap_down)
}

/// Wilder-smoothed ATR over `bars` (oldest first).
///
/// Returns `None` when `period` is zero, when fewer than `period + 1` bars
/// are available (each true range needs a predecessor), or when the input
/// contains non-finite prices.
pub fn wilder_atr(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 {
        return None;
    }

    let mut ranges = bars.windows(2).map(|pair| true_range(&pair[0], &pair[1]));

    // Seed: plain mean of the first `period` true ranges. Running out of
    // bars here is the insufficient-data case.
    let mut seed = 0.0;
    for _ in 0..period {
        seed += ranges.next()?;
    }
    let mut smoothed = seed / period as f64;

    // Wilder update: each newer range pulls the average toward itself by
    // 1/period of the gap. A NaN anywhere poisons the value and falls out
    // of the final finiteness check.
    let pull = 1.0 / period as f64;
    for tr in ranges {
        smoothed += (tr - smoothed) * pull;
    }

    smoothed.is_finite().then_some(smoothed)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn b(i: i64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            timestamp: Utc.timestamp_opt(i * 300, 0).unwrap(),
            open: close,
            high,
            low,
            close,
            volume: 50.0,
        }
    }

    /// Steady tape: every bar spans exactly `width` around a fixed close.
    fn steady(n: i64, width: f64) -> Vec<Bar> {
        (0..n)
            .map(|i| b(i, 100.0 + width / 2.0, 100.0 - width / 2.0, 100.0))
            .collect()
    }

    #[test]
    fn zero_period_is_rejected() {
        assert!(wilder_atr(&steady(20, 4.0), 0).is_none());
    }

    #[test]
    fn needs_one_more_bar_than_the_period() {
        let bars = steady(14, 4.0);
        assert!(wilder_atr(&bars, 14).is_none(), "13 true ranges for period 14");
        let bars = steady(15, 4.0);
        assert!(wilder_atr(&bars, 14).is_some());
    }

    #[test]
    fn steady_tape_reads_as_the_bar_span() {
        // Closes sit mid-bar, so the gap terms never exceed the span and the
        // average settles exactly on it.
        let atr = wilder_atr(&steady(40, 4.0), DEFAULT_PERIOD).unwrap();
        assert!((atr - 4.0).abs() < 1e-9, "expected 4.0, got {atr}");
    }

    #[test]
    fn opening_gap_widens_the_true_range() {
        // Second bar spans only 1.0 but opens 8.0 above the prior close.
        let bars = vec![
            b(0, 101.0, 99.0, 100.0),
            b(1, 108.5, 107.5, 108.0),
            b(2, 108.8, 107.8, 108.2),
            b(3, 109.0, 108.0, 108.5),
        ];
        let atr = wilder_atr(&bars, 3).unwrap();
        // First TR is |108.5 - 100.0| = 8.5; the seed mean must carry it.
        assert!(atr > 3.0, "gap should dominate the average, got {atr}");
    }

    #[test]
    fn update_matches_hand_computation() {
        // Period 2 over spans 2, 2, 6, 6 (closes mid-bar, no gaps):
        // seed = (2 + 2) / 2 = 2, then 2 + (6-2)/2 = 4, then 4 + (6-4)/2 = 5.
        let bars = vec![
            b(0, 101.0, 99.0, 100.0),
            b(1, 101.0, 99.0, 100.0),
            b(2, 101.0, 99.0, 100.0),
            b(3, 103.0, 97.0, 100.0),
            b(4, 103.0, 97.0, 100.0),
        ];
        let atr = wilder_atr(&bars, 2).unwrap();
        assert!((atr - 5.0).abs() < 1e-9, "expected 5.0, got {atr}");
    }

    #[test]
    fn non_finite_input_yields_none() {
        let mut bars = steady(10, 4.0);
        bars[4].high = f64::INFINITY;
        assert!(wilder_atr(&bars, 3).is_none());

        let mut bars = steady(10, 4.0);
        bars[7].close = f64::NAN;
        assert!(wilder_atr(&bars, 3).is_none());
    }
}
