// =============================================================================
// Fair Value Gap detection — three-bar displacement imbalances
// =============================================================================
//
// A bullish FVG exists at index i when bar[i].low sits strictly above
// bar[i-2].high: the middle bar moved so fast that its neighbors never
// overlapped, leaving an unfilled price void. Bearish is the mirror image.
//
// The gap zone is [bar[i-2].high, bar[i].low] (inverted for bearish). After
// emission a forward scan marks the zone filled on the first bar whose range
// re-enters the void.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::confluence::Direction;
use crate::contracts::Bar;

/// One detected fair-value gap. Bars are addressed by index into the scanned
/// window; `origin_index` is the third bar of the pattern (the one that
/// confirmed the gap).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FvgZone {
    pub direction: Direction,
    pub low: f64,
    pub high: f64,
    pub origin_index: usize,
    pub filled: bool,
    /// Gap size in price units (always positive).
    pub strength: f64,
}

impl FvgZone {
    pub fn size(&self) -> f64 {
        self.high - self.low
    }
}

/// Scan the window and return every gap at least `min_gap` wide, in
/// chronological order, with fill status annotated.
///
/// Zero-size and sub-threshold gaps are not emitted.
pub fn detect(bars: &[Bar], min_gap: f64) -> Vec<FvgZone> {
    let mut zones = Vec::new();
    if bars.len() < 3 {
        return zones;
    }

    for i in 2..bars.len() {
        let first = &bars[i - 2];
        let third = &bars[i];

        // Bullish: third bar's low clears the first bar's high.
        let bull_gap = third.low - first.high;
        if bull_gap > 0.0 && bull_gap >= min_gap {
            let mut zone = FvgZone {
                direction: Direction::Bullish,
                low: first.high,
                high: third.low,
                origin_index: i,
                filled: false,
                strength: bull_gap,
            };
            mark_filled(&mut zone, bars);
            zones.push(zone);
            continue;
        }

        // Bearish: third bar's high stays under the first bar's low.
        let bear_gap = first.low - third.high;
        if bear_gap > 0.0 && bear_gap >= min_gap {
            let mut zone = FvgZone {
                direction: Direction::Bearish,
                low: third.high,
                high: first.low,
                origin_index: i,
                filled: false,
                strength: bear_gap,
            };
            mark_filled(&mut zone, bars);
            zones.push(zone);
        }
    }

    zones
}

/// Forward scan from the bar after the origin: the first bar whose range
/// enters the gap flips `filled`.
fn mark_filled(zone: &mut FvgZone, bars: &[Bar]) {
    for bar in bars.iter().skip(zone.origin_index + 1) {
        let entered = match zone.direction {
            // The gap sits below price; a dip into it is a fill.
            Direction::Bullish => bar.low < zone.high,
            // The gap sits above price; a rally into it is a fill.
            Direction::Bearish => bar.high > zone.low,
        };
        if entered {
            zone.filled = true;
            return;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bar(i: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            timestamp: Utc.timestamp_opt(i * 300, 0).unwrap(),
            open,
            high,
            low,
            close,
            volume: 1_000.0,
        }
    }

    /// Three bars leaving a bullish gap between bar0.high (101) and
    /// bar2.low (103), then two bars that stay above the gap.
    fn bullish_gap_window() -> Vec<Bar> {
        vec![
            bar(0, 100.0, 101.0, 99.5, 100.8),
            bar(1, 101.0, 103.5, 100.9, 103.2), // displacement bar
            bar(2, 103.2, 104.5, 103.0, 104.0),
            bar(3, 104.0, 105.0, 103.5, 104.8),
            bar(4, 104.8, 106.0, 104.2, 105.5),
        ]
    }

    #[test]
    fn bullish_gap_detected_with_correct_bounds() {
        let zones = detect(&bullish_gap_window(), 0.5);
        assert_eq!(zones.len(), 1);
        let z = &zones[0];
        assert_eq!(z.direction, Direction::Bullish);
        assert!((z.low - 101.0).abs() < f64::EPSILON, "low = first bar high");
        assert!((z.high - 103.0).abs() < f64::EPSILON, "high = third bar low");
        assert_eq!(z.origin_index, 2);
        assert!(!z.filled, "no later bar dipped into the gap");
        assert!((z.strength - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn gap_below_threshold_not_emitted() {
        let zones = detect(&bullish_gap_window(), 5.0);
        assert!(zones.is_empty());
    }

    #[test]
    fn zero_size_gap_not_emitted() {
        // bar2.low == bar0.high: touching, no void.
        let bars = vec![
            bar(0, 100.0, 101.0, 99.5, 100.8),
            bar(1, 101.0, 103.5, 100.9, 103.2),
            bar(2, 103.2, 104.5, 101.0, 104.0),
        ];
        assert!(detect(&bars, 0.0).is_empty());
    }

    #[test]
    fn bullish_gap_marked_filled_on_retrace() {
        let mut bars = bullish_gap_window();
        // A later bar dips into the void.
        bars.push(bar(5, 105.0, 105.2, 102.5, 103.0));
        let zones = detect(&bars, 0.5);
        assert_eq!(zones.len(), 1);
        assert!(zones[0].filled);
    }

    #[test]
    fn bearish_gap_detected() {
        let bars = vec![
            bar(0, 100.0, 101.0, 99.0, 99.2),
            bar(1, 99.0, 99.1, 96.0, 96.2), // displacement down
            bar(2, 96.0, 96.5, 95.0, 95.5),
            bar(3, 95.5, 96.0, 94.5, 95.0),
        ];
        let zones = detect(&bars, 0.5);
        assert_eq!(zones.len(), 1);
        let z = &zones[0];
        assert_eq!(z.direction, Direction::Bearish);
        assert!((z.low - 96.5).abs() < f64::EPSILON, "low = third bar high");
        assert!((z.high - 99.0).abs() < f64::EPSILON, "high = first bar low");
        assert!(!z.filled);
    }

    #[test]
    fn bearish_gap_filled_on_rally() {
        let mut bars = vec![
            bar(0, 100.0, 101.0, 99.0, 99.2),
            bar(1, 99.0, 99.1, 96.0, 96.2),
            bar(2, 96.0, 96.5, 95.0, 95.5),
        ];
        bars.push(bar(3, 95.5, 97.5, 95.0, 97.0)); // rallies into the void
        let zones = detect(&bars, 0.5);
        assert_eq!(zones.len(), 1);
        assert!(zones[0].filled);
    }

    #[test]
    fn zones_preserve_scan_order() {
        // Two separated bullish gaps.
        let bars = vec![
            bar(0, 100.0, 101.0, 99.5, 100.8),
            bar(1, 101.0, 104.0, 100.9, 103.8),
            bar(2, 103.8, 105.0, 103.0, 104.5),
            bar(3, 104.5, 105.5, 104.0, 105.0),
            bar(4, 105.0, 108.0, 104.9, 107.8),
            bar(5, 107.8, 109.0, 107.0, 108.5),
        ];
        let zones = detect(&bars, 0.5);
        assert!(zones.len() >= 2, "found {} zones", zones.len());
        for pair in zones.windows(2) {
            assert!(pair[0].origin_index <= pair[1].origin_index);
        }
    }

    #[test]
    fn fewer_than_three_bars_yields_nothing() {
        let bars = vec![bar(0, 1.0, 2.0, 0.5, 1.5), bar(1, 1.5, 2.5, 1.0, 2.0)];
        assert!(detect(&bars, 0.0).is_empty());
    }
}
