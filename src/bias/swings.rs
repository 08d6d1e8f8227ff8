// =============================================================================
// Swing point detection — local extremes over a symmetric window
// =============================================================================
//
// bar[i] is a swing high when its high strictly exceeds the highs of every
// bar within L positions on both sides (symmetric for swing lows). Strength
// is how far the extreme clears its closest rival inside the window.
//
// The last L bars of the window can never confirm a swing (their right side
// is still forming); callers should treat detected swings as confirmed
// structure, not live levels.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::contracts::Bar;

/// Kind of swing extreme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwingKind {
    High,
    Low,
}

/// One confirmed swing point, addressed by bar index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwingPoint {
    pub index: usize,
    pub kind: SwingKind,
    pub price: f64,
    /// Margin over the closest rival extreme inside the window.
    pub strength: f64,
}

/// Detect all swing points with lookback/lookforward window `l`, in
/// chronological order.
pub fn detect_swings(bars: &[Bar], l: usize) -> Vec<SwingPoint> {
    let mut swings = Vec::new();
    if l == 0 || bars.len() < 2 * l + 1 {
        return swings;
    }

    for i in l..bars.len() - l {
        let window = &bars[i - l..=i + l];

        let mut rival_high = f64::NEG_INFINITY;
        let mut rival_low = f64::INFINITY;
        for (j, b) in window.iter().enumerate() {
            if j == l {
                continue; // the candidate itself
            }
            rival_high = rival_high.max(b.high);
            rival_low = rival_low.min(b.low);
        }

        if bars[i].high > rival_high {
            swings.push(SwingPoint {
                index: i,
                kind: SwingKind::High,
                price: bars[i].high,
                strength: bars[i].high - rival_high,
            });
        }
        if bars[i].low < rival_low {
            swings.push(SwingPoint {
                index: i,
                kind: SwingKind::Low,
                price: bars[i].low,
                strength: rival_low - bars[i].low,
            });
        }
    }

    swings
}

/// The most recent `count` swings of one kind, oldest first.
pub fn latest_of_kind(swings: &[SwingPoint], kind: SwingKind, count: usize) -> Vec<&SwingPoint> {
    let mut picked: Vec<&SwingPoint> = swings
        .iter()
        .filter(|s| s.kind == kind)
        .rev()
        .take(count)
        .collect();
    picked.reverse();
    picked
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bar_hl(i: i64, high: f64, low: f64) -> Bar {
        Bar {
            timestamp: Utc.timestamp_opt(i * 300, 0).unwrap(),
            open: (high + low) / 2.0,
            high,
            low,
            close: (high + low) / 2.0,
            volume: 100.0,
        }
    }

    /// A clean peak at index 5 and trough at index 11 inside a 15-bar window.
    fn peak_and_trough() -> Vec<Bar> {
        let highs = [
            101.0, 101.5, 102.0, 102.5, 103.0, 105.0, 103.0, 102.5, 102.0, 101.5, 101.0, 100.5,
            101.0, 101.5, 102.0,
        ];
        let lows = [
            99.0, 99.5, 100.0, 100.5, 101.0, 103.0, 101.0, 100.5, 100.0, 99.5, 99.0, 97.0, 99.0,
            99.5, 100.0,
        ];
        highs
            .iter()
            .zip(lows.iter())
            .enumerate()
            .map(|(i, (h, l))| bar_hl(i as i64, *h, *l))
            .collect()
    }

    #[test]
    fn detects_peak_as_swing_high() {
        let swings = detect_swings(&peak_and_trough(), 3);
        let highs: Vec<&SwingPoint> = swings.iter().filter(|s| s.kind == SwingKind::High).collect();
        assert_eq!(highs.len(), 1);
        assert_eq!(highs[0].index, 5);
        assert!((highs[0].price - 105.0).abs() < f64::EPSILON);
        // Closest rival high inside ±3 is 103.0 → strength 2.0.
        assert!((highs[0].strength - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn detects_trough_as_swing_low() {
        let swings = detect_swings(&peak_and_trough(), 3);
        let lows: Vec<&SwingPoint> = swings.iter().filter(|s| s.kind == SwingKind::Low).collect();
        assert_eq!(lows.len(), 1);
        assert_eq!(lows[0].index, 11);
        assert!((lows[0].price - 97.0).abs() < f64::EPSILON);
    }

    #[test]
    fn equal_highs_do_not_confirm_a_swing() {
        // Plateau: the comparison is strict.
        let bars: Vec<Bar> = (0..11).map(|i| bar_hl(i, 100.0, 99.0)).collect();
        assert!(detect_swings(&bars, 3).is_empty());
    }

    #[test]
    fn window_too_small_yields_nothing() {
        let bars: Vec<Bar> = (0..6).map(|i| bar_hl(i, 100.0 + i as f64, 99.0)).collect();
        assert!(detect_swings(&bars, 3).is_empty());
        assert!(detect_swings(&bars, 0).is_empty());
    }

    #[test]
    fn swings_are_chronological() {
        let mut bars = peak_and_trough();
        // Append a second, higher peak far enough to confirm.
        for (off, h) in [(15, 103.0), (16, 104.0), (17, 108.0), (18, 104.0), (19, 103.0), (20, 102.0), (21, 101.0)] {
            bars.push(bar_hl(off, h, h - 2.0));
        }
        let swings = detect_swings(&bars, 3);
        for pair in swings.windows(2) {
            assert!(pair[0].index <= pair[1].index);
        }
        let highs = latest_of_kind(&swings, SwingKind::High, 2);
        assert_eq!(highs.len(), 2);
        assert!(highs[0].index < highs[1].index, "oldest first");
        assert!((highs[1].price - 108.0).abs() < f64::EPSILON);
    }

    #[test]
    fn latest_of_kind_caps_at_available() {
        let swings = detect_swings(&peak_and_trough(), 3);
        let highs = latest_of_kind(&swings, SwingKind::High, 5);
        assert_eq!(highs.len(), 1);
    }
}
