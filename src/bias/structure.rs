// =============================================================================
// Market structure — HH/HL vs LH/LL state and break-of-structure detection
// =============================================================================
//
// Structure is read from the latest two confirmed swing highs and lows:
//
//   higher high + higher low → bullish
//   lower high  + lower low  → bearish
//   anything else            → ranging
//
// A break of structure (BOS) is confirmed once `confirmation_candles` closes
// print beyond the prior swing extreme — a single wick through the level
// does not count.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::bias::swings::{latest_of_kind, SwingKind, SwingPoint};
use crate::confluence::Direction;
use crate::contracts::Bar;

/// Trend state derived from swing sequencing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    Ranging,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bullish => write!(f, "bullish"),
            Self::Bearish => write!(f, "bearish"),
            Self::Ranging => write!(f, "ranging"),
        }
    }
}

/// A confirmed break of structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BosEvent {
    pub direction: Direction,
    /// The swing level that broke.
    pub level: f64,
    /// Index of the bar that delivered the final confirming close.
    pub confirmed_index: usize,
}

/// Full structure readout for a bar window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureState {
    pub trend: Trend,
    pub swing_highs: Vec<f64>,
    pub swing_lows: Vec<f64>,
    pub bos: Option<BosEvent>,
}

/// Classify the trend from the latest two swings of each kind.
pub fn classify_trend(swings: &[SwingPoint]) -> Trend {
    let highs = latest_of_kind(swings, SwingKind::High, 2);
    let lows = latest_of_kind(swings, SwingKind::Low, 2);

    if highs.len() < 2 || lows.len() < 2 {
        return Trend::Ranging;
    }

    let higher_high = highs[1].price > highs[0].price;
    let higher_low = lows[1].price > lows[0].price;
    let lower_high = highs[1].price < highs[0].price;
    let lower_low = lows[1].price < lows[0].price;

    if higher_high && higher_low {
        Trend::Bullish
    } else if lower_high && lower_low {
        Trend::Bearish
    } else {
        Trend::Ranging
    }
}

/// Detect a break of structure against the most recent prior swing extreme.
///
/// Scans closes after the latest swing high (and low); the break confirms on
/// the `confirmation_candles`-th consecutive close beyond the level.
pub fn detect_bos(
    bars: &[Bar],
    swings: &[SwingPoint],
    confirmation_candles: usize,
) -> Option<BosEvent> {
    if confirmation_candles == 0 {
        return None;
    }

    let last_high = latest_of_kind(swings, SwingKind::High, 1)
        .first()
        .map(|s| (s.index, s.price));
    let last_low = latest_of_kind(swings, SwingKind::Low, 1)
        .first()
        .map(|s| (s.index, s.price));

    let bullish = last_high.and_then(|(idx, level)| {
        confirm_break(bars, idx, confirmation_candles, |c| c > level).map(|confirmed_index| {
            BosEvent {
                direction: Direction::Bullish,
                level,
                confirmed_index,
            }
        })
    });
    let bearish = last_low.and_then(|(idx, level)| {
        confirm_break(bars, idx, confirmation_candles, |c| c < level).map(|confirmed_index| {
            BosEvent {
                direction: Direction::Bearish,
                level,
                confirmed_index,
            }
        })
    });

    // When both sides broke (violent whipsaw), report the later confirmation.
    match (bullish, bearish) {
        (Some(b), Some(s)) => {
            if b.confirmed_index >= s.confirmed_index {
                Some(b)
            } else {
                Some(s)
            }
        }
        (Some(b), None) => Some(b),
        (None, Some(s)) => Some(s),
        (None, None) => None,
    }
}

fn confirm_break(
    bars: &[Bar],
    after_index: usize,
    needed: usize,
    beyond: impl Fn(f64) -> bool,
) -> Option<usize> {
    let mut streak = 0usize;
    for (i, bar) in bars.iter().enumerate().skip(after_index + 1) {
        if beyond(bar.close) {
            streak += 1;
            if streak >= needed {
                return Some(i);
            }
        } else {
            streak = 0;
        }
    }
    None
}

/// Assemble the full structure state for a window.
pub fn analyze(bars: &[Bar], swings: &[SwingPoint], confirmation_candles: usize) -> StructureState {
    StructureState {
        trend: classify_trend(swings),
        swing_highs: latest_of_kind(swings, SwingKind::High, 2)
            .iter()
            .map(|s| s.price)
            .collect(),
        swing_lows: latest_of_kind(swings, SwingKind::Low, 2)
            .iter()
            .map(|s| s.price)
            .collect(),
        bos: detect_bos(bars, swings, confirmation_candles),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn swing(index: usize, kind: SwingKind, price: f64) -> SwingPoint {
        SwingPoint {
            index,
            kind,
            price,
            strength: 1.0,
        }
    }

    fn bar_close(i: i64, close: f64) -> Bar {
        Bar {
            timestamp: Utc.timestamp_opt(i * 300, 0).unwrap(),
            open: close,
            high: close + 0.5,
            low: close - 0.5,
            close,
            volume: 100.0,
        }
    }

    #[test]
    fn hh_hl_is_bullish() {
        let swings = vec![
            swing(2, SwingKind::Low, 99.0),
            swing(5, SwingKind::High, 103.0),
            swing(8, SwingKind::Low, 100.0),
            swing(11, SwingKind::High, 105.0),
        ];
        assert_eq!(classify_trend(&swings), Trend::Bullish);
    }

    #[test]
    fn lh_ll_is_bearish() {
        let swings = vec![
            swing(2, SwingKind::High, 105.0),
            swing(5, SwingKind::Low, 100.0),
            swing(8, SwingKind::High, 103.0),
            swing(11, SwingKind::Low, 98.0),
        ];
        assert_eq!(classify_trend(&swings), Trend::Bearish);
    }

    #[test]
    fn mixed_sequencing_is_ranging() {
        // Higher high but lower low: conflicted.
        let swings = vec![
            swing(2, SwingKind::Low, 99.0),
            swing(5, SwingKind::High, 103.0),
            swing(8, SwingKind::Low, 98.0),
            swing(11, SwingKind::High, 105.0),
        ];
        assert_eq!(classify_trend(&swings), Trend::Ranging);
    }

    #[test]
    fn too_few_swings_is_ranging() {
        let swings = vec![
            swing(5, SwingKind::High, 103.0),
            swing(8, SwingKind::Low, 100.0),
        ];
        assert_eq!(classify_trend(&swings), Trend::Ranging);
    }

    #[test]
    fn bos_requires_consecutive_closes() {
        let swings = vec![swing(3, SwingKind::High, 103.0)];
        // One close above, a pullback, then two consecutive above.
        let bars: Vec<Bar> = vec![
            bar_close(0, 100.0),
            bar_close(1, 101.0),
            bar_close(2, 102.0),
            bar_close(3, 102.5),
            bar_close(4, 103.5), // breaks but alone
            bar_close(5, 102.0), // streak resets
            bar_close(6, 103.2),
            bar_close(7, 103.8), // second consecutive → confirmed
        ];
        let bos = detect_bos(&bars, &swings, 2).unwrap();
        assert_eq!(bos.direction, Direction::Bullish);
        assert!((bos.level - 103.0).abs() < f64::EPSILON);
        assert_eq!(bos.confirmed_index, 7);
    }

    #[test]
    fn single_wick_does_not_confirm_bos() {
        let swings = vec![swing(3, SwingKind::High, 103.0)];
        let bars: Vec<Bar> = vec![
            bar_close(0, 100.0),
            bar_close(1, 101.0),
            bar_close(2, 102.0),
            bar_close(3, 102.5),
            bar_close(4, 103.5),
            bar_close(5, 102.0),
        ];
        assert!(detect_bos(&bars, &swings, 2).is_none());
    }

    #[test]
    fn bearish_bos_below_swing_low() {
        let swings = vec![swing(3, SwingKind::Low, 99.0)];
        let bars: Vec<Bar> = vec![
            bar_close(0, 100.0),
            bar_close(1, 100.5),
            bar_close(2, 100.0),
            bar_close(3, 99.5),
            bar_close(4, 98.5),
            bar_close(5, 98.0),
        ];
        let bos = detect_bos(&bars, &swings, 2).unwrap();
        assert_eq!(bos.direction, Direction::Bearish);
        assert_eq!(bos.confirmed_index, 5);
    }

    #[test]
    fn analyze_assembles_state() {
        let swings = vec![
            swing(2, SwingKind::Low, 99.0),
            swing(5, SwingKind::High, 103.0),
            swing(8, SwingKind::Low, 100.0),
            swing(11, SwingKind::High, 105.0),
        ];
        let bars: Vec<Bar> = (0..14).map(|i| bar_close(i, 100.0)).collect();
        let state = analyze(&bars, &swings, 2);
        assert_eq!(state.trend, Trend::Bullish);
        assert_eq!(state.swing_highs, vec![103.0, 105.0]);
        assert_eq!(state.swing_lows, vec![99.0, 100.0]);
        assert!(state.bos.is_none());
    }
}
