// =============================================================================
// Order Block detection — the last opposing candle before a displacement
// =============================================================================
//
// A "significant directional move" is a cumulative close-to-close advance
// (or decline) of at least `move_floor` price units within `max_bars` bars.
// The order block is the last candle of the opposite color strictly before
// the move's first bar; its full OHLC range defines the zone.
//
// A block is mitigated once price later trades back through the far side of
// the zone (below the low of a bullish block, above the high of a bearish
// one).
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::confluence::Direction;
use crate::contracts::Bar;

/// One detected order block, addressed by bar index into the scanned window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBlock {
    pub direction: Direction,
    pub low: f64,
    pub high: f64,
    pub origin_index: usize,
    pub volume: f64,
    pub mitigated: bool,
    /// Move magnitude that produced the block, in price units.
    pub strength: f64,
}

/// Scan for order blocks. Moves are anchored greedily: once a qualifying
/// move is found the scan resumes after its end, so one displacement yields
/// one block.
pub fn detect(bars: &[Bar], move_floor: f64, max_bars: usize) -> Vec<OrderBlock> {
    let mut blocks: Vec<OrderBlock> = Vec::new();
    if bars.len() < 2 || max_bars == 0 || move_floor <= 0.0 {
        return blocks;
    }

    let mut i = 1usize;
    while i < bars.len() {
        let mut found_end: Option<(usize, f64)> = None;

        // Look ahead up to max_bars for a qualifying cumulative move
        // starting at bar i (delta measured from the close before the move).
        let anchor_close = bars[i - 1].close;
        let lookahead_end = (i + max_bars).min(bars.len());
        for j in i..lookahead_end {
            let delta = bars[j].close - anchor_close;
            if delta.abs() >= move_floor {
                found_end = Some((j, delta));
                break;
            }
        }

        let Some((end, delta)) = found_end else {
            i += 1;
            continue;
        };

        // The anchor bar must itself advance in the move direction;
        // otherwise the displacement really starts on a later bar.
        let first_delta = bars[i].close - anchor_close;
        if (delta > 0.0) != (first_delta > 0.0) || first_delta == 0.0 {
            i += 1;
            continue;
        }

        let direction = if delta > 0.0 {
            Direction::Bullish
        } else {
            Direction::Bearish
        };

        // Last opposite-color candle strictly before the move start.
        let origin = bars[..i].iter().rposition(|b| match direction {
            Direction::Bullish => !b.is_bullish(),
            Direction::Bearish => b.is_bullish(),
        });

        if let Some(origin_index) = origin {
            let ob_bar = &bars[origin_index];
            // The same candle can precede several overlapping moves; keep
            // one block per origin bar.
            if blocks.last().map(|b| b.origin_index) != Some(origin_index) {
                let mut block = OrderBlock {
                    direction,
                    low: ob_bar.low,
                    high: ob_bar.high,
                    origin_index,
                    volume: ob_bar.volume,
                    mitigated: false,
                    strength: delta.abs(),
                };
                mark_mitigated(&mut block, bars, end);
                blocks.push(block);
            }
        }

        i = end + 1;
    }

    blocks
}

/// A block is mitigated when price trades through its far side after the
/// move completes.
fn mark_mitigated(block: &mut OrderBlock, bars: &[Bar], move_end: usize) {
    for bar in bars.iter().skip(move_end + 1) {
        let through = match block.direction {
            Direction::Bullish => bar.low < block.low,
            Direction::Bearish => bar.high > block.high,
        };
        if through {
            block.mitigated = true;
            return;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
