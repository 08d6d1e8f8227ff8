// =============================================================================
// Confluence Engine — FVG + Order Block detection with weighted scoring
// =============================================================================
//
// A scan pass over a bar window produces fair-value gaps and order blocks as
// index-addressed zones (zones refer to bars by position, never by
// reference). The scoring stage intersects unfilled gaps with unmitigated
// blocks and folds everything into a 0-100 weighted score.
// =============================================================================

pub mod fvg;
pub mod order_block;
pub mod scoring;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::contracts::{Bar, EngineError, Timeframe};
use crate::indicators::atr;

pub use fvg::FvgZone;
pub use order_block::OrderBlock;
pub use scoring::{ConfluenceFactor, ZoneOverlap};

// ---------------------------------------------------------------------------
// Shared types
// ---------------------------------------------------------------------------

/// Zone direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Bullish,
    Bearish,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bullish => write!(f, "bullish"),
            Self::Bearish => write!(f, "bearish"),
        }
    }
}

/// Tuning for the detection and scoring passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfluenceConfig {
    /// Minimum gap size in ATR units (when ATR is computable) or absolute
    /// price units otherwise.
    pub min_gap_size: f64,
    /// Cumulative close move that qualifies as "significant" for order-block
    /// detection, in ATR units (absolute fallback as above).
    pub move_threshold: f64,
    /// Maximum bars a qualifying move may span.
    pub move_max_bars: usize,
    /// Factor weights; must sum to 1 within ±0.01.
    pub weights: std::collections::HashMap<String, f64>,
    /// Strength denominator used to normalize factor values into [0, 1].
    pub reference_strength: f64,
}

impl Default for ConfluenceConfig {
    fn default() -> Self {
        let mut weights = std::collections::HashMap::new();
        weights.insert("fvg".to_string(), 0.30);
        weights.insert("order_block".to_string(), 0.30);
        weights.insert("overlap".to_string(), 0.25);
        weights.insert("volume".to_string(), 0.15);
        Self {
            min_gap_size: 0.10,
            move_threshold: 1.5,
            move_max_bars: 5,
            weights,
            reference_strength: 3.0,
        }
    }
}

/// Full output of the confluence engine for one bar window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfluenceReport {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
    /// Weighted score in [0, 100].
    pub score: f64,
    pub factors: Vec<ConfluenceFactor>,
    pub fvg_zones: Vec<FvgZone>,
    pub order_blocks: Vec<OrderBlock>,
    pub overlaps: Vec<ZoneOverlap>,
    pub warnings: Vec<String>,
}

impl ConfluenceReport {
    /// Neutral report used when the window is too small to analyze or a
    /// detection pass fails.
    pub fn neutral(symbol: &str, timeframe: Timeframe, warning: String) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe,
            timestamp: Utc::now(),
            score: 0.0,
            factors: Vec::new(),
            fvg_zones: Vec::new(),
            order_blocks: Vec::new(),
            overlaps: Vec::new(),
            warnings: vec![warning],
        }
    }
}

// ---------------------------------------------------------------------------
// Engine entry
// ---------------------------------------------------------------------------

/// Minimum bars for a meaningful scan (three-bar gaps + move windows).
const MIN_BARS: usize = 10;

/// Run the full confluence pass: detect, intersect, score.
pub fn analyze(
    symbol: &str,
    timeframe: Timeframe,
    bars: &[Bar],
    config: &ConfluenceConfig,
) -> Result<ConfluenceReport, EngineError> {
    scoring::validate_weights(&config.weights)?;

    if bars.len() < MIN_BARS {
        return Ok(ConfluenceReport::neutral(
            symbol,
            timeframe,
            format!(
                "confluence needs at least {MIN_BARS} bars, received {}",
                bars.len()
            ),
        ));
    }

    // ATR converts the config's unit thresholds into price units. A window
    // too short for ATR falls back to absolute thresholds.
    let atr_value = atr::wilder_atr(bars, atr::DEFAULT_PERIOD);
    let (gap_floor, move_floor) = match atr_value {
        Some(a) => (config.min_gap_size * a, config.move_threshold * a),
        None => (config.min_gap_size, config.move_threshold),
    };

    let fvg_zones = fvg::detect(bars, gap_floor);
    let order_blocks = order_block::detect(bars, move_floor, config.move_max_bars);
    let overlaps = scoring::find_overlaps(&fvg_zones, &order_blocks);

    debug!(
        symbol,
        %timeframe,
        fvgs = fvg_zones.len(),
        order_blocks = order_blocks.len(),
        overlaps = overlaps.len(),
        atr = ?atr_value,
        "confluence scan complete"
    );

    let (score, factors) = scoring::score(
        bars,
        &fvg_zones,
        &order_blocks,
        &overlaps,
        config,
        atr_value,
    );

    Ok(ConfluenceReport {
        symbol: symbol.to_string(),
        timeframe,
        timestamp: bars.last().map(|b| b.timestamp).unwrap_or_else(Utc::now),
        score,
        factors,
        fvg_zones,
        order_blocks,
        overlaps,
        warnings: Vec::new(),
    })
}

// =============================================================================
// Tests
// =============================================================================
