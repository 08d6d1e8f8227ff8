// =============================================================================
// Bias / Day Profile Engine — session-aware directional readout
// =============================================================================
//
// Folds three readings into one daily bias label:
//
//   1. Market structure from confirmed swing sequencing (HH/HL vs LH/LL).
//   2. Price position relative to the window range midpoint ("equilibrium").
//   3. Day profile from overnight session sweeps (P1/P2/P3).
//
// Decision table:
//   bullish structure, price above midpoint → long
//   bullish structure, price below midpoint → long-into-eq
//   bearish structure, price below midpoint → short
//   bearish structure, price above midpoint → short-into-eq
//   ranging / conflicted                    → neutral
// =============================================================================

pub mod profile;
pub mod structure;
pub mod swings;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calendar::SessionBoundary;
use crate::contracts::{Bar, Timeframe};

pub use profile::DayProfile;
pub use structure::{StructureState, Trend};
pub use swings::{SwingKind, SwingPoint};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Daily bias labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BiasLabel {
    Long,
    Short,
    LongIntoEq,
    ShortIntoEq,
    Neutral,
}

impl std::fmt::Display for BiasLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
            Self::LongIntoEq => write!(f, "long-into-eq"),
            Self::ShortIntoEq => write!(f, "short-into-eq"),
            Self::Neutral => write!(f, "neutral"),
        }
    }
}

/// Tuning for swing detection and BOS confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiasConfig {
    /// Symmetric swing lookback/lookforward window.
    pub swing_window: usize,
    /// Closes beyond a swing extreme required to confirm a BOS.
    pub bos_confirmation_candles: usize,
}

impl Default for BiasConfig {
    fn default() -> Self {
        Self {
            swing_window: 5,
            bos_confirmation_candles: 2,
        }
    }
}

/// Full bias-engine output for one window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiasReport {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
    pub bias: BiasLabel,
    pub profile: DayProfile,
    pub structure: StructureState,
    /// Window range used for the equilibrium read.
    pub range_high: f64,
    pub range_low: f64,
    pub last_close: f64,
    pub confidence: f64,
    pub reason: String,
    pub warnings: Vec<String>,
}

impl BiasReport {
    /// Neutral report for windows too small to read.
    pub fn neutral(symbol: &str, timeframe: Timeframe, warning: String) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe,
            timestamp: Utc::now(),
            bias: BiasLabel::Neutral,
            profile: DayProfile::Unknown,
            structure: StructureState {
                trend: Trend::Ranging,
                swing_highs: Vec::new(),
                swing_lows: Vec::new(),
                bos: None,
            },
            range_high: 0.0,
            range_low: 0.0,
            last_close: 0.0,
            confidence: 0.0,
            reason: warning.clone(),
            warnings: vec![warning],
        }
    }
}

// ---------------------------------------------------------------------------
// Engine entry
// ---------------------------------------------------------------------------

/// Run the bias engine over a window. `boundaries` (from the session
/// calendar) feed the day-profile classifier; pass an empty slice when
/// session context is unavailable and the profile degrades to Unknown/P3.
pub fn analyze(
    symbol: &str,
    timeframe: Timeframe,
    bars: &[Bar],
    boundaries: &[SessionBoundary],
    config: &BiasConfig,
) -> BiasReport {
    let min_bars = 2 * config.swing_window + 1;
    if bars.len() < min_bars {
        return BiasReport::neutral(
            symbol,
            timeframe,
            format!(
                "bias needs at least {min_bars} bars for swing detection, received {}",
                bars.len()
            ),
        );
    }

    let swings = swings::detect_swings(bars, config.swing_window);
    let structure = structure::analyze(bars, &swings, config.bos_confirmation_candles);
    let day_profile = profile::classify(bars, boundaries);

    let range_high = bars.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
    let range_low = bars.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    let midpoint = (range_high + range_low) / 2.0;
    let last_close = bars.last().map(|b| b.close).unwrap_or(midpoint);
    let above_mid = last_close > midpoint;

    // A steady one-way trend leaves no confirmed swings; the EMA(9)/EMA(21)
    // stack is the secondary trend read for that case.
    let mut ema_fallback = false;
    let effective_trend = match structure.trend {
        Trend::Ranging => {
            let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
            match crate::indicators::ema::ema_trend(&closes) {
                Some((true, sep)) if sep >= 0.05 => {
                    ema_fallback = true;
                    Trend::Bullish
                }
                Some((false, sep)) if sep >= 0.05 => {
                    ema_fallback = true;
                    Trend::Bearish
                }
                _ => Trend::Ranging,
            }
        }
        t => t,
    };

    let bias = match effective_trend {
        Trend::Bullish if above_mid => BiasLabel::Long,
        Trend::Bullish => BiasLabel::LongIntoEq,
        Trend::Bearish if !above_mid => BiasLabel::Short,
        Trend::Bearish => BiasLabel::ShortIntoEq,
        Trend::Ranging => BiasLabel::Neutral,
    };

    // Confidence: structure conviction, sharpened by a confirming BOS and a
    // price position that agrees with the trend. An EMA-only read starts
    // lower than confirmed structure.
    let confidence = {
        let base: f64 = match (effective_trend, ema_fallback) {
            (Trend::Bullish | Trend::Bearish, false) => 0.6,
            (Trend::Bullish | Trend::Bearish, true) => 0.4,
            (Trend::Ranging, _) => 0.2,
        };
        let bos_bonus = if structure.bos.is_some() { 0.2 } else { 0.0 };
        let position_bonus = match bias {
            BiasLabel::Long | BiasLabel::Short => 0.1,
            _ => 0.0,
        };
        (base + bos_bonus + position_bonus).clamp(0.0, 1.0)
    };

    let reason = format!(
        "structure {} ({}highs {:?}, lows {:?}), close {:.2} vs midpoint {:.2}, profile {}",
        effective_trend,
        if ema_fallback { "ema stack; " } else { "" },
        structure.swing_highs,
        structure.swing_lows,
        last_close,
        midpoint,
        day_profile
    );

    debug!(
        symbol,
        %timeframe,
        bias = %bias,
        profile = %day_profile,
        confidence = format!("{confidence:.2}"),
        "bias analysis complete"
    );

    BiasReport {
        symbol: symbol.to_string(),
        timeframe,
        timestamp: bars.last().map(|b| b.timestamp).unwrap_or_else(Utc::now),
        bias,
        profile: day_profile,
        structure,
        range_high,
        range_low,
        last_close,
        confidence,
        reason,
        warnings: Vec::new(),
    }
}

// =============================================================================
// Tests
// =============================================================================
