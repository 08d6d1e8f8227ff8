// =============================================================================
// Position sizing — fixed-fractional and Kelly-capped
// =============================================================================
//
// Fixed: risk a configured percentage of the balance per trade,
//   shares = floor((balance × max_risk_percent / 100) / |entry − stop|)
// subject to the max-position notional cap, rounded down to the lot size.
//
// Kelly: f* = (p·b − (1−p))/b with b = avg_win/avg_loss, scaled by a safety
// fraction and hard-capped at 0.25. Missing or degenerate Kelly inputs fall
// back to fixed sizing with a warning. Whenever both paths are computable
// the smaller size wins, and the absolute max-risk cap applies at the end.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::contracts::EngineError;

/// Hard ceiling on the Kelly fraction regardless of inputs.
const KELLY_HARD_CAP: f64 = 0.25;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Win/loss statistics feeding the Kelly criterion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KellyParams {
    /// Historical win probability in (0, 1).
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    /// Safety multiplier applied to raw Kelly (default 0.25).
    pub kelly_fraction: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingConfig {
    /// Percent of balance risked per trade (e.g. 1.0 = 1 %).
    pub max_risk_percent: f64,
    /// Percent of balance allowed as position notional.
    pub max_position_percent: f64,
    /// Share/contract rounding granularity.
    pub lot_size: f64,
    /// Absolute risk cap per trade; the stricter of this and the percent cap
    /// applies.
    pub max_risk_amount: Option<f64>,
    /// When present, Kelly sizing is attempted and the stricter of Kelly and
    /// fixed wins.
    pub kelly: Option<KellyParams>,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            max_risk_percent: 1.0,
            max_position_percent: 50.0,
            lot_size: 1.0,
            max_risk_amount: None,
            kelly: None,
        }
    }
}

/// Result of a sizing computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeOutcome {
    pub position_size: f64,
    pub risk_amount: f64,
    /// Which path produced the final size.
    pub method: String,
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// Sizing
// ---------------------------------------------------------------------------

fn round_to_lot(size: f64, lot: f64) -> f64 {
    if lot <= 0.0 {
        return size.floor();
    }
    (size / lot).floor() * lot
}

/// Fixed-fractional size. Errors on non-positive balance or a stop placed at
/// the entry (zero risk per unit).
pub fn fixed_size(
    balance: f64,
    entry: f64,
    stop: f64,
    config: &SizingConfig,
) -> Result<SizeOutcome, EngineError> {
    if balance <= 0.0 {
        return Err(EngineError::validation("balance must be positive"));
    }
    if entry <= 0.0 {
        return Err(EngineError::validation("entry price must be positive"));
    }
    let risk_per_unit = (entry - stop).abs();
    if risk_per_unit <= 0.0 {
        return Err(EngineError::validation(
            "stop must be away from entry to size a position",
        ));
    }

    let percent_cap = balance * config.max_risk_percent / 100.0;
    let risk_budget = match config.max_risk_amount {
        Some(abs) => percent_cap.min(abs),
        None => percent_cap,
    };

    let mut size = (risk_budget / risk_per_unit).floor();

    // Notional cap.
    let max_notional = balance * config.max_position_percent / 100.0;
    if size * entry > max_notional {
        size = (max_notional / entry).floor();
    }

    let size = round_to_lot(size, config.lot_size).max(0.0);
    let risk_amount = size * risk_per_unit;

    debug!(
        balance,
        entry,
        stop,
        size,
        risk_amount,
        "fixed sizing computed"
    );

    Ok(SizeOutcome {
        position_size: size,
        risk_amount,
        method: "fixed".to_string(),
        warnings: Vec::new(),
    })
}

/// Raw Kelly fraction, before safety scaling. `None` for degenerate inputs.
fn kelly_fraction(params: &KellyParams) -> Option<f64> {
    if !(0.0..1.0).contains(&params.win_rate) || params.win_rate <= 0.0 {
        return None;
    }
    if params.avg_win <= 0.0 || params.avg_loss <= 0.0 {
        return None;
    }
    let b = params.avg_win / params.avg_loss;
    if !b.is_finite() || b <= 0.0 {
        return None;
    }
    let p = params.win_rate;
    let f = (p * b - (1.0 - p)) / b;
    if !f.is_finite() {
        return None;
    }
    Some(f)
}

/// Size a position, preferring Kelly when configured and valid.
///
/// The Kelly notional is `balance × min(f*·fraction, 0.25)`; the share count
/// it implies is then reconciled with the fixed-fractional count and the
/// smaller of the two wins.
pub fn size_position(
    balance: f64,
    entry: f64,
    stop: f64,
    config: &SizingConfig,
) -> Result<SizeOutcome, EngineError> {
    let fixed = fixed_size(balance, entry, stop, config)?;

    let Some(params) = &config.kelly else {
        return Ok(fixed);
    };

    let Some(raw) = kelly_fraction(params) else {
        warn!(
            win_rate = params.win_rate,
            avg_win = params.avg_win,
            avg_loss = params.avg_loss,
            "Kelly inputs invalid — falling back to fixed sizing"
        );
        let mut out = fixed;
        out.warnings
            .push("kelly inputs invalid; fixed sizing used".to_string());
        return Ok(out);
    };

    if raw <= 0.0 {
        // Negative edge: Kelly says do not trade.
        return Ok(SizeOutcome {
            position_size: 0.0,
            risk_amount: 0.0,
            method: "kelly".to_string(),
            warnings: vec![format!("kelly fraction {raw:.4} non-positive; edge is negative")],
        });
    }

    let applied = (raw * params.kelly_fraction).min(KELLY_HARD_CAP);
    let notional = balance * applied;
    let kelly_size = round_to_lot((notional / entry).floor(), config.lot_size);

    // The stricter of the two paths wins.
    let size = kelly_size.min(fixed.position_size);
    let risk_per_unit = (entry - stop).abs();
    let risk_amount = size * risk_per_unit;

    debug!(
        raw_kelly = format!("{raw:.4}"),
        applied = format!("{applied:.4}"),
        kelly_size,
        fixed_size = fixed.position_size,
        final_size = size,
        "kelly sizing computed"
    );

    Ok(SizeOutcome {
        position_size: size,
        risk_amount,
        method: if size < fixed.position_size {
            "kelly".to_string()
        } else {
            "fixed".to_string()
        },
        warnings: Vec::new(),
    })
}

// =============================================================================
// Tests
// =============================================================================
