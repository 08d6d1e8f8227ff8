// =============================================================================
// Execution plan assembly — sizing + exits folded into one risk-checked plan
// =============================================================================
//
// Geometry invariants enforced before anything else:
//   long  ⇒ stop < entry < take_profit
//   short ⇒ stop > entry > take_profit
// and the final risk amount never exceeds balance × max_risk_percent.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::confluence::Direction;
use crate::contracts::EngineError;
use crate::risk::exits::{partial_exits, ExitStrategy, PartialExit};
use crate::risk::sizing::{size_position, SizingConfig};

/// A complete, risk-checked trade plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub position_size: f64,
    pub risk_amount: f64,
    pub reward_amount: f64,
    /// Reward-to-risk ratio of the full move to take_profit.
    pub rr_ratio: f64,
    pub partial_exits: Vec<PartialExit>,
    pub warnings: Vec<String>,
}

/// Inputs for plan assembly.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub direction: Direction,
    pub entry: f64,
    pub stop: f64,
    pub take_profit: f64,
    pub balance: f64,
}

/// Build an execution plan, or fail with a Validation error when the
/// geometry or sizing is unusable.
pub fn build_plan(
    req: &PlanRequest,
    sizing: &SizingConfig,
    exit_strategy: &ExitStrategy,
) -> Result<ExecutionPlan, EngineError> {
    validate_geometry(req)?;

    let outcome = size_position(req.balance, req.entry, req.stop, sizing)?;

    let max_risk = req.balance * sizing.max_risk_percent / 100.0;
    if outcome.risk_amount > max_risk + 1e-9 {
        return Err(EngineError::validation(format!(
            "risk amount {:.2} exceeds budget {:.2}",
            outcome.risk_amount, max_risk
        )));
    }

    let risk_per_unit = (req.entry - req.stop).abs();
    let reward_per_unit = (req.take_profit - req.entry).abs();
    let reward_amount = outcome.position_size * reward_per_unit;
    let rr_ratio = reward_per_unit / risk_per_unit;

    let exits = partial_exits(req.direction, req.entry, req.stop, exit_strategy)?;

    debug!(
        direction = %req.direction,
        entry = req.entry,
        stop = req.stop,
        take_profit = req.take_profit,
        size = outcome.position_size,
        rr = format!("{rr_ratio:.2}"),
        "execution plan built"
    );

    Ok(ExecutionPlan {
        direction: req.direction,
        entry_price: req.entry,
        stop_loss: req.stop,
        take_profit: req.take_profit,
        position_size: outcome.position_size,
        risk_amount: outcome.risk_amount,
        reward_amount,
        rr_ratio,
        partial_exits: exits,
        warnings: outcome.warnings,
    })
}

fn validate_geometry(req: &PlanRequest) -> Result<(), EngineError> {
    for (name, v) in [
        ("entry", req.entry),
        ("stop", req.stop),
        ("take_profit", req.take_profit),
    ] {
        if !v.is_finite() || v <= 0.0 {
            return Err(EngineError::validation(format!(
                "{name} must be a positive finite price"
            )));
        }
    }
    match req.direction {
        Direction::Bullish => {
            if !(req.stop < req.entry && req.entry < req.take_profit) {
                return Err(EngineError::validation(format!(
                    "long plan requires stop < entry < take_profit (got {} / {} / {})",
                    req.stop, req.entry, req.take_profit
                )));
            }
        }
        Direction::Bearish => {
            if !(req.stop > req.entry && req.entry > req.take_profit) {
                return Err(EngineError::validation(format!(
                    "short plan requires stop > entry > take_profit (got {} / {} / {})",
                    req.stop, req.entry, req.take_profit
                )));
            }
        }
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
