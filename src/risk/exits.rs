// =============================================================================
// Exit management — partial-exit ladders and the R-based trailing stop
// =============================================================================
//
// Partial exits: a strategy expands into `(trigger, exit_percent)` levels;
// triggers are R-multiples of the initial risk |entry − stop|. Percentages
// must sum to 100 ± 0.01 and any rounding residual lands on the last level.
// The emitted ladder is sorted by price in the profit direction and carries
// cumulative percentages.
//
// Trailing stop: arms once price reaches entry ± activate·R and then follows
// at distance·R behind the best price, ratcheting only — a trail never
// widens.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::confluence::Direction;
use crate::contracts::EngineError;

/// Tolerance on the exit-percent sum.
const PERCENT_SUM_TOLERANCE: f64 = 0.01;

// ---------------------------------------------------------------------------
// Partial exits
// ---------------------------------------------------------------------------

/// How the exit ladder is generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExitStrategy {
    /// 1R / 2R / 3R with 50/30/20 splits.
    RMultiple,
    /// Fixed percent-of-entry targets with 50/30/20 splits.
    Percentage,
    /// Fibonacci extension targets (1.0R, 1.618R, 2.618R) with 40/30/30.
    Fibonacci,
    /// Caller-supplied levels.
    Custom(Vec<ExitLevelSpec>),
}

/// One caller-supplied level: trigger in R-multiples, percent of the
/// position to close there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitLevelSpec {
    pub trigger_r: f64,
    pub exit_percent: f64,
}

/// One materialized exit level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialExit {
    pub price: f64,
    pub r_multiple: f64,
    pub exit_percent: f64,
    pub cumulative_percent: f64,
}

fn strategy_levels(strategy: &ExitStrategy) -> Vec<(f64, f64)> {
    match strategy {
        ExitStrategy::RMultiple => vec![(1.0, 50.0), (2.0, 30.0), (3.0, 20.0)],
        ExitStrategy::Percentage => vec![(1.0, 50.0), (2.0, 30.0), (3.0, 20.0)],
        ExitStrategy::Fibonacci => vec![(1.0, 40.0), (1.618, 30.0), (2.618, 30.0)],
        ExitStrategy::Custom(levels) => levels
            .iter()
            .map(|l| (l.trigger_r, l.exit_percent))
            .collect(),
    }
}

/// Build the exit ladder for a position.
///
/// For `Percentage` the trigger unit is percent-of-entry instead of R; all
/// other strategies express triggers in R-multiples of |entry − stop|.
pub fn partial_exits(
    direction: Direction,
    entry: f64,
    stop: f64,
    strategy: &ExitStrategy,
) -> Result<Vec<PartialExit>, EngineError> {
    let risk = (entry - stop).abs();
    if risk <= 0.0 {
        return Err(EngineError::validation(
            "stop must be away from entry to build exits",
        ));
    }

    let levels = strategy_levels(strategy);
    if levels.is_empty() {
        return Err(EngineError::validation("exit strategy produced no levels"));
    }
    if levels.iter().any(|(t, p)| *t <= 0.0 || *p <= 0.0) {
        return Err(EngineError::validation(
            "exit triggers and percents must be positive",
        ));
    }

    let sum: f64 = levels.iter().map(|(_, p)| p).sum();
    if (sum - 100.0).abs() > PERCENT_SUM_TOLERANCE {
        return Err(EngineError::validation(format!(
            "exit percents sum to {sum:.4}, expected 100 ± {PERCENT_SUM_TOLERANCE}"
        )));
    }

    let unit = match strategy {
        ExitStrategy::Percentage => entry / 100.0, // percent-of-entry steps
        _ => risk,
    };

    let mut exits: Vec<PartialExit> = levels
        .iter()
        .map(|(trigger, percent)| {
            let offset = trigger * unit;
            let price = match direction {
                Direction::Bullish => entry + offset,
                Direction::Bearish => entry - offset,
            };
            PartialExit {
                price,
                r_multiple: offset / risk,
                exit_percent: *percent,
                cumulative_percent: 0.0,
            }
        })
        .collect();

    // Sort by price in the profit direction.
    match direction {
        Direction::Bullish => exits.sort_by(|a, b| a.price.total_cmp(&b.price)),
        Direction::Bearish => exits.sort_by(|a, b| b.price.total_cmp(&a.price)),
    }

    // Rounding residual goes to the last level, then cumulative percentages.
    let assigned: f64 = exits[..exits.len() - 1].iter().map(|e| e.exit_percent).sum();
    if let Some(last) = exits.last_mut() {
        last.exit_percent = 100.0 - assigned;
    }
    let mut cumulative = 0.0;
    for e in &mut exits {
        cumulative += e.exit_percent;
        e.cumulative_percent = cumulative;
    }

    debug!(
        levels = exits.len(),
        first_price = exits.first().map(|e| e.price),
        "partial-exit ladder built"
    );
    Ok(exits)
}

// ---------------------------------------------------------------------------
// Trailing stop
// ---------------------------------------------------------------------------

/// R-based trailing stop with ratcheting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailingStop {
    pub direction: Direction,
    pub entry: f64,
    /// Initial risk per unit, |entry − stop|.
    pub risk: f64,
    /// Arms once price reaches entry ± activate_r·R.
    pub activate_r: f64,
    /// Follows at distance_r·R behind the best price.
    pub distance_r: f64,
    pub active: bool,
    pub best_price: f64,
    /// Current trail level; `None` until armed.
    pub stop_price: Option<f64>,
}

impl TrailingStop {
    pub fn new(
        direction: Direction,
        entry: f64,
        stop: f64,
        activate_r: f64,
        distance_r: f64,
    ) -> Result<Self, EngineError> {
        let risk = (entry - stop).abs();
        if risk <= 0.0 {
            return Err(EngineError::validation(
                "stop must be away from entry for a trailing stop",
            ));
        }
        if activate_r < 0.0 || distance_r <= 0.0 {
            return Err(EngineError::validation(
                "trailing parameters must be positive",
            ));
        }
        Ok(Self {
            direction,
            entry,
            risk,
            activate_r,
            distance_r,
            active: false,
            best_price: entry,
            stop_price: None,
        })
    }

    /// Feed a new price. Returns `true` when the trail is hit.
    pub fn update(&mut self, price: f64) -> bool {
        // Track the best price in the profit direction.
        match self.direction {
            Direction::Bullish => self.best_price = self.best_price.max(price),
            Direction::Bearish => self.best_price = self.best_price.min(price),
        }

        // Arm once the activation threshold is reached.
        if !self.active {
            let activation = match self.direction {
                Direction::Bullish => self.entry + self.activate_r * self.risk,
                Direction::Bearish => self.entry - self.activate_r * self.risk,
            };
            let armed = match self.direction {
                Direction::Bullish => self.best_price >= activation,
                Direction::Bearish => self.best_price <= activation,
            };
            if armed {
                self.active = true;
                debug!(best_price = self.best_price, "trailing stop armed");
            } else {
                return false;
            }
        }

        // Ratchet: candidate trail only replaces a tighter one.
        let distance = self.distance_r * self.risk;
        let candidate = match self.direction {
            Direction::Bullish => self.best_price - distance,
            Direction::Bearish => self.best_price + distance,
        };
        self.stop_price = Some(match (self.direction, self.stop_price) {
            (Direction::Bullish, Some(current)) => current.max(candidate),
            (Direction::Bearish, Some(current)) => current.min(candidate),
            (_, None) => candidate,
        });

        match (self.direction, self.stop_price) {
            (Direction::Bullish, Some(s)) => price <= s,
            (Direction::Bearish, Some(s)) => price >= s,
            (_, None) => false,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
