// =============================================================================
// Risk Engine — position sizing, exit ladders, and the daily stop
// =============================================================================

pub mod daily_stop;
pub mod exits;
pub mod plan;
pub mod sizing;

pub use daily_stop::{can_take_new_trade, DailyStopConfig, DailyStopState, TradeRecord};
pub use exits::{ExitStrategy, PartialExit, TrailingStop};
pub use plan::{build_plan, ExecutionPlan, PlanRequest};
pub use sizing::{KellyParams, SizingConfig};
