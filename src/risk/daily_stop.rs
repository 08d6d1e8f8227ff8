// =============================================================================
// Daily stop — loss accounting in the account timezone
// =============================================================================
//
// Trade records are grouped by their local calendar date in the account
// timezone; only the current date contributes. The engine trips when
// realized losses plus open risk exhaust the daily budget, or when the
// consecutive-loss cap is reached, and resets at the next local midnight.
//
//   max_daily_loss     = min(balance × max_loss_percent / 100, max_loss_amount)
//   total_risk         = realized_loss + open_risk
//   remaining_capacity = max(0, max_daily_loss − total_risk)
// =============================================================================

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::contracts::EngineError;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One completed trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    /// Realized profit (positive) or loss (negative).
    pub pnl: f64,
    pub fees: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyStopConfig {
    /// Percent of balance allowed as daily loss (e.g. 3.0 = 3 %).
    pub max_loss_percent: f64,
    /// Absolute daily-loss cap; the stricter of the two applies.
    pub max_loss_amount: Option<f64>,
    pub max_consecutive_losses: u32,
    /// Count fees against the daily budget.
    pub include_fees: bool,
    /// IANA timezone the account's trading day rolls over in.
    pub account_timezone: String,
}

impl Default for DailyStopConfig {
    fn default() -> Self {
        Self {
            max_loss_percent: 3.0,
            max_loss_amount: None,
            max_consecutive_losses: 5,
            include_fees: false,
            account_timezone: "America/New_York".to_string(),
        }
    }
}

/// Daily-stop snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyStopState {
    /// Local date (YYYY-MM-DD) in the account timezone.
    pub date: NaiveDate,
    pub realized_loss: f64,
    pub open_risk: f64,
    pub max_daily_loss: f64,
    pub remaining_capacity: f64,
    pub is_limit_reached: bool,
    pub consecutive_losses: u32,
    /// Next local midnight, as a UTC instant.
    pub reset_time: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn parse_tz(name: &str) -> Result<Tz, EngineError> {
    name.parse::<Tz>().map_err(|_| {
        EngineError::configuration(format!("unknown account timezone '{name}'"))
    })
}

/// Evaluate the daily stop at `now` over the full trade history.
pub fn evaluate(
    trades: &[TradeRecord],
    balance: f64,
    open_risk: f64,
    now: DateTime<Utc>,
    config: &DailyStopConfig,
) -> Result<DailyStopState, EngineError> {
    if balance <= 0.0 {
        return Err(EngineError::validation("balance must be positive"));
    }
    if open_risk < 0.0 {
        return Err(EngineError::validation("open risk cannot be negative"));
    }
    let tz = parse_tz(&config.account_timezone)?;

    let today = now.with_timezone(&tz).date_naive();

    // Today's trades in chronological order.
    let mut todays: Vec<&TradeRecord> = trades
        .iter()
        .filter(|t| t.timestamp.with_timezone(&tz).date_naive() == today)
        .collect();
    todays.sort_by_key(|t| t.timestamp);

    let mut realized_loss = 0.0;
    let mut consecutive_losses: u32 = 0;
    for trade in &todays {
        if trade.pnl < 0.0 {
            realized_loss += trade.pnl.abs();
            consecutive_losses += 1;
        } else {
            consecutive_losses = 0;
        }
        if config.include_fees {
            realized_loss += trade.fees.max(0.0);
        }
    }

    let percent_cap = balance * config.max_loss_percent / 100.0;
    let max_daily_loss = match config.max_loss_amount {
        Some(abs) => percent_cap.min(abs),
        None => percent_cap,
    };

    let total_risk = realized_loss + open_risk;
    let remaining_capacity = (max_daily_loss - total_risk).max(0.0);
    let capacity_exhausted = total_risk >= max_daily_loss;
    let loss_streak_hit = consecutive_losses >= config.max_consecutive_losses;
    let is_limit_reached = capacity_exhausted || loss_streak_hit;

    if is_limit_reached {
        warn!(
            realized_loss,
            open_risk,
            max_daily_loss,
            consecutive_losses,
            "daily stop limit reached"
        );
    } else {
        debug!(
            realized_loss,
            remaining_capacity,
            consecutive_losses,
            "daily stop evaluated"
        );
    }

    // Next local midnight, resolved back to UTC. Midnight always exists in
    // practice; a DST-shifted midnight resolves to the earliest valid
    // instant.
    let next_day = today + Duration::days(1);
    let reset_local = next_day
        .and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time");
    let reset_time = match tz.from_local_datetime(&reset_local) {
        chrono::LocalResult::Single(dt) => dt.with_timezone(&Utc),
        chrono::LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        chrono::LocalResult::None => (next_day.and_hms_opt(1, 0, 0))
            .and_then(|t| tz.from_local_datetime(&t).earliest())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(now + Duration::days(1)),
    };

    Ok(DailyStopState {
        date: today,
        realized_loss,
        open_risk,
        max_daily_loss,
        remaining_capacity,
        is_limit_reached,
        consecutive_losses,
        reset_time,
    })
}

/// Pre-trade gate: can a new trade with `new_risk` be taken?
pub fn can_take_new_trade(state: &DailyStopState, new_risk: f64) -> bool {
    !state.is_limit_reached && new_risk >= 0.0 && new_risk <= state.remaining_capacity
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> DailyStopConfig {
        DailyStopConfig {
            max_loss_percent: 3.0,
            max_loss_amount: None,
            max_consecutive_losses: 5,
            include_fees: false,
            account_timezone: "America/New_York".to_string(),
        }
    }

    /// 2024-03-08 15:00 UTC = 10:00 New York.
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 8, 15, 0, 0).unwrap()
    }

    fn trade(hour: u32, pnl: f64) -> TradeRecord {
        TradeRecord {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 8, hour, 0, 0).unwrap(),
            pnl,
            fees: 1.0,
        }
    }

    #[test]
    fn two_losses_trip_the_budget() {
        // Balance 10_000, 3% → budget 300. Losses 150 + 160 = 310.
        let trades = vec![trade(13, -150.0), trade(14, -160.0)];
        let state = evaluate(&trades, 10_000.0, 0.0, now(), &cfg()).unwrap();

        assert!((state.realized_loss - 310.0).abs() < 1e-9);
        assert!(state.is_limit_reached);
        assert_eq!(state.remaining_capacity, 0.0);
        assert_eq!(state.consecutive_losses, 2);
        assert!(!can_take_new_trade(&state, 50.0));
    }

    #[test]
    fn reset_time_is_next_local_midnight() {
        let state = evaluate(&[], 10_000.0, 0.0, now(), &cfg()).unwrap();
        assert_eq!(state.date, NaiveDate::from_ymd_opt(2024, 3, 8).unwrap());
        // Midnight 2024-03-09 New York (EST, UTC-5) = 05:00 UTC.
        assert_eq!(
            state.reset_time,
            Utc.with_ymd_and_hms(2024, 3, 9, 5, 0, 0).unwrap()
        );
    }

    #[test]
    fn yesterdays_trades_do_not_count() {
        let old = TradeRecord {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 7, 15, 0, 0).unwrap(),
            pnl: -500.0,
            fees: 0.0,
        };
        let state = evaluate(&[old], 10_000.0, 0.0, now(), &cfg()).unwrap();
        assert_eq!(state.realized_loss, 0.0);
        assert!(!state.is_limit_reached);
    }

    #[test]
    fn local_date_grouping_across_midnight_utc() {
        // 03:00 UTC on 03-08 is 22:00 New York on 03-07 — previous local day.
        let late_evening = TradeRecord {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 8, 3, 0, 0).unwrap(),
            pnl: -100.0,
            fees: 0.0,
        };
        let state = evaluate(&[late_evening], 10_000.0, 0.0, now(), &cfg()).unwrap();
        assert_eq!(state.realized_loss, 0.0, "trade belongs to the prior local day");
    }

    #[test]
    fn open_risk_consumes_capacity() {
        let state = evaluate(&[], 10_000.0, 250.0, now(), &cfg()).unwrap();
        assert!((state.remaining_capacity - 50.0).abs() < 1e-9);
        assert!(!state.is_limit_reached);
        assert!(can_take_new_trade(&state, 50.0));
        assert!(!can_take_new_trade(&state, 51.0));
    }

    #[test]
    fn consecutive_losses_trip_without_budget_exhaustion() {
        let mut c = cfg();
        c.max_consecutive_losses = 3;
        let trades = vec![trade(12, -10.0), trade(13, -10.0), trade(14, -10.0)];
        let state = evaluate(&trades, 10_000.0, 0.0, now(), &c).unwrap();
        assert_eq!(state.consecutive_losses, 3);
        assert!(state.is_limit_reached, "streak cap trips independently");
        assert!(state.remaining_capacity > 0.0);
        assert!(!can_take_new_trade(&state, 10.0));
    }

    #[test]
    fn win_resets_the_streak() {
        let trades = vec![trade(12, -10.0), trade(13, 20.0), trade(14, -10.0)];
        let state = evaluate(&trades, 10_000.0, 0.0, now(), &cfg()).unwrap();
        assert_eq!(state.consecutive_losses, 1);
        assert!((state.realized_loss - 20.0).abs() < 1e-9);
    }

    #[test]
    fn fees_counted_when_configured() {
        let mut c = cfg();
        c.include_fees = true;
        let trades = vec![trade(12, -100.0), trade(13, 50.0)];
        let state = evaluate(&trades, 10_000.0, 0.0, now(), &c).unwrap();
        // 100 loss + 1 fee + 1 fee on the winner.
        assert!((state.realized_loss - 102.0).abs() < 1e-9);
    }

    #[test]
    fn absolute_cap_is_stricter() {
        let mut c = cfg();
        c.max_loss_amount = Some(200.0);
        let state = evaluate(&[], 10_000.0, 0.0, now(), &c).unwrap();
        assert!((state.max_daily_loss - 200.0).abs() < 1e-9);
    }

    #[test]
    fn invariants_hold() {
        let trades = vec![trade(12, -50.0)];
        let state = evaluate(&trades, 10_000.0, 10.0, now(), &cfg()).unwrap();
        assert!(state.realized_loss >= 0.0);
        assert!(state.remaining_capacity >= 0.0);
        assert!(state.open_risk >= 0.0);
    }

    #[test]
    fn bad_inputs_rejected() {
        assert!(evaluate(&[], 0.0, 0.0, now(), &cfg()).is_err());
        assert!(evaluate(&[], 1_000.0, -1.0, now(), &cfg()).is_err());
        let mut c = cfg();
        c.account_timezone = "Mars/Olympus".to_string();
        assert!(evaluate(&[], 1_000.0, 0.0, now(), &c).is_err());
    }
}
