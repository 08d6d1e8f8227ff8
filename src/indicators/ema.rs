// =============================================================================
// EMA trend read
// =============================================================================
//
// The bias engine falls back to the EMA(9)/EMA(21) stack when swing
// structure is inconclusive — a steady one-way trend never prints a
// confirmed swing, yet its fast average runs ahead of the slow one.
//
// Only the most recent EMA value matters for that read, so the smoothing is
// a single fold per period rather than a materialized series: seeded with
// the mean of the first `period` closes, then pulled toward each newer
// close by alpha = 2 / (period + 1).
// =============================================================================

/// Final EMA value over `closes` (oldest first) for one period.
///
/// `None` when the period is zero, the series is shorter than the period,
/// or any close is non-finite.
fn ema_last(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let seed = closes[..period].iter().sum::<f64>() / period as f64;
    let ema = closes[period..]
        .iter()
        .fold(seed, |ema, close| ema + alpha * (close - ema));

    ema.is_finite().then_some(ema)
}

/// Read the trend from the EMA(9)/EMA(21) stack.
///
/// Returns `Some((is_bullish, separation_pct))` where `separation_pct` is
/// the percentage distance between the two averages. `None` when the series
/// is too short or the stack shows no separation at all.
pub fn ema_trend(closes: &[f64]) -> Option<(bool, f64)> {
    let fast = ema_last(closes, 9)?;
    let slow = ema_last(closes, 21)?;

    if slow.abs() <= f64::EPSILON {
        return None;
    }
    let separation_pct = ((fast - slow) / slow) * 100.0;
    if !separation_pct.is_finite() || separation_pct == 0.0 {
        return None;
    }

    Some((separation_pct > 0.0, separation_pct.abs()))
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    /// Linear ramp: `n` closes starting at `start`, stepping by `step`.
    fn ramp(start: f64, step: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| start + step * i as f64).collect()
    }

    #[test]
    fn short_or_empty_series_yields_none() {
        assert!(ema_last(&[], 9).is_none());
        assert!(ema_last(&ramp(50.0, 1.0, 8), 9).is_none());
        assert!(ema_last(&ramp(50.0, 1.0, 20), 0).is_none());
    }

    #[test]
    fn series_of_exactly_one_period_is_its_mean() {
        let ema = ema_last(&[10.0, 20.0, 30.0, 40.0], 4).unwrap();
        assert!((ema - 25.0).abs() < 1e-12, "got {ema}");
    }

    #[test]
    fn fold_matches_hand_computation() {
        // Period 3 over [10, 10, 10, 22, 22]: alpha = 0.5, seed = 10,
        // then 10 + 0.5·12 = 16, then 16 + 0.5·6 = 19.
        let ema = ema_last(&[10.0, 10.0, 10.0, 22.0, 22.0], 3).unwrap();
        assert!((ema - 19.0).abs() < 1e-12, "got {ema}");
    }

    #[test]
    fn non_finite_close_poisons_the_value() {
        let mut closes = ramp(50.0, 1.0, 30);
        closes[25] = f64::NAN;
        assert!(ema_last(&closes, 9).is_none());
    }

    #[test]
    fn fast_average_leads_on_a_rising_ramp() {
        let (bullish, sep) = ema_trend(&ramp(80.0, 0.5, 90)).unwrap();
        assert!(bullish);
        assert!(sep > 0.0);
    }

    #[test]
    fn fast_average_trails_on_a_falling_ramp() {
        let (bullish, _) = ema_trend(&ramp(120.0, -0.5, 90)).unwrap();
        assert!(!bullish);
    }

    #[test]
    fn no_read_on_flat_or_short_series() {
        assert!(ema_trend(&[250.0; 60]).is_none(), "zero separation");
        assert!(ema_trend(&ramp(80.0, 0.5, 15)).is_none(), "shorter than EMA(21)");
    }
}
