// =============================================================================
// Confluence scoring — zone intersection and weighted factor aggregation
// =============================================================================
//
// Overlaps: every unfilled FVG is intersected with every unmitigated order
// block; the overlap zone is [max(lows), min(highs)].
//
// Scoring: each factor contributes weight × value with value normalized into
// [0, 1] by that factor's own rule. Weights are user-supplied and must sum
// to 1 within ±0.01. The final score is 100 × Σ(w·v), clamped to [0, 100].
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::confluence::{ConfluenceConfig, FvgZone, OrderBlock};
use crate::contracts::{Bar, EngineError};

/// Tolerance on the weight-sum check.
const WEIGHT_SUM_TOLERANCE: f64 = 0.01;
/// Bars considered "recent" for the volume factor.
const RECENT_VOLUME_WINDOW: usize = 5;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Geometric intersection of an unfilled FVG with an unmitigated order
/// block. Indices address the zone lists, not the bar window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneOverlap {
    pub fvg_index: usize,
    pub ob_index: usize,
    pub overlap_low: f64,
    pub overlap_high: f64,
    pub overlap_size: f64,
}

/// One factor's contribution to the confluence score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfluenceFactor {
    pub name: String,
    pub weight: f64,
    /// Normalized into [0, 1] by the factor's own rule.
    pub value: f64,
    pub description: String,
}

// ---------------------------------------------------------------------------
// Weights
// ---------------------------------------------------------------------------

/// Reject weight maps that do not sum to 1 within tolerance.
pub fn validate_weights(
    weights: &std::collections::HashMap<String, f64>,
) -> Result<(), EngineError> {
    if weights.is_empty() {
        return Err(EngineError::configuration("factor weights are empty"));
    }
    if weights.values().any(|w| *w < 0.0 || !w.is_finite()) {
        return Err(EngineError::configuration(
            "factor weights must be finite and non-negative",
        ));
    }
    let sum: f64 = weights.values().sum();
    if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(EngineError::configuration(format!(
            "factor weights sum to {sum:.4}, expected 1.0 ± {WEIGHT_SUM_TOLERANCE}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Overlaps
// ---------------------------------------------------------------------------

/// Intersect unfilled gaps with unmitigated blocks.
pub fn find_overlaps(fvgs: &[FvgZone], blocks: &[OrderBlock]) -> Vec<ZoneOverlap> {
    let mut overlaps = Vec::new();
    for (fi, fvg) in fvgs.iter().enumerate() {
        if fvg.filled {
            continue;
        }
        for (oi, ob) in blocks.iter().enumerate() {
            if ob.mitigated {
                continue;
            }
            if fvg.low <= ob.high && fvg.high >= ob.low {
                let low = fvg.low.max(ob.low);
                let high = fvg.high.min(ob.high);
                overlaps.push(ZoneOverlap {
                    fvg_index: fi,
                    ob_index: oi,
                    overlap_low: low,
                    overlap_high: high,
                    overlap_size: high - low,
                });
            }
        }
    }
    overlaps
}

// ---------------------------------------------------------------------------
// Score
// ---------------------------------------------------------------------------

/// Compute the weighted score and per-factor breakdown. Factor values are
/// normalized against `reference_strength` ATR units; when ATR is not
/// computable the thresholds degrade to absolute price units.
pub fn score(
    bars: &[Bar],
    fvgs: &[FvgZone],
    blocks: &[OrderBlock],
    overlaps: &[ZoneOverlap],
    config: &ConfluenceConfig,
    atr: Option<f64>,
) -> (f64, Vec<ConfluenceFactor>) {
    let unit = atr.unwrap_or(1.0).max(f64::MIN_POSITIVE);
    let reference = (config.reference_strength * unit).max(f64::MIN_POSITIVE);

    let unfilled_strength: f64 = fvgs.iter().filter(|z| !z.filled).map(|z| z.strength).sum();
    let active_block_strength: f64 = blocks
        .iter()
        .filter(|b| !b.mitigated)
        .map(|b| b.strength)
        .sum();
    let overlap_size: f64 = overlaps.iter().map(|o| o.overlap_size).sum();

    let recent_volume: f64 = bars
        .iter()
        .rev()
        .take(RECENT_VOLUME_WINDOW)
        .map(|b| b.volume)
        .sum::<f64>()
        / RECENT_VOLUME_WINDOW.min(bars.len().max(1)) as f64;
    let overall_volume: f64 =
        bars.iter().map(|b| b.volume).sum::<f64>() / bars.len().max(1) as f64;
    let volume_ratio = if overall_volume > 0.0 {
        recent_volume / overall_volume
    } else {
        0.0
    };

    let mut factors = Vec::with_capacity(config.weights.len());
    let mut total = 0.0;

    for (name, weight) in &config.weights {
        let (value, description) = match name.as_str() {
            "fvg" => (
                (unfilled_strength / reference).clamp(0.0, 1.0),
                format!(
                    "{} unfilled gap(s), total strength {:.3}",
                    fvgs.iter().filter(|z| !z.filled).count(),
                    unfilled_strength
                ),
            ),
            "order_block" => (
                (active_block_strength / reference).clamp(0.0, 1.0),
                format!(
                    "{} unmitigated block(s), total strength {:.3}",
                    blocks.iter().filter(|b| !b.mitigated).count(),
                    active_block_strength
                ),
            ),
            "overlap" => (
                (overlap_size / unit).clamp(0.0, 1.0),
                format!(
                    "{} overlap(s), total size {:.3}",
                    overlaps.len(),
                    overlap_size
                ),
            ),
            "volume" => (
                (volume_ratio / 2.0).clamp(0.0, 1.0),
                format!("recent/overall volume ratio {volume_ratio:.2}"),
            ),
            other => (0.0, format!("unknown factor '{other}'")),
        };

        total += weight * value;
        factors.push(ConfluenceFactor {
            name: name.clone(),
            weight: *weight,
            value,
            description,
        });
    }

    // Stable output order regardless of map iteration.
    factors.sort_by(|a, b| a.name.cmp(&b.name));

    ((100.0 * total).clamp(0.0, 100.0), factors)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confluence::Direction;
    use chrono::{TimeZone, Utc};

    fn fvg(low: f64, high: f64, filled: bool) -> FvgZone {
        FvgZone {
            direction: Direction::Bullish,
            low,
            high,
            origin_index: 2,
            filled,
            strength: high - low,
        }
    }

    fn block(low: f64, high: f64, mitigated: bool) -> OrderBlock {
        OrderBlock {
            direction: Direction::Bullish,
            low,
            high,
            origin_index: 0,
            volume: 1_000.0,
            mitigated,
            strength: 2.0,
        }
    }

    fn bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| Bar {
                timestamp: Utc.timestamp_opt(i as i64 * 300, 0).unwrap(),
                open: 100.0,
                high: 100.5,
                low: 99.5,
                close: 100.2,
                volume: 1_000.0,
            })
            .collect()
    }

    #[test]
    fn weights_must_sum_to_one() {
        let mut w = std::collections::HashMap::new();
        w.insert("fvg".to_string(), 0.5);
        w.insert("order_block".to_string(), 0.5);
        assert!(validate_weights(&w).is_ok());

        w.insert("overlap".to_string(), 0.2);
        assert!(validate_weights(&w).is_err());
    }

    #[test]
    fn weight_tolerance_is_one_percent() {
        let mut w = std::collections::HashMap::new();
        w.insert("fvg".to_string(), 0.505);
        w.insert("order_block".to_string(), 0.5);
        assert!(validate_weights(&w).is_ok(), "1.005 is inside tolerance");

        let mut w2 = std::collections::HashMap::new();
        w2.insert("fvg".to_string(), 0.52);
        w2.insert("order_block".to_string(), 0.5);
        assert!(validate_weights(&w2).is_err(), "1.02 is outside tolerance");
    }

    #[test]
    fn negative_or_empty_weights_rejected() {
        assert!(validate_weights(&std::collections::HashMap::new()).is_err());
        let mut w = std::collections::HashMap::new();
        w.insert("fvg".to_string(), -0.5);
        w.insert("order_block".to_string(), 1.5);
        assert!(validate_weights(&w).is_err());
    }

    #[test]
    fn overlap_geometry_exact() {
        // FVG [100.0, 100.5] × OB [100.3, 100.8] → [100.3, 100.5], size 0.2.
        let fvgs = vec![fvg(100.0, 100.5, false)];
        let blocks = vec![block(100.3, 100.8, false)];
        let overlaps = find_overlaps(&fvgs, &blocks);
        assert_eq!(overlaps.len(), 1);
        let o = &overlaps[0];
        assert!((o.overlap_low - 100.3).abs() < 1e-9);
        assert!((o.overlap_high - 100.5).abs() < 1e-9);
        assert!((o.overlap_size - 0.2).abs() < 1e-9);
        assert_eq!(o.fvg_index, 0);
        assert_eq!(o.ob_index, 0);
    }

    #[test]
    fn filled_and_mitigated_zones_excluded() {
        let fvgs = vec![fvg(100.0, 100.5, true), fvg(100.0, 100.5, false)];
        let blocks = vec![block(100.3, 100.8, true), block(100.3, 100.8, false)];
        let overlaps = find_overlaps(&fvgs, &blocks);
        assert_eq!(overlaps.len(), 1, "only the active pair intersects");
        assert_eq!(overlaps[0].fvg_index, 1);
        assert_eq!(overlaps[0].ob_index, 1);
    }

    #[test]
    fn disjoint_zones_produce_no_overlap() {
        let fvgs = vec![fvg(100.0, 100.5, false)];
        let blocks = vec![block(101.0, 101.5, false)];
        assert!(find_overlaps(&fvgs, &blocks).is_empty());
    }

    #[test]
    fn touching_edges_count_as_overlap_of_zero_size() {
        let fvgs = vec![fvg(100.0, 100.5, false)];
        let blocks = vec![block(100.5, 101.0, false)];
        let overlaps = find_overlaps(&fvgs, &blocks);
        assert_eq!(overlaps.len(), 1);
        assert!(overlaps[0].overlap_size.abs() < 1e-12);
    }

    #[test]
    fn score_is_clamped_and_factors_sorted() {
        let cfg = ConfluenceConfig::default();
        let fvgs = vec![fvg(100.0, 150.0, false)]; // absurd strength
        let blocks = vec![block(100.0, 149.0, false)];
        let overlaps = find_overlaps(&fvgs, &blocks);
        let (score, factors) = score(&bars(20), &fvgs, &blocks, &overlaps, &cfg, Some(0.5));
        assert!(score <= 100.0);
        assert!(score > 0.0);
        for pair in factors.windows(2) {
            assert!(pair[0].name <= pair[1].name);
        }
        for f in &factors {
            assert!((0.0..=1.0).contains(&f.value), "factor {} = {}", f.name, f.value);
        }
    }

    #[test]
    fn empty_zones_score_only_volume() {
        let cfg = ConfluenceConfig::default();
        let (score, factors) = score(&bars(20), &[], &[], &[], &cfg, Some(0.5));
        // Flat volume ratio 1.0 → volume value 0.5 with weight 0.15 → 7.5.
        assert!((score - 7.5).abs() < 1e-6, "got {score}");
        let fvg_factor = factors.iter().find(|f| f.name == "fvg").unwrap();
        assert_eq!(fvg_factor.value, 0.0);
    }
}
