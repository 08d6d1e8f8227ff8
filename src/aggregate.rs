// =============================================================================
// Timeframe Aggregator — fold fine-grained bars into coarser buckets
// =============================================================================
//
// Buckets are floored against the Unix epoch:
//   bucket_start = ts - (ts mod target_duration)
//
// Output bar per bucket: open = first, high = max, low = min, close = last,
// volume = sum, timestamp = bucket start. A trailing bucket that does not
// contain the full complement of source bars is dropped unless the caller
// asks for partials.
// =============================================================================

use chrono::{DateTime, TimeZone, Utc};
use tracing::debug;

use crate::contracts::{bar::sort_dedup, Bar, EngineError, Timeframe};

/// Aggregate `bars` (timeframe `from`) into `to` bars.
///
/// `to` must be an integer multiple of `from`. Input is sorted and
/// deduplicated before folding; output timestamps are strictly ascending.
pub fn aggregate(
    bars: &[Bar],
    from: Timeframe,
    to: Timeframe,
    allow_partial: bool,
) -> Result<Vec<Bar>, EngineError> {
    if !from.divides(to) {
        return Err(EngineError::validation(format!(
            "cannot aggregate {from} into {to}: target must be a larger integer multiple"
        )));
    }
    if bars.is_empty() {
        return Ok(Vec::new());
    }

    let bars = sort_dedup(bars.to_vec());
    let bucket_secs = to.seconds();
    let per_bucket = (to.seconds() / from.seconds()) as usize;

    let mut out: Vec<Bar> = Vec::new();
    let mut current: Option<(DateTime<Utc>, Bar, usize)> = None;

    for bar in &bars {
        let ts = bar.timestamp.timestamp();
        let bucket_start_secs = ts - ts.rem_euclid(bucket_secs);
        let bucket_start = Utc
            .timestamp_opt(bucket_start_secs, 0)
            .single()
            .ok_or_else(|| {
                EngineError::validation(format!("bar timestamp {ts} out of range"))
            })?;

        if let Some((start, acc, count)) = current.as_mut() {
            if *start == bucket_start {
                acc.high = acc.high.max(bar.high);
                acc.low = acc.low.min(bar.low);
                acc.close = bar.close;
                acc.volume += bar.volume;
                *count += 1;
                continue;
            }
        }

        // New bucket: flush the completed one first.
        if let Some((_, acc, _)) = current.take() {
            out.push(acc);
        }
        current = Some((bucket_start, seed_bucket(bucket_start, bar), 1));
    }

    if let Some((_, acc, count)) = current {
        // The final bucket is partial whenever it holds fewer source bars
        // than the timeframe ratio requires.
        if count == per_bucket || allow_partial {
            out.push(acc);
        } else {
            debug!(
                bars_in_bucket = count,
                required = per_bucket,
                "dropping partial trailing bucket"
            );
        }
    }

    // Interior buckets may also be under-filled when the source has gaps
    // (overnight, holidays); those are kept — only the trailing partial is
    // subject to the allow_partial rule.
    Ok(out)
}

fn seed_bucket(bucket_start: DateTime<Utc>, bar: &Bar) -> Bar {
    Bar {
        timestamp: bucket_start,
        open: bar.open,
        high: bar.high,
        low: bar.low,
        close: bar.close,
        volume: bar.volume,
    }
}

// =============================================================================
// Tests
// =============================================================================
