// =============================================================================
// Alert normalization — tolerant parse of inbound webhook payloads
// =============================================================================
//
// Senders are sloppy: numerics arrive as strings, optional blocks are
// half-filled, and casing drifts. Normalization coerces what it can and
// drops what it cannot (a NaN or unparsable numeric becomes absent, never a
// poisoned value). Only `symbol`, `type`, `timeframe` and `timestamp` are
// required.
//
// The canonical timestamp field is `timestamp`; payloads carrying the
// legacy `analysisTimestamp` spelling are rejected outright rather than
// silently preferring one of the two.
// =============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::contracts::{EngineError, Symbol, Timeframe};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacdSnapshot {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// A normalized inbound alert, ready for dispatch to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedAlert {
    pub symbol: Symbol,
    pub alert_type: String,
    pub timeframe: Timeframe,
    /// Epoch milliseconds.
    pub timestamp_ms: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsi: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub macd: Option<MacdSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_reward: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Coerce a JSON value into a finite f64; strings are parsed, NaN and
/// infinities are dropped.
fn coerce_number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn coerce_string(v: &Value) -> Option<String> {
    v.as_str().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Parse a raw JSON payload into a normalized alert.
pub fn parse_alert(payload: &Value) -> Result<NormalizedAlert, EngineError> {
    let obj = payload
        .as_object()
        .ok_or_else(|| EngineError::validation("alert payload must be a JSON object"))?;

    if obj.contains_key("analysisTimestamp") || obj.contains_key("analysis_timestamp") {
        return Err(EngineError::validation(
            "field 'analysisTimestamp' is not accepted; use 'timestamp'",
        ));
    }

    let symbol_raw = obj
        .get("symbol")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::validation("alert is missing required field 'symbol'"))?;
    let symbol = Symbol::normalize(symbol_raw)?;

    let alert_type = obj
        .get("type")
        .and_then(|v| coerce_string(v))
        .ok_or_else(|| EngineError::validation("alert is missing required field 'type'"))?;

    let timeframe: Timeframe = obj
        .get("timeframe")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::validation("alert is missing required field 'timeframe'"))?
        .parse()?;

    // Accept epoch milliseconds, epoch seconds (scaled), or ISO-8601.
    let timestamp_ms = match obj.get("timestamp") {
        Some(Value::Number(n)) => {
            let raw = n.as_i64().ok_or_else(|| {
                EngineError::validation("alert 'timestamp' is not an integer")
            })?;
            // Heuristic: values before ~2001 in ms are actually seconds.
            if raw < 1_000_000_000_000 {
                raw * 1_000
            } else {
                raw
            }
        }
        Some(Value::String(s)) => chrono::DateTime::parse_from_rfc3339(s)
            .map_err(|_| {
                EngineError::validation(format!("alert 'timestamp' is not ISO-8601: {s}"))
            })?
            .timestamp_millis(),
        _ => {
            return Err(EngineError::validation(
                "alert is missing required field 'timestamp'",
            ))
        }
    };

    let num = |key: &str| obj.get(key).and_then(coerce_number);
    let text = |key: &str| obj.get(key).and_then(coerce_string);

    let macd = obj.get("macd").and_then(|m| {
        let line = coerce_number(m.get("line")?)?;
        let signal = coerce_number(m.get("signal")?)?;
        let histogram = coerce_number(m.get("histogram")?)?;
        Some(MacdSnapshot {
            line,
            signal,
            histogram,
        })
    });

    Ok(NormalizedAlert {
        symbol,
        alert_type,
        timeframe,
        timestamp_ms,
        price: num("price"),
        open: num("open"),
        high: num("high"),
        low: num("low"),
        close: num("close"),
        volume: num("volume"),
        rsi: num("rsi"),
        macd,
        signal: text("signal"),
        action: text("action"),
        direction: text("direction"),
        confidence: num("confidence"),
        strength: num("strength"),
        stop_loss: num("stopLoss"),
        take_profit: num("takeProfit"),
        risk_reward: num("riskReward"),
        alert_id: text("alertId"),
        strategy: text("strategy"),
        version: text("version"),
    })
}

// =============================================================================
// Tests
// =============================================================================
