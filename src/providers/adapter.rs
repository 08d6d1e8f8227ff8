// =============================================================================
// Provider adapter boundary — uniform GetBars over every upstream
// =============================================================================
//
// This module defines only the request type, the capability set, and the
// provider trait. Concrete upstreams (fixture, REST) live in their own
// modules; the composite chain holds them as `Arc<dyn BarProvider>` without
// knowing the concrete types.
// =============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::contracts::{Bar, EngineError, Symbol, Timeframe};

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Parameters for a historical bars fetch.
#[derive(Debug, Clone)]
pub struct BarsRequest {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
    /// Inclusive lower bound on bar timestamps.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on bar timestamps.
    pub to: Option<DateTime<Utc>>,
    /// Maximum number of bars to return (most recent kept).
    pub limit: Option<usize>,
}

impl BarsRequest {
    pub fn new(symbol: Symbol, timeframe: Timeframe) -> Self {
        Self {
            symbol,
            timeframe,
            from: None,
            to: None,
            limit: None,
        }
    }

    /// Basic request sanity: a range must not be inverted and a limit must
    /// be non-zero.
    pub fn validate(&self) -> Result<(), EngineError> {
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if to < from {
                return Err(EngineError::validation(format!(
                    "inverted range: from {from} after to {to}"
                )));
            }
        }
        if self.limit == Some(0) {
            return Err(EngineError::validation("limit must be at least 1"));
        }
        Ok(())
    }

    /// Clip a bar series to the request's range and limit, keeping the most
    /// recent bars when a limit applies.
    pub fn clip(&self, mut bars: Vec<Bar>) -> Vec<Bar> {
        if let Some(from) = self.from {
            bars.retain(|b| b.timestamp >= from);
        }
        if let Some(to) = self.to {
            bars.retain(|b| b.timestamp <= to);
        }
        if let Some(limit) = self.limit {
            if bars.len() > limit {
                bars.drain(..bars.len() - limit);
            }
        }
        bars
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// What an upstream can do. The composite uses this for timeframe routing
/// and realtime subscription delegation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    pub supported_timeframes: Vec<Timeframe>,
    pub max_bars_per_request: usize,
    pub needs_auth: bool,
    /// Requests per minute the upstream tolerates; 0 = unlimited.
    pub rate_limit_per_minute: u32,
    /// Earliest history available, if bounded.
    pub historical_from: Option<DateTime<Utc>>,
    pub supports_extended_hours: bool,
    pub supports_realtime: bool,
}

impl ProviderCapabilities {
    /// The finest supported timeframe that divides `tf` evenly, used when the
    /// requested timeframe itself is unsupported and the adapter defers to
    /// aggregation.
    pub fn finer_source_for(&self, tf: Timeframe) -> Option<Timeframe> {
        self.supported_timeframes
            .iter()
            .copied()
            .filter(|s| s.divides(tf))
            .max()
    }

    pub fn supports(&self, tf: Timeframe) -> bool {
        self.supported_timeframes.contains(&tf)
    }
}

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// Uniform upstream market-data contract.
///
/// Implementations must return bars ascending by timestamp, deduplicated,
/// and clipped to the request range. An adapter that lacks the requested
/// timeframe but supports a finer divisor fetches the finer series and
/// aggregates before returning.
#[async_trait]
pub trait BarProvider: Send + Sync {
    /// Short identifier used in logs and health tracking.
    fn name(&self) -> &str;

    fn capabilities(&self) -> ProviderCapabilities;

    async fn get_bars(&self, req: &BarsRequest) -> Result<Vec<Bar>, EngineError>;

    /// Cheap local validation of a symbol against this upstream's universe.
    fn validate_symbol(&self, symbol: &Symbol) -> bool {
        !symbol.canonical.is_empty()
    }

    /// Start a realtime bar feed for the symbol, pushing into `sink`.
    ///
    /// The default declines; only adapters advertising `supports_realtime`
    /// override this. Senders are bounded; on overflow the producer drops the
    /// oldest pending update (documented backpressure policy).
    async fn subscribe(
        &self,
        symbol: &Symbol,
        _sink: mpsc::Sender<Bar>,
    ) -> Result<(), EngineError> {
        Err(EngineError::validation(format!(
            "provider '{}' does not support realtime subscriptions for {symbol}",
            self.name()
        )))
    }

    /// Tear down any realtime feeds this adapter started. Default: no-op.
    async fn unsubscribe_all(&self) {}
}

// =============================================================================
// Tests
// =============================================================================
