// =============================================================================
// Composite Provider — ranked fallback chain over the adapter set
// =============================================================================
//
// Presents a single `get_bars` that degrades gracefully:
//
//   1. Cache-first: the canonical bars key is consulted before any network.
//   2. Candidates are ordered by (fallback_only, priority) and filtered to
//      those whose circuit allows traffic and whose success EMA clears the
//      slot's health threshold. An empty survivor set falls back to the full
//      ordered list — a degraded chain beats no chain.
//   3. Each candidate gets a per-attempt timeout and the retry policy's
//      backoff; exhaustion advances to the next adapter.
//   4. Success writes through to the cache with a timeframe-derived TTL.
//   5. Total failure surfaces the last error wrapped as "all providers
//      failed".
//
// Health updates happen after every attempt; the tracker owns the table and
// serializes mutation internally, so no lock is held across an await.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::{bars_key, range_is_covered, ttl_for_timeframe, TtlCache};
use crate::contracts::{bar::sort_dedup, Bar, EngineError, Symbol};
use crate::providers::adapter::{BarProvider, BarsRequest};
use crate::providers::health::{CircuitConfig, HealthTracker, ProviderHealth};
use crate::providers::retry::{RetryPolicy, RetryStep};

/// Cooperative cancellation flag checked between attempts. Setting it aborts
/// the chain before the next retry; in-flight cache writes are skipped.
pub type CancelToken = Arc<AtomicBool>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// One ranked entry in the chain.
pub struct ProviderSlot {
    pub adapter: Arc<dyn BarProvider>,
    /// Lower = tried earlier.
    pub priority: u32,
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
    /// Minimum success EMA (0-100) to remain a preferred candidate.
    pub health_threshold: f64,
    /// Only attempted when every non-fallback candidate has failed.
    pub fallback_only: bool,
}

#[derive(Debug, Clone)]
pub struct CompositeConfig {
    pub retry: RetryPolicy,
    pub circuit: CircuitConfig,
    /// Per-timeframe TTL overrides (timeframe string → ms).
    pub ttl_overrides: std::collections::HashMap<String, u64>,
    /// Fraction of an explicit range that a cached window must cover to be
    /// served as a hit.
    pub coverage_ratio: f64,
}

impl Default for CompositeConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            circuit: CircuitConfig::default(),
            ttl_overrides: std::collections::HashMap::new(),
            coverage_ratio: 0.90,
        }
    }
}

/// Result of a composite fetch, annotated for observability and tests.
#[derive(Debug, Clone)]
pub struct BarsResult {
    pub bars: Vec<Bar>,
    pub cache_hit: bool,
    /// Which adapter served the request; `None` on a cache hit.
    pub provider: Option<String>,
}

// ---------------------------------------------------------------------------
// Composite
// ---------------------------------------------------------------------------

pub struct CompositeProvider {
    slots: Vec<ProviderSlot>,
    cache: Arc<TtlCache>,
    health: HealthTracker,
    config: CompositeConfig,
}

impl CompositeProvider {
    pub fn new(mut slots: Vec<ProviderSlot>, cache: Arc<TtlCache>, config: CompositeConfig) -> Self {
        slots.sort_by_key(|s| (s.fallback_only, s.priority));
        let health = HealthTracker::new(config.circuit.clone());
        Self {
            slots,
            cache,
            health,
            config,
        }
    }

    /// Fetch bars through the chain. See module docs for the algorithm.
    pub async fn get_bars(&self, req: &BarsRequest) -> Result<BarsResult, EngineError> {
        self.get_bars_with_cancel(req, None).await
    }

    pub async fn get_bars_with_cancel(
        &self,
        req: &BarsRequest,
        cancel: Option<&CancelToken>,
    ) -> Result<BarsResult, EngineError> {
        req.validate()?;

        let key = bars_key(
            &req.symbol.canonical,
            req.timeframe,
            req.from,
            req.to,
            req.limit,
        );

        if let Some(bars) = self.cache.get_bars(&key) {
            // Explicit range queries only count as hits when the cached
            // window actually covers the range; otherwise refetch rather
            // than serve a window with holes.
            let covered = match (req.from, req.to) {
                (Some(from), Some(to)) => {
                    range_is_covered(&bars, from, to, req.timeframe, self.config.coverage_ratio)
                }
                _ => true,
            };
            if covered {
                debug!(key = %key, bars = bars.len(), "composite cache hit");
                return Ok(BarsResult {
                    bars,
                    cache_hit: true,
                    provider: None,
                });
            }
            debug!(key = %key, "cached window under-covers the range — refetching");
        }

        // ── Candidate selection ───────────────────────────────────────
        let preferred: Vec<&ProviderSlot> = self
            .slots
            .iter()
            .filter(|s| {
                self.health.is_available(s.adapter.name())
                    && self.health.success_ema(s.adapter.name()) >= s.health_threshold
            })
            .collect();

        let candidates: Vec<&ProviderSlot> = if preferred.is_empty() {
            warn!("no healthy providers — attempting the full chain anyway");
            self.slots.iter().collect()
        } else {
            preferred
        };

        // ── Chain walk ────────────────────────────────────────────────
        let mut last_error: Option<EngineError> = None;

        'chain: for slot in candidates {
            let name = slot.adapter.name().to_string();
            let mut attempt: u32 = 0;

            loop {
                if is_cancelled(cancel) {
                    return Err(EngineError::Cancelled);
                }
                attempt += 1;

                let started = std::time::Instant::now();
                let outcome = tokio::time::timeout(
                    std::time::Duration::from_millis(slot.timeout_ms),
                    slot.adapter.get_bars(req),
                )
                .await;
                let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;

                let result = match outcome {
                    Ok(r) => r,
                    Err(_) => Err(EngineError::transport(format!(
                        "provider '{name}' timed out after {}ms",
                        slot.timeout_ms
                    ))),
                };

                match result {
                    Ok(bars) => {
                        self.health.record_attempt(&name, true, latency_ms);
                        let bars = req.clip(sort_dedup(bars));

                        if is_cancelled(cancel) {
                            // Cancelled mid-flight: skip the cache write.
                            return Err(EngineError::Cancelled);
                        }

                        let ttl = ttl_for_timeframe(req.timeframe, &self.config.ttl_overrides);
                        self.cache.set_bars(&key, &bars, ttl);

                        info!(
                            provider = %name,
                            symbol = %req.symbol,
                            timeframe = %req.timeframe,
                            bars = bars.len(),
                            attempt,
                            "composite fetch succeeded"
                        );
                        return Ok(BarsResult {
                            bars,
                            cache_hit: false,
                            provider: Some(name),
                        });
                    }
                    Err(e) => {
                        self.health.record_attempt(&name, false, latency_ms);
                        warn!(
                            provider = %name,
                            attempt,
                            error = %e,
                            "provider attempt failed"
                        );

                        match self.config.retry.next_step(&e, attempt) {
                            RetryStep::After(delay) => {
                                last_error = Some(e);
                                tokio::time::sleep(delay).await;
                            }
                            RetryStep::GiveUp => {
                                last_error = Some(e);
                                continue 'chain;
                            }
                        }
                    }
                }
            }
        }

        let detail = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no providers configured".to_string());
        Err(EngineError::transport(format!(
            "all providers failed: {detail}"
        )))
    }

    // -------------------------------------------------------------------------
    // Realtime subscription
    // -------------------------------------------------------------------------

    /// Delegate a realtime feed to the first healthy adapter advertising
    /// realtime support.
    pub async fn subscribe(
        &self,
        symbol: &Symbol,
        sink: mpsc::Sender<Bar>,
    ) -> Result<String, EngineError> {
        for slot in &self.slots {
            let name = slot.adapter.name().to_string();
            if !slot.adapter.capabilities().supports_realtime {
                continue;
            }
            if !self.health.is_available(&name) {
                continue;
            }
            slot.adapter.subscribe(symbol, sink.clone()).await?;
            info!(provider = %name, symbol = %symbol, "realtime subscription delegated");
            return Ok(name);
        }
        Err(EngineError::validation(format!(
            "no healthy realtime-capable provider for {symbol}"
        )))
    }

    /// Fan teardown out to every adapter.
    pub async fn unsubscribe_all(&self) {
        for slot in &self.slots {
            slot.adapter.unsubscribe_all().await;
        }
    }

    // -------------------------------------------------------------------------
    // Observability
    // -------------------------------------------------------------------------

    pub fn health_snapshots(&self) -> Vec<ProviderHealth> {
        self.health.snapshot_all()
    }

    pub fn health_for(&self, name: &str) -> Option<ProviderHealth> {
        self.health.snapshot(name)
    }
}

fn is_cancelled(cancel: Option<&CancelToken>) -> bool {
    cancel.map(|c| c.load(Ordering::Relaxed)).unwrap_or(false)
}

// =============================================================================
// Tests
// =============================================================================
