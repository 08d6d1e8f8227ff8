// =============================================================================
// Provider health tracking — success/latency EMAs and circuit breakers
// =============================================================================
//
// Each adapter in the composite chain gets one health record. After every
// attempt the tracker folds the outcome into a success-rate EMA (0-100,
// smoothing alpha 0.1) and a latency EMA, then advances the circuit state
// machine:
//
//   CLOSED    → OPEN       when the success EMA drops below the trip
//                          threshold (after a minimum sample count, so one
//                          cold-start failure cannot open the circuit)
//   OPEN      → HALF_OPEN  after reset_ms without traffic
//   HALF_OPEN → CLOSED     after `half_open_probes` consecutive successes
//   HALF_OPEN → OPEN       on any failure
//
// Updates are serialized behind a RwLock; reads return cloned snapshots so
// no caller ever holds the lock across I/O.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// EMA smoothing factor for both success rate and latency.
const EMA_ALPHA: f64 = 0.1;
/// Success-rate EMA below which a closed circuit trips open.
const TRIP_THRESHOLD: f64 = 30.0;
/// Attempts required before the trip threshold is enforced.
const MIN_SAMPLES: u32 = 5;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Circuit breaker state for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    HalfOpen,
    Open,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
            Self::Open => write!(f, "OPEN"),
        }
    }
}

/// Snapshot of one provider's health, serialisable for the API surface.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub name: String,
    pub success_rate_ema: f64,
    pub avg_latency_ema_ms: f64,
    pub circuit_state: CircuitState,
    pub attempts: u32,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl ProviderHealth {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            // Optimistic start: a fresh provider is assumed healthy.
            success_rate_ema: 100.0,
            avg_latency_ema_ms: 0.0,
            circuit_state: CircuitState::Closed,
            attempts: 0,
            last_error_at: None,
            last_success_at: None,
        }
    }
}

/// Circuit breaker tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Milliseconds an open circuit waits before probing.
    pub reset_ms: u64,
    /// Consecutive half-open successes required to close.
    pub half_open_probes: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            reset_ms: 30_000,
            half_open_probes: 2,
        }
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

struct Inner {
    health: ProviderHealth,
    /// Consecutive successes while half-open.
    probe_successes: u32,
    /// When the circuit last opened.
    opened_at: Option<DateTime<Utc>>,
}

/// Owns the health table for every provider in the composite chain.
pub struct HealthTracker {
    records: RwLock<HashMap<String, Inner>>,
    config: CircuitConfig,
}

impl HealthTracker {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Record the outcome of one attempt against `name`.
    pub fn record_attempt(&self, name: &str, success: bool, latency_ms: f64) {
        let now = Utc::now();
        let mut records = self.records.write();
        let inner = records
            .entry(name.to_string())
            .or_insert_with(|| Inner {
                health: ProviderHealth::new(name),
                probe_successes: 0,
                opened_at: None,
            });

        let h = &mut inner.health;
        h.attempts = h.attempts.saturating_add(1);
        let sample = if success { 100.0 } else { 0.0 };
        h.success_rate_ema = EMA_ALPHA * sample + (1.0 - EMA_ALPHA) * h.success_rate_ema;
        h.avg_latency_ema_ms = if h.avg_latency_ema_ms == 0.0 {
            latency_ms
        } else {
            EMA_ALPHA * latency_ms + (1.0 - EMA_ALPHA) * h.avg_latency_ema_ms
        };
        if success {
            h.last_success_at = Some(now);
        } else {
            h.last_error_at = Some(now);
        }

        match h.circuit_state {
            CircuitState::Closed => {
                if h.attempts >= MIN_SAMPLES && h.success_rate_ema < TRIP_THRESHOLD {
                    h.circuit_state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    warn!(
                        provider = name,
                        success_ema = format!("{:.1}", h.success_rate_ema),
                        "circuit OPEN — success EMA below threshold"
                    );
                }
            }
            CircuitState::HalfOpen => {
                if success {
                    inner.probe_successes += 1;
                    if inner.probe_successes >= self.config.half_open_probes {
                        h.circuit_state = CircuitState::Closed;
                        inner.opened_at = None;
                        inner.probe_successes = 0;
                        // Recovered circuits restart from a trusted baseline
                        // so one stale EMA sample cannot re-trip instantly.
                        h.success_rate_ema = h.success_rate_ema.max(50.0);
                        info!(provider = name, "circuit CLOSED — probes succeeded");
                    }
                } else {
                    h.circuit_state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    inner.probe_successes = 0;
                    warn!(provider = name, "circuit re-OPEN — half-open probe failed");
                }
            }
            CircuitState::Open => {
                // record_attempt while open happens when the chain had no
                // healthy survivors and tried anyway; a success starts the
                // half-open recovery immediately.
                if success {
                    h.circuit_state = CircuitState::HalfOpen;
                    inner.probe_successes = 1;
                    debug!(provider = name, "open circuit saw a success — probing");
                }
            }
        }
    }

    /// Whether the provider may be attempted. Lazily transitions
    /// OPEN → HALF_OPEN once `reset_ms` has elapsed.
    pub fn is_available(&self, name: &str) -> bool {
        let mut records = self.records.write();
        let Some(inner) = records.get_mut(name) else {
            return true; // never seen: optimistic
        };
        match inner.health.circuit_state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| Utc::now() - t)
                    .unwrap_or_else(Duration::zero);
                if elapsed >= Duration::milliseconds(self.config.reset_ms as i64) {
                    inner.health.circuit_state = CircuitState::HalfOpen;
                    inner.probe_successes = 0;
                    info!(provider = name, "circuit HALF_OPEN — reset window elapsed");
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Lock-free-feeling snapshot (clone under a short read lock).
    pub fn snapshot(&self, name: &str) -> Option<ProviderHealth> {
        self.records.read().get(name).map(|i| i.health.clone())
    }

    /// Snapshot every tracked provider, sorted by name for stable output.
    pub fn snapshot_all(&self) -> Vec<ProviderHealth> {
        let mut all: Vec<ProviderHealth> = self
            .records
            .read()
            .values()
            .map(|i| i.health.clone())
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Current success EMA, 100.0 for unseen providers.
    pub fn success_ema(&self, name: &str) -> f64 {
        self.records
            .read()
            .get(name)
            .map(|i| i.health.success_rate_ema)
            .unwrap_or(100.0)
    }
}

// =============================================================================
// Tests
// =============================================================================
