// =============================================================================
// Fixture provider — deterministic synthetic bars + scripted failures
// =============================================================================
//
// Serves two purposes:
//   1. Offline/demo runs: deterministic OHLCV series with configurable drift
//      and noise, reproducible across calls (bar i is generated from a seed
//      derived from the symbol and the bucket timestamp, never from global
//      RNG state).
//   2. Tests: scripted failure injection so the composite chain, retry loop
//      and circuit breaker can be exercised without a network.
// =============================================================================

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::contracts::{Bar, EngineError, Symbol, Timeframe};
use crate::providers::adapter::{BarProvider, BarsRequest, ProviderCapabilities};

/// Default number of bars when the request has neither range nor limit.
const DEFAULT_WINDOW: usize = 500;

/// A failure the fixture will raise instead of serving bars.
#[derive(Debug, Clone)]
pub enum ScriptedFailure {
    RateLimit { retry_after_secs: Option<u64> },
    Transport(String),
}

impl ScriptedFailure {
    fn to_error(&self) -> EngineError {
        match self {
            Self::RateLimit { retry_after_secs } => EngineError::ProviderRateLimit {
                retry_after_secs: *retry_after_secs,
            },
            Self::Transport(msg) => EngineError::transport(msg.clone()),
        }
    }
}

/// Deterministic synthetic market-data source.
pub struct FixtureProvider {
    name: String,
    seed: u64,
    base_price: f64,
    /// Price drift per bar (positive = up-trending fixture).
    drift: f64,
    /// Peak random noise amplitude in price units.
    noise: f64,
    supports_realtime: bool,
    /// One-shot failures consumed in order before bars are served again.
    failure_queue: Mutex<VecDeque<ScriptedFailure>>,
    /// When set, every call fails with this error.
    fail_forever: Mutex<Option<ScriptedFailure>>,
}

impl FixtureProvider {
    pub fn new(name: impl Into<String>, seed: u64, base_price: f64, drift: f64, noise: f64) -> Self {
        Self {
            name: name.into(),
            seed,
            base_price,
            drift,
            noise,
            supports_realtime: false,
            failure_queue: Mutex::new(VecDeque::new()),
            fail_forever: Mutex::new(None),
        }
    }

    /// An up-trending fixture suitable for bullish scenarios.
    pub fn trending(name: impl Into<String>, base_price: f64, drift: f64) -> Self {
        Self::new(name, 7, base_price, drift, drift.abs() * 0.6)
    }

    /// Queue a single failure to be raised by the next call.
    pub fn push_failure(&self, failure: ScriptedFailure) {
        self.failure_queue.lock().push_back(failure);
    }

    /// Make every subsequent call fail.
    pub fn fail_forever(&self, failure: ScriptedFailure) {
        *self.fail_forever.lock() = Some(failure);
    }

    /// Clear the fail-forever mode.
    pub fn recover(&self) {
        *self.fail_forever.lock() = None;
    }

    fn bar_at(&self, symbol: &Symbol, tf: Timeframe, index: i64) -> Bar {
        let mut hasher = DefaultHasher::new();
        symbol.canonical.hash(&mut hasher);
        tf.to_string().hash(&mut hasher);
        index.hash(&mut hasher);
        let mut rng = StdRng::seed_from_u64(self.seed ^ hasher.finish());

        let price_at = |i: i64, r: &mut StdRng| {
            self.base_price + self.drift * i as f64 + r.gen_range(-self.noise..=self.noise)
        };

        let open = price_at(index, &mut rng);
        let close = price_at(index + 1, &mut rng);
        let wick = rng.gen_range(0.0..=self.noise.max(1e-9));
        let high = open.max(close) + wick;
        let low = (open.min(close) - wick).max(0.01);
        let volume = rng.gen_range(500.0..5_000.0);

        Bar {
            timestamp: Utc
                .timestamp_opt(index * tf.seconds(), 0)
                .single()
                .expect("fixture index within range"),
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

#[async_trait]
impl BarProvider for FixtureProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supported_timeframes: Timeframe::ALL.to_vec(),
            max_bars_per_request: 10_000,
            needs_auth: false,
            rate_limit_per_minute: 0,
            historical_from: None,
            supports_extended_hours: true,
            supports_realtime: self.supports_realtime,
        }
    }

    async fn get_bars(&self, req: &BarsRequest) -> Result<Vec<Bar>, EngineError> {
        req.validate()?;

        if let Some(f) = self.fail_forever.lock().as_ref() {
            return Err(f.to_error());
        }
        if let Some(f) = self.failure_queue.lock().pop_front() {
            return Err(f.to_error());
        }

        let tf = req.timeframe;
        let bucket = |ts: chrono::DateTime<Utc>| ts.timestamp().div_euclid(tf.seconds());

        let end_index = match req.to {
            Some(to) => bucket(to),
            None => bucket(Utc::now()),
        };
        let start_index = match (req.from, req.limit) {
            (Some(from), _) => bucket(from),
            (None, Some(limit)) => end_index - limit as i64 + 1,
            (None, None) => end_index - DEFAULT_WINDOW as i64 + 1,
        };

        let mut bars: Vec<Bar> = (start_index..=end_index)
            .map(|i| self.bar_at(&req.symbol, tf, i))
            .collect();
        // Bucketing can land one bar outside an exact `from`; clip applies
        // the precise range plus the limit.
        bars = req.clip(bars);
        Ok(bars)
    }
}

// =============================================================================
// Tests
// =============================================================================
