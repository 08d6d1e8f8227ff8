// =============================================================================
// Central Application State — Borealis Analysis Engine
// =============================================================================
//
// The single source of truth for the process. All subsystems hold Arc
// references to their own state; AppState ties them together and provides a
// unified snapshot for the HTTP surface.
//
// Thread safety:
//   - Atomic counters inside the cache, health tracker and webhook stats.
//   - parking_lot::RwLock for the hot-reloadable config.
//   - Arc wrappers for subsystem singletons that manage their own interior
//     mutability. No lock is held across an await.
// =============================================================================

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;

use crate::cache::{CacheStats, TtlCache};
use crate::config::{EngineConfig, ProviderKind};
use crate::pipeline::Orchestrator;
use crate::providers::adapter::BarProvider;
use crate::providers::composite::{CompositeConfig, CompositeProvider, ProviderSlot};
use crate::providers::fixture::FixtureProvider;
use crate::providers::health::ProviderHealth;
use crate::providers::rest::{RestProvider, RestProviderConfig};
use crate::risk::TradeRecord;
use crate::webhook::dedup::DedupStore;
use crate::webhook::rate_limit::RateLimiter;
use crate::webhook::{WebhookStats, WebhookStatsSnapshot};

/// Central application state shared across all tasks via `Arc<AppState>`.
pub struct AppState {
    pub config: Arc<RwLock<EngineConfig>>,
    pub cache: Arc<TtlCache>,
    pub composite: Arc<CompositeProvider>,
    pub orchestrator: Arc<Orchestrator>,
    /// Completed trades feeding the daily-stop gate. An execution layer
    /// downstream of the reports records fills here.
    pub trade_journal: Arc<RwLock<Vec<TradeRecord>>>,

    // ── Webhook ingest singletons ───────────────────────────────────────
    pub webhook_stats: WebhookStats,
    pub rate_limiter: RateLimiter,
    pub dedup: DedupStore,

    /// Instant the engine started, for uptime reporting.
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Wire every subsystem from the loaded configuration.
    pub fn new(config: EngineConfig) -> Self {
        let cache = Arc::new(TtlCache::new());

        let slots: Vec<ProviderSlot> = config
            .providers
            .chain
            .iter()
            .map(|entry| {
                let adapter: Arc<dyn BarProvider> = match &entry.kind {
                    ProviderKind::Fixture { base_price, drift } => Arc::new(
                        FixtureProvider::trending(entry.name.clone(), *base_price, *drift),
                    ),
                    ProviderKind::Rest {
                        base_url,
                        bars_path,
                        api_key_header,
                        api_key_env,
                        supported_timeframes,
                        ws_url,
                    } => {
                        let api_key = if api_key_env.is_empty() {
                            String::new()
                        } else {
                            std::env::var(api_key_env).unwrap_or_default()
                        };
                        Arc::new(RestProvider::new(RestProviderConfig {
                            name: entry.name.clone(),
                            base_url: base_url.clone(),
                            bars_path: bars_path.clone(),
                            api_key_header: api_key_header.clone(),
                            api_key,
                            supported_timeframes: supported_timeframes.clone(),
                            max_bars_per_request: 1_000,
                            request_timeout_secs: entry.timeout_ms.div_ceil(1_000).max(1),
                            ws_url: ws_url.clone(),
                        }))
                    }
                };
                ProviderSlot {
                    adapter,
                    priority: entry.priority,
                    timeout_ms: entry.timeout_ms,
                    health_threshold: entry.health_threshold,
                    fallback_only: entry.fallback_only,
                }
            })
            .collect();

        info!(providers = slots.len(), "provider chain wired");

        let composite = Arc::new(CompositeProvider::new(
            slots,
            cache.clone(),
            CompositeConfig {
                retry: config.providers.retry.clone(),
                circuit: config.providers.circuit.clone(),
                ttl_overrides: config.cache.ttl_overrides.clone(),
                coverage_ratio: config.cache.coverage_ratio,
            },
        ));

        let rate_limiter = RateLimiter::new(config.webhook.rate_limit.clone());
        let dedup = DedupStore::new(config.webhook.dedup_window_ms);

        let config = Arc::new(RwLock::new(config));
        let trade_journal = Arc::new(RwLock::new(Vec::new()));
        let orchestrator = Arc::new(Orchestrator::new(
            composite.clone(),
            cache.clone(),
            config.clone(),
            trade_journal.clone(),
        ));

        Self {
            config,
            cache,
            composite,
            orchestrator,
            trade_journal,
            webhook_stats: WebhookStats::new(),
            rate_limiter,
            dedup,
            start_time: std::time::Instant::now(),
        }
    }

    /// Build the serialisable status snapshot for the API surface.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            symbols: self.config.read().symbols.clone(),
            cache: self.cache.stats(),
            providers: self.composite.health_snapshots(),
            webhook: self.webhook_stats.snapshot(),
        }
    }
}

/// Full engine status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub uptime_secs: u64,
    pub symbols: Vec<String>,
    pub cache: CacheStats,
    pub providers: Vec<ProviderHealth>,
    pub webhook: WebhookStatsSnapshot,
}

// =============================================================================
// Tests
// =============================================================================
