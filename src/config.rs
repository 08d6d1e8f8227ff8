// =============================================================================
// Engine Configuration — hot-reloadable settings with atomic save
// =============================================================================
//
// Central configuration hub for the Borealis analysis engine. Every tunable
// lives here so a deployment can be reconfigured without a rebuild.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry serde defaults so that adding new fields never
// breaks loading an older config file.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bias::BiasConfig;
use crate::calendar::CalendarConfig;
use crate::confluence::ConfluenceConfig;
use crate::contracts::Timeframe;
use crate::providers::health::CircuitConfig;
use crate::providers::retry::RetryPolicy;
use crate::risk::{DailyStopConfig, ExitStrategy, SizingConfig};
use crate::webhook::rate_limit::RateLimitConfig;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbols() -> Vec<String> {
    vec!["ES".to_string(), "NQ".to_string(), "SPY".to_string()]
}

fn default_primary_timeframe() -> Timeframe {
    Timeframe::M5
}

fn default_aux_timeframe() -> Option<Timeframe> {
    Some(Timeframe::M1)
}

fn default_bars_limit() -> usize {
    120
}

fn default_min_primary_bars() -> usize {
    30
}

fn default_balance() -> f64 {
    10_000.0
}

fn default_account_timezone() -> String {
    "America/New_York".to_string()
}

fn default_coverage_ratio() -> f64 {
    0.90
}

fn default_webhook_path() -> String {
    "/webhook/tradingview".to_string()
}

fn default_dedup_window_ms() -> u64 {
    60_000
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_provider_timeout_ms() -> u64 {
    5_000
}

fn default_health_threshold() -> f64 {
    30.0
}

fn default_fixture_base_price() -> f64 {
    4_500.0
}

fn default_fixture_drift() -> f64 {
    0.05
}

// =============================================================================
// Sections
// =============================================================================

/// Account-level settings feeding the risk engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    #[serde(default = "default_balance")]
    pub balance: f64,
    /// IANA timezone the trading day rolls over in.
    #[serde(default = "default_account_timezone")]
    pub timezone: String,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            balance: default_balance(),
            timezone: default_account_timezone(),
        }
    }
}

/// Cache tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    /// Per-timeframe TTL overrides, timeframe string → milliseconds.
    #[serde(default)]
    pub ttl_overrides: HashMap<String, u64>,
    /// Fraction of a requested range that must be present for a cached
    /// window to count as a hit.
    #[serde(default = "default_coverage_ratio")]
    pub coverage_ratio: f64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            ttl_overrides: HashMap::new(),
            coverage_ratio: default_coverage_ratio(),
        }
    }
}

/// What kind of upstream a provider slot talks to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderKind {
    /// Deterministic synthetic bars (offline/demo).
    Fixture {
        #[serde(default = "default_fixture_base_price")]
        base_price: f64,
        #[serde(default = "default_fixture_drift")]
        drift: f64,
    },
    /// Generic JSON OHLCV REST upstream.
    Rest {
        base_url: String,
        #[serde(default)]
        bars_path: String,
        /// Header carrying the API key; empty = no auth.
        #[serde(default)]
        api_key_header: String,
        /// Environment variable the key is read from at startup.
        #[serde(default)]
        api_key_env: String,
        #[serde(default)]
        supported_timeframes: Vec<Timeframe>,
        #[serde(default)]
        ws_url: Option<String>,
    },
}

/// One ranked provider slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub name: String,
    #[serde(flatten)]
    pub kind: ProviderKind,
    pub priority: u32,
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_health_threshold")]
    pub health_threshold: f64,
    #[serde(default)]
    pub fallback_only: bool,
}

fn default_providers() -> Vec<ProviderEntry> {
    vec![ProviderEntry {
        name: "fixture".to_string(),
        kind: ProviderKind::Fixture {
            base_price: default_fixture_base_price(),
            drift: default_fixture_drift(),
        },
        priority: 1,
        timeout_ms: default_provider_timeout_ms(),
        health_threshold: default_health_threshold(),
        fallback_only: false,
    }]
}

/// Composite-provider tuning: the ranked chain plus retry/breaker policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersSection {
    #[serde(default = "default_providers")]
    pub chain: Vec<ProviderEntry>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub circuit: CircuitConfig,
}

impl Default for ProvidersSection {
    fn default() -> Self {
        Self {
            chain: default_providers(),
            retry: RetryPolicy::default(),
            circuit: CircuitConfig::default(),
        }
    }
}

fn default_exit_strategy() -> ExitStrategy {
    ExitStrategy::RMultiple
}

fn default_stop_atr_multiplier() -> f64 {
    1.5
}

fn default_target_atr_multiplier() -> f64 {
    3.0
}

/// Risk-engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSection {
    #[serde(default)]
    pub sizing: SizingConfig,
    #[serde(default = "default_exit_strategy")]
    pub exit_strategy: ExitStrategy,
    #[serde(default)]
    pub daily_stop: DailyStopConfig,
    /// ATR multiplier for the protective stop distance.
    #[serde(default = "default_stop_atr_multiplier")]
    pub stop_atr_multiplier: f64,
    /// ATR multiplier for the take-profit distance.
    #[serde(default = "default_target_atr_multiplier")]
    pub target_atr_multiplier: f64,
}

impl Default for RiskSection {
    fn default() -> Self {
        Self {
            sizing: SizingConfig::default(),
            exit_strategy: default_exit_strategy(),
            daily_stop: DailyStopConfig::default(),
            stop_atr_multiplier: default_stop_atr_multiplier(),
            target_atr_multiplier: default_target_atr_multiplier(),
        }
    }
}

/// Webhook ingest settings. The shared secret is injected from the
/// environment at startup, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSection {
    #[serde(default = "default_webhook_path")]
    pub path: String,
    #[serde(skip)]
    pub secret: String,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: u64,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for WebhookSection {
    fn default() -> Self {
        Self {
            path: default_webhook_path(),
            secret: String::new(),
            rate_limit: RateLimitConfig::default(),
            dedup_window_ms: default_dedup_window_ms(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Top-level configuration for the Borealis engine.
///
/// Every field has a serde default so older JSON files missing new fields
/// still deserialize correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    #[serde(default = "default_primary_timeframe")]
    pub primary_timeframe: Timeframe,

    /// Finer auxiliary timeframe fetched alongside the primary (entry
    /// triggers). `null` disables the auxiliary fetch.
    #[serde(default = "default_aux_timeframe")]
    pub aux_timeframe: Option<Timeframe>,

    /// Bars requested for the primary analysis window.
    #[serde(default = "default_bars_limit")]
    pub bars_limit: usize,

    /// Fewer primary bars than this fails the analysis with MISSING_DATA.
    #[serde(default = "default_min_primary_bars")]
    pub min_primary_bars: usize,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default)]
    pub account: AccountConfig,

    #[serde(default)]
    pub cache: CacheSection,

    #[serde(default)]
    pub providers: ProvidersSection,

    #[serde(default)]
    pub confluence: ConfluenceConfig,

    #[serde(default)]
    pub bias: BiasConfig,

    #[serde(default)]
    pub calendar: CalendarConfig,

    #[serde(default)]
    pub risk: RiskSection,

    #[serde(default)]
    pub webhook: WebhookSection,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            primary_timeframe: default_primary_timeframe(),
            aux_timeframe: default_aux_timeframe(),
            bars_limit: default_bars_limit(),
            min_primary_bars: default_min_primary_bars(),
            bind_addr: default_bind_addr(),
            account: AccountConfig::default(),
            cache: CacheSection::default(),
            providers: ProvidersSection::default(),
            confluence: ConfluenceConfig::default(),
            bias: BiasConfig::default(),
            calendar: CalendarConfig::default(),
            risk: RiskSection::default(),
            webhook: WebhookSection::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            primary_timeframe = %config.primary_timeframe,
            providers = config.providers.chain.len(),
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist to `path` via atomic write (tmp + rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise engine config")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.symbols, vec!["ES", "NQ", "SPY"]);
        assert_eq!(cfg.primary_timeframe, Timeframe::M5);
        assert_eq!(cfg.aux_timeframe, Some(Timeframe::M1));
        assert_eq!(cfg.bars_limit, 120);
        assert!((cfg.cache.coverage_ratio - 0.90).abs() < f64::EPSILON);
        assert_eq!(cfg.providers.chain.len(), 1);
        assert_eq!(cfg.webhook.path, "/webhook/tradingview");
        assert_eq!(cfg.webhook.max_body_bytes, 1024 * 1024);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "symbols": ["ES"], "primary_timeframe": "1h" }"#;
        let cfg: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.symbols, vec!["ES"]);
        assert_eq!(cfg.primary_timeframe, Timeframe::H1);
        assert_eq!(cfg.min_primary_bars, 30);
    }

    #[test]
    fn timeframes_serialize_in_provider_form() {
        let cfg = EngineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains(r#""primary_timeframe":"5m""#), "got {json}");
        assert!(json.contains(r#""aux_timeframe":"1m""#));
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = EngineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.symbols, cfg2.symbols);
        assert_eq!(cfg.primary_timeframe, cfg2.primary_timeframe);
        assert_eq!(cfg.bars_limit, cfg2.bars_limit);
        assert_eq!(cfg.providers.chain.len(), cfg2.providers.chain.len());
    }

    #[test]
    fn secret_never_serialized() {
        let mut cfg = EngineConfig::default();
        cfg.webhook.secret = "super-secret".to_string();
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(!json.contains("super-secret"));
    }

    #[test]
    fn rest_provider_entry_roundtrips() {
        let json = r#"{
            "providers": {
                "chain": [{
                    "name": "vendor",
                    "kind": "rest",
                    "base_url": "https://api.vendor.test",
                    "bars_path": "/v1/bars",
                    "supported_timeframes": ["1m", "5m"],
                    "priority": 1
                }]
            }
        }"#;
        let cfg: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.providers.chain.len(), 1);
        match &cfg.providers.chain[0].kind {
            ProviderKind::Rest {
                base_url,
                supported_timeframes,
                ..
            } => {
                assert_eq!(base_url, "https://api.vendor.test");
                assert_eq!(
                    supported_timeframes,
                    &vec![Timeframe::M1, Timeframe::M5]
                );
            }
            other => panic!("expected rest provider, got {other:?}"),
        }
        assert_eq!(cfg.providers.chain[0].timeout_ms, 5_000);
    }

    #[test]
    fn save_and_load_atomic() {
        let dir = std::env::temp_dir().join("borealis-config-test");
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join("engine_config.json");

        let mut cfg = EngineConfig::default();
        cfg.symbols = vec!["RTY".to_string()];
        cfg.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.symbols, vec!["RTY"]);
        let _ = std::fs::remove_file(&path);
    }
}
