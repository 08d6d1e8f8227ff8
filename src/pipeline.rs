// =============================================================================
// Pipeline Orchestrator — fetch, analyze, assemble, cache
// =============================================================================
//
// One request produces one report:
//
//   1. Report cache lookup keyed by (kind, symbol, timeframe, date,
//      config-hash) — identical requests inside the TTL never refetch.
//   2. Primary bars via the composite provider (cache-first itself). Too few
//      primary bars fails the whole request with MISSING_DATA semantics; a
//      short auxiliary window only adds a warning.
//   3. Confluence and bias run concurrently (they are independent); the
//      execution plan follows from the bias direction.
//   4. Assembly: a section that failed renders as its neutral default with a
//      warning, and `success` is true whenever at least one primary artifact
//      was produced. Cancellation yields an error, never a partial report.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::bias::{self, BiasLabel, BiasReport, DayProfile};
use crate::cache::{report_key, ttl_for_timeframe, TtlCache};
use crate::calendar::{self, SessionBoundary};
use crate::config::EngineConfig;
use crate::confluence::{self, ConfluenceReport, Direction};
use crate::contracts::{Bar, EngineError, Symbol, Timeframe};
use crate::indicators::atr;
use crate::providers::adapter::BarsRequest;
use crate::providers::composite::{CancelToken, CompositeProvider};
use crate::risk::{
    build_plan, can_take_new_trade, daily_stop, ExecutionPlan, PlanRequest, TradeRecord,
};

// ---------------------------------------------------------------------------
// Request / report types
// ---------------------------------------------------------------------------

/// One analysis request. The canonical as-of field is `timestamp`.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
    /// As-of instant; `None` = now.
    pub timestamp: Option<DateTime<Utc>>,
    pub cancel: Option<CancelToken>,
}

impl AnalysisRequest {
    pub fn new(symbol: Symbol, timeframe: Timeframe) -> Self {
        Self {
            symbol,
            timeframe,
            timestamp: None,
            cancel: None,
        }
    }
}

/// Price range statistics over the analyzed window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeStats {
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportStatistics {
    pub bars_analyzed: usize,
    pub timeframe: Timeframe,
    pub range: RangeStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aux_bars: Option<usize>,
}

/// The analytical sections of a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSection {
    pub bias: Option<BiasReport>,
    pub profile: Option<DayProfile>,
    pub confluence: Option<ConfluenceReport>,
    pub execution: Option<ExecutionPlan>,
    pub sessions: Vec<SessionBoundary>,
}

/// Assembled end-to-end report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Trading date in the symbol's exchange timezone.
    pub date: NaiveDate,
    pub success: bool,
    pub analysis: AnalysisSection,
    pub statistics: ReportStatistics,
    pub warnings: Vec<String>,
    pub timestamp: DateTime<Utc>,
    /// Whether this report came from the report cache.
    #[serde(default)]
    pub from_cache: bool,
    /// Whether the primary bar fetch was served from the bars cache.
    #[serde(default)]
    pub bars_cache_hit: bool,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    composite: Arc<CompositeProvider>,
    cache: Arc<TtlCache>,
    config: Arc<RwLock<EngineConfig>>,
    /// Completed trades feeding the daily-stop gate. Fills are recorded by
    /// whatever execution layer sits downstream of the reports.
    journal: Arc<RwLock<Vec<TradeRecord>>>,
}

impl Orchestrator {
    pub fn new(
        composite: Arc<CompositeProvider>,
        cache: Arc<TtlCache>,
        config: Arc<RwLock<EngineConfig>>,
        journal: Arc<RwLock<Vec<TradeRecord>>>,
    ) -> Self {
        Self {
            composite,
            cache,
            config,
            journal,
        }
    }

    /// Run the full pipeline for one request.
    pub async fn analyze(&self, req: &AnalysisRequest) -> Result<AnalysisReport, EngineError> {
        let config = self.config.read().clone();
        let as_of = req.timestamp.unwrap_or_else(Utc::now);
        let tz = calendar::exchange_tz(&req.symbol);
        let date = as_of.with_timezone(&tz).date_naive();

        // ── Report cache ──────────────────────────────────────────────
        let hash = config_hash(&config);
        let key = report_key("analysis", &req.symbol.canonical, req.timeframe, date, &hash);
        if let Some(raw) = self.cache.get(&key) {
            if let Ok(mut report) = serde_json::from_slice::<AnalysisReport>(&raw) {
                debug!(key = %key, "report cache hit");
                report.from_cache = true;
                return Ok(report);
            }
            // Corrupt cached report: drop and rebuild.
            self.cache.delete(&key);
        }

        // ── Primary bars ──────────────────────────────────────────────
        let mut bars_req = BarsRequest::new(req.symbol.clone(), req.timeframe);
        bars_req.to = Some(as_of);
        bars_req.limit = Some(config.bars_limit);

        let primary = self
            .composite
            .get_bars_with_cancel(&bars_req, req.cancel.as_ref())
            .await?;

        if primary.bars.len() < config.min_primary_bars {
            return Err(EngineError::InsufficientBars {
                required: config.min_primary_bars,
                received: primary.bars.len(),
            });
        }

        let mut warnings: Vec<String> = Vec::new();

        // ── Auxiliary bars (entry-trigger timeframe) ──────────────────
        let mut aux_bars: Option<usize> = None;
        if let Some(aux_tf) = config.aux_timeframe.filter(|tf| *tf != req.timeframe) {
            let mut aux_req = BarsRequest::new(req.symbol.clone(), aux_tf);
            aux_req.to = Some(as_of);
            aux_req.limit = Some(config.bars_limit);
            match self
                .composite
                .get_bars_with_cancel(&aux_req, req.cancel.as_ref())
                .await
            {
                Ok(aux) if aux.bars.len() < config.min_primary_bars => {
                    warnings.push(format!(
                        "auxiliary timeframe {aux_tf} returned only {} bars; entry triggers degraded",
                        aux.bars.len()
                    ));
                    aux_bars = Some(aux.bars.len());
                }
                Ok(aux) => aux_bars = Some(aux.bars.len()),
                Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
                Err(e) => {
                    warnings.push(format!("auxiliary timeframe {aux_tf} unavailable: {e}"));
                }
            }
        }

        // ── Sessions ──────────────────────────────────────────────────
        let sessions = calendar::boundaries_for(date, &req.symbol, &config.calendar);
        if sessions.is_empty() {
            warnings.push(format!("no sessions for {date} (holiday or empty calendar)"));
        }

        // ── Analytical engines (independent → concurrent) ─────────────
        let symbol_name = req.symbol.canonical.clone();
        let tf = req.timeframe;

        let conf_bars = primary.bars.clone();
        let conf_cfg = config.confluence.clone();
        let conf_symbol = symbol_name.clone();
        let bias_bars = primary.bars.clone();
        let bias_cfg = config.bias.clone();
        let bias_symbol = symbol_name.clone();
        let bias_sessions = sessions.clone();

        let (conf_join, bias_join) = tokio::join!(
            tokio::task::spawn_blocking(move || {
                confluence::analyze(&conf_symbol, tf, &conf_bars, &conf_cfg)
            }),
            tokio::task::spawn_blocking(move || {
                bias::analyze(&bias_symbol, tf, &bias_bars, &bias_sessions, &bias_cfg)
            }),
        );

        let confluence_report = match conf_join {
            Ok(Ok(report)) => {
                warnings.extend(report.warnings.iter().cloned());
                Some(report)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "confluence engine failed — section downgraded");
                warnings.push(format!("confluence unavailable: {e}"));
                None
            }
            Err(e) => {
                warn!(error = %e, "confluence task panicked — section downgraded");
                warnings.push("confluence unavailable: internal task failure".to_string());
                None
            }
        };

        let bias_report = match bias_join {
            Ok(report) => {
                warnings.extend(report.warnings.iter().cloned());
                Some(report)
            }
            Err(e) => {
                warn!(error = %e, "bias task panicked — section downgraded");
                warnings.push("bias unavailable: internal task failure".to_string());
                None
            }
        };

        // ── Execution plan (depends on the bias direction) ────────────
        let execution = self.build_execution(
            &config,
            &primary.bars,
            bias_report.as_ref(),
            as_of,
            &mut warnings,
        );

        if req
            .cancel
            .as_ref()
            .map(|c| c.load(std::sync::atomic::Ordering::Relaxed))
            .unwrap_or(false)
        {
            return Err(EngineError::Cancelled);
        }

        // ── Assembly ──────────────────────────────────────────────────
        let range = RangeStats {
            high: primary
                .bars
                .iter()
                .map(|b| b.high)
                .fold(f64::NEG_INFINITY, f64::max),
            low: primary.bars.iter().map(|b| b.low).fold(f64::INFINITY, f64::min),
            close: primary.bars.last().map(|b| b.close).unwrap_or(0.0),
        };

        let success =
            bias_report.is_some() || confluence_report.is_some() || execution.is_some();

        let report = AnalysisReport {
            symbol: symbol_name,
            timeframe: req.timeframe,
            date,
            success,
            analysis: AnalysisSection {
                profile: bias_report.as_ref().map(|b| b.profile),
                bias: bias_report,
                confluence: confluence_report,
                execution,
                sessions,
            },
            statistics: ReportStatistics {
                bars_analyzed: primary.bars.len(),
                timeframe: req.timeframe,
                range,
                aux_bars,
            },
            warnings,
            timestamp: as_of,
            from_cache: false,
            bars_cache_hit: primary.cache_hit,
        };

        // ── Report cache write-through ────────────────────────────────
        match serde_json::to_vec(&report) {
            Ok(raw) => {
                let ttl = ttl_for_timeframe(req.timeframe, &config.cache.ttl_overrides);
                self.cache.set(&key, raw, ttl);
            }
            Err(e) => warn!(error = %e, "failed to serialize report for cache"),
        }

        info!(
            symbol = %report.symbol,
            timeframe = %report.timeframe,
            success = report.success,
            warnings = report.warnings.len(),
            "analysis report assembled"
        );
        Ok(report)
    }

    fn build_execution(
        &self,
        config: &EngineConfig,
        bars: &[Bar],
        bias: Option<&BiasReport>,
        as_of: DateTime<Utc>,
        warnings: &mut Vec<String>,
    ) -> Option<ExecutionPlan> {
        let Some(bias) = bias else {
            warnings.push("execution plan skipped: no bias available".to_string());
            return None;
        };

        let direction = match bias.bias {
            BiasLabel::Long | BiasLabel::LongIntoEq => Direction::Bullish,
            BiasLabel::Short | BiasLabel::ShortIntoEq => Direction::Bearish,
            BiasLabel::Neutral => {
                warnings.push("execution plan skipped: bias is neutral".to_string());
                return None;
            }
        };

        let Some(atr_value) = atr::wilder_atr(bars, atr::DEFAULT_PERIOD) else {
            warnings.push("execution plan skipped: window too short for ATR".to_string());
            return None;
        };
        let entry = bars.last()?.close;
        let stop_offset = config.risk.stop_atr_multiplier * atr_value;
        let target_offset = config.risk.target_atr_multiplier * atr_value;
        let (stop, take_profit) = match direction {
            Direction::Bullish => (entry - stop_offset, entry + target_offset),
            Direction::Bearish => (entry + stop_offset, entry - target_offset),
        };

        let plan_req = PlanRequest {
            direction,
            entry,
            stop,
            take_profit,
            balance: config.account.balance,
        };

        let plan = match build_plan(&plan_req, &config.risk.sizing, &config.risk.exit_strategy) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(error = %e, "execution plan failed — section downgraded");
                warnings.push(format!("execution plan unavailable: {e}"));
                return None;
            }
        };

        // The daily stop gates every new plan: once the day's loss budget or
        // loss streak is spent, plans are withheld instead of resized.
        let trades = self.journal.read().clone();
        match daily_stop::evaluate(
            &trades,
            config.account.balance,
            0.0,
            as_of,
            &config.risk.daily_stop,
        ) {
            Ok(state) => {
                if !can_take_new_trade(&state, plan.risk_amount) {
                    warn!(
                        realized_loss = state.realized_loss,
                        remaining = state.remaining_capacity,
                        consecutive_losses = state.consecutive_losses,
                        "daily stop reached — execution plan withheld"
                    );
                    warnings.push(format!(
                        "daily stop reached (remaining capacity {:.2}); execution plan withheld",
                        state.remaining_capacity
                    ));
                    return None;
                }
            }
            Err(e) => {
                warnings.push(format!("daily stop unavailable: {e}"));
            }
        }

        Some(plan)
    }
}

/// Stable 8-byte hash over the analytical configuration, so reports cached
/// under one tuning never serve another.
fn config_hash(config: &EngineConfig) -> String {
    let relevant = serde_json::json!({
        "confluence": config.confluence,
        "bias": config.bias,
        "risk": config.risk,
        "calendar": config.calendar,
        "bars_limit": config.bars_limit,
    });
    let digest = Sha256::digest(relevant.to_string().as_bytes());
    hex::encode(&digest[..8])
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::composite::{CompositeConfig, ProviderSlot};
    use crate::providers::fixture::{FixtureProvider, ScriptedFailure};
    use chrono::TimeZone;

    fn orchestrator_with(
        provider: Arc<FixtureProvider>,
        config: EngineConfig,
    ) -> Orchestrator {
        orchestrator_with_journal(provider, config, Vec::new())
    }

    fn orchestrator_with_journal(
        provider: Arc<FixtureProvider>,
        mut config: EngineConfig,
        journal: Vec<crate::risk::TradeRecord>,
    ) -> Orchestrator {
        config.symbols = vec!["SPY".to_string()];
        let cache = Arc::new(TtlCache::new());
        let composite = Arc::new(CompositeProvider::new(
            vec![ProviderSlot {
                adapter: provider,
                priority: 1,
                timeout_ms: 2_000,
                health_threshold: 30.0,
                fallback_only: false,
            }],
            cache.clone(),
            CompositeConfig::default(),
        ));
        Orchestrator::new(
            composite,
            cache,
            Arc::new(RwLock::new(config)),
            Arc::new(RwLock::new(journal)),
        )
    }

    fn request() -> AnalysisRequest {
        let mut req = AnalysisRequest::new(
            Symbol::normalize("SPY").unwrap(),
            Timeframe::M5,
        );
        // Friday 2024-03-08 15:00 ET.
        req.timestamp = Some(Utc.with_ymd_and_hms(2024, 3, 8, 20, 0, 0).unwrap());
        req
    }

    #[tokio::test]
    async fn bullish_drift_produces_long_report_with_plan() {
        let provider = Arc::new(FixtureProvider::trending("fixture", 450.0, 0.05));
        let orch = orchestrator_with(provider, EngineConfig::default());

        let report = orch.analyze(&request()).await.unwrap();
        assert!(report.success);
        assert!(!report.from_cache);
        assert_eq!(report.statistics.bars_analyzed, 120);

        let bias = report.analysis.bias.as_ref().unwrap();
        assert!(
            matches!(bias.bias, BiasLabel::Long | BiasLabel::LongIntoEq),
            "drifting-up fixture should be long-side, got {:?}",
            bias.bias
        );

        let plan = report.analysis.execution.as_ref().unwrap();
        assert_eq!(plan.direction, Direction::Bullish);
        assert!(plan.rr_ratio >= 1.5, "rr {}", plan.rr_ratio);
        assert!(plan.stop_loss < plan.entry_price);
        assert!(plan.take_profit > plan.entry_price);
    }

    #[tokio::test]
    async fn repeat_request_hits_report_cache() {
        let provider = Arc::new(FixtureProvider::trending("fixture", 450.0, 0.05));
        let orch = orchestrator_with(provider, EngineConfig::default());

        let req = request();
        let first = orch.analyze(&req).await.unwrap();
        assert!(!first.from_cache);

        let second = orch.analyze(&req).await.unwrap();
        assert!(second.from_cache, "identical request inside TTL must hit");
        assert_eq!(first.statistics.bars_analyzed, second.statistics.bars_analyzed);
        assert_eq!(first.date, second.date);
    }

    #[tokio::test]
    async fn short_primary_window_fails_with_missing_data() {
        let provider = Arc::new(FixtureProvider::trending("fixture", 450.0, 0.05));
        let mut config = EngineConfig::default();
        config.bars_limit = 5; // below min_primary_bars
        let orch = orchestrator_with(provider, config);

        let err = orch.analyze(&request()).await.unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_BARS");
    }

    #[tokio::test]
    async fn aux_timeframe_fetched_alongside_primary() {
        let provider = Arc::new(FixtureProvider::trending("fixture", 450.0, 0.05));
        let orch = orchestrator_with(provider, EngineConfig::default());

        let report = orch.analyze(&request()).await.unwrap();
        assert!(report.success);
        assert_eq!(report.statistics.aux_bars, Some(120));
    }

    #[tokio::test]
    async fn aux_disabled_leaves_statistics_empty() {
        let provider = Arc::new(FixtureProvider::trending("fixture", 450.0, 0.05));
        let mut config = EngineConfig::default();
        config.aux_timeframe = None;
        let orch = orchestrator_with(provider, config);

        let report = orch.analyze(&request()).await.unwrap();
        assert!(report.statistics.aux_bars.is_none());
    }

    #[tokio::test]
    async fn provider_failure_surfaces_as_provider_error() {
        let provider = Arc::new(FixtureProvider::trending("fixture", 450.0, 0.05));
        provider.fail_forever(ScriptedFailure::Transport("down".to_string()));
        let orch = orchestrator_with(provider, EngineConfig::default());

        let err = orch.analyze(&request()).await.unwrap_err();
        assert_eq!(err.code(), "PROVIDER_ERROR");
    }

    #[tokio::test]
    async fn cancellation_yields_no_partial_report() {
        let provider = Arc::new(FixtureProvider::trending("fixture", 450.0, 0.05));
        let orch = orchestrator_with(provider, EngineConfig::default());

        let mut req = request();
        req.cancel = Some(Arc::new(std::sync::atomic::AtomicBool::new(true)));
        let err = orch.analyze(&req).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }

    #[tokio::test]
    async fn daily_stop_withholds_execution_plan() {
        let provider = Arc::new(FixtureProvider::trending("fixture", 450.0, 0.05));
        // Two losses totalling 400 against a 10_000 × 3% = 300 budget,
        // booked earlier on the same New York trading day.
        let journal = vec![
            crate::risk::TradeRecord {
                timestamp: Utc.with_ymd_and_hms(2024, 3, 8, 14, 0, 0).unwrap(),
                pnl: -200.0,
                fees: 0.0,
            },
            crate::risk::TradeRecord {
                timestamp: Utc.with_ymd_and_hms(2024, 3, 8, 15, 0, 0).unwrap(),
                pnl: -200.0,
                fees: 0.0,
            },
        ];
        let orch = orchestrator_with_journal(provider, EngineConfig::default(), journal);

        let report = orch.analyze(&request()).await.unwrap();
        assert!(report.analysis.execution.is_none());
        assert!(
            report.warnings.iter().any(|w| w.contains("daily stop")),
            "warnings: {:?}",
            report.warnings
        );
        // The rest of the report still renders.
        assert!(report.success);
        assert!(report.analysis.bias.is_some());
    }

    #[tokio::test]
    async fn config_hash_changes_with_tuning() {
        let a = EngineConfig::default();
        let mut b = EngineConfig::default();
        b.bias.swing_window = 9;
        assert_ne!(config_hash(&a), config_hash(&b));
        assert_eq!(config_hash(&a), config_hash(&EngineConfig::default()));
    }

    #[tokio::test]
    async fn holiday_date_reports_no_sessions_warning() {
        let provider = Arc::new(FixtureProvider::trending("fixture", 450.0, 0.05));
        let orch = orchestrator_with(provider, EngineConfig::default());

        let mut req = request();
        // Christmas 2024.
        req.timestamp = Some(Utc.with_ymd_and_hms(2024, 12, 25, 15, 0, 0).unwrap());
        let report = orch.analyze(&req).await.unwrap();
        assert!(report.analysis.sessions.is_empty());
        assert!(report
            .warnings
            .iter()
            .any(|w| w.contains("no sessions")), "warnings: {:?}", report.warnings);
    }
}
