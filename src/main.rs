// =============================================================================
// Borealis Market-Analysis Engine — Main Entry Point
// =============================================================================
//
// Startup order: environment → config (with env overrides) → shared state →
// HTTP surface (webhook ingest + status API) → periodic analysis loop.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod aggregate;
mod app_state;
mod bias;
mod cache;
mod calendar;
mod config;
mod confluence;
mod contracts;
mod indicators;
mod pipeline;
mod providers;
mod risk;
mod webhook;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::EngineConfig;
use crate::contracts::Symbol;
use crate::pipeline::AnalysisRequest;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Borealis Analysis Engine — Starting Up            ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = EngineConfig::load("engine_config.json").unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        EngineConfig::default()
    });

    // Env overrides.
    if let Ok(syms) = std::env::var("BOREALIS_SYMBOLS") {
        config.symbols = syms
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Ok(addr) = std::env::var("BOREALIS_BIND_ADDR") {
        config.bind_addr = addr;
    }
    config.webhook.secret = std::env::var("BOREALIS_WEBHOOK_SECRET").unwrap_or_default();
    if config.webhook.secret.is_empty() {
        warn!("BOREALIS_WEBHOOK_SECRET is not set — all webhook deliveries will be rejected");
    }

    info!(
        symbols = ?config.symbols,
        primary_timeframe = %config.primary_timeframe,
        providers = config.providers.chain.len(),
        "engine configured"
    );

    // ── 2. Build shared state ────────────────────────────────────────────
    let state = Arc::new(AppState::new(config));

    // ── 3. Start the HTTP surface ────────────────────────────────────────
    let bind_addr = state.config.read().bind_addr.clone();
    let http_state = state.clone();
    tokio::spawn(async move {
        let app = webhook::handler::router(http_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .expect("failed to bind HTTP server");
        info!(addr = %bind_addr, "HTTP surface listening");
        axum::serve(listener, app).await.expect("HTTP server failed");
    });

    // ── 4. Periodic analysis loop ────────────────────────────────────────
    let loop_state = state.clone();
    let analysis_loop = tokio::spawn(async move {
        let interval = std::time::Duration::from_secs(60);
        loop {
            let (symbols, timeframe) = {
                let config = loop_state.config.read();
                (config.symbols.clone(), config.primary_timeframe)
            };

            for raw in &symbols {
                let symbol = match Symbol::normalize(raw) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(symbol = %raw, error = %e, "skipping unresolvable symbol");
                        continue;
                    }
                };
                let request = AnalysisRequest::new(symbol, timeframe);
                match loop_state.orchestrator.analyze(&request).await {
                    Ok(report) => {
                        info!(
                            symbol = %report.symbol,
                            success = report.success,
                            bias = report
                                .analysis
                                .bias
                                .as_ref()
                                .map(|b| b.bias.to_string())
                                .unwrap_or_else(|| "n/a".to_string()),
                            score = report
                                .analysis
                                .confluence
                                .as_ref()
                                .map(|c| format!("{:.1}", c.score))
                                .unwrap_or_else(|| "n/a".to_string()),
                            cached = report.from_cache,
                            "scheduled analysis complete"
                        );
                    }
                    Err(e) => {
                        error!(symbol = %raw, error = %e, "scheduled analysis failed");
                    }
                }
            }

            tokio::time::sleep(interval).await;
        }
    });

    // ── 5. Run until interrupted ─────────────────────────────────────────
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        _ = analysis_loop => {
            error!("analysis loop terminated unexpectedly");
        }
    }

    state.composite.unsubscribe_all().await;
    info!("Borealis stopped");
    Ok(())
}
